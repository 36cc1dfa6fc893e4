pub(crate) mod analysis;
pub(crate) mod scope;
pub mod validator;

pub use validator::{ParsedQuery, Validator};
