pub mod runner;

pub use runner::{RunMeta, Runner};
