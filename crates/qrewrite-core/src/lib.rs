pub mod catalog;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod equivalence;
pub mod errors;
pub mod fingerprint;
pub mod harness;
pub mod knowledge;
pub mod model;
pub mod providers;
pub mod retry;
pub mod search;
pub mod sql;

pub mod report;
pub mod storage;
