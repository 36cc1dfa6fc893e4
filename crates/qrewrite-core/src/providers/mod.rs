pub mod engine;
pub mod generator;
