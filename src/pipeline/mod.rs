// Data processing pipeline: vendor parsing through public release

pub mod processing;
pub mod utils;

// Re-export key types and functions from each stage
pub use processing::parser;
