// Observability: metrics recorded by every stage

pub mod metrics;

pub use metrics::{init, render};
