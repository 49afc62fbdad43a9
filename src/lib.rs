// src/lib.rs
pub mod aws;
pub mod cli;
pub mod handler;
pub mod segment;
pub mod simulation;
pub mod telemetry;

// Re-export tracing for use in other modules
pub use tracing;

pub use handler::{HandleError, HandlerConfig};
pub use segment::SegmentSpeed;
