//! The streaming execution engine: given a validated query, selects a
//! subprocess pipeline, wires its stdin/stdout together, streams the
//! terminal stage into the HTTP response, computes a content checksum
//! in-flight, and signals truncation via HTTP trailers.

pub mod engine;
pub mod plan_builder;
pub mod process_handle;
pub mod trailer;

pub use engine::{PipelineEngine, PipelineState, ResponseSink};
pub use plan_builder::{build_plan, validate, ToolNames};
pub use process_handle::{ProcessHandle, ProcessOutcome, StageFailure};
pub use trailer::TrailerState;
