//! Shared data model for the streaming genomics gateway.
//!
//! This crate contains the core types used throughout the gateway: the
//! query data model, the pipeline plan it compiles to, and the shared
//! error taxonomy. It has no process-spawning or HTTP logic of its own —
//! those live in `gateway-pipeline` and `gateway` respectively.

pub mod error;
pub mod plan;
pub mod query;

pub use error::{GatewayError, QueryValidationError, TrailerError};
pub use plan::{PipelinePlan, Stage};
pub use query::{FileRef, Format, Query};
