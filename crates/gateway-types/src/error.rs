//! The error taxonomy of the engine, shared by `gateway-pipeline` and
//! `gateway` so axum can map each kind to the right status code at the edge.

use thiserror::Error;

/// Errors raised while validating a query or building a plan from it.
/// Surfaced by the controller as HTTP 4xx.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryValidationError {
    #[error("query must reference at least one file")]
    NoFiles,
    #[error("unknown output format")]
    UnknownFormat,
    #[error("files mix BAM and CRAM; a merge requires a single format")]
    InconsistentFormat,
    #[error("VCF output requires a reference FASTA")]
    MissingReference,
}

/// Programmer errors in the Trailer Writer protocol. These indicate a bug
/// in the engine, not bad input, and are surfaced as HTTP 5xx.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailerError {
    #[error("trailers declared after the first body byte was written")]
    HeadersAlreadySent,
    #[error("setDataTruncation called before declare")]
    TrailerNotDeclared,
}

/// Top-level error type returned by request-processing entry points.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Validation(#[from] QueryValidationError),
    #[error(transparent)]
    Trailer(#[from] TrailerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
