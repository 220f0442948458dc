//! Declares and emits the HTTP trailers `data-truncated` and `checksum`.
//! Trailers are the only reliable way to report
//! truncation after a 200 OK has already been flushed, so the contract
//! enforced here — *declare before the first body byte, set before
//! end-response* — is load-bearing, not cosmetic.
//!
//! `TrailerState` owns its header maps (rather than borrowing the real
//! response's) so it can be moved into the task that drives the pipeline
//! to settlement and emits the trailer values once the body ends.

use gateway_types::TrailerError;
use http::{HeaderMap, HeaderValue};

const TRAILER_HEADER: &str = "trailer";
const DATA_TRUNCATED: &str = "data-truncated";
const CHECKSUM: &str = "checksum";

#[derive(Debug, Default)]
pub struct TrailerState {
    headers: HeaderMap,
    trailers: Option<HeaderMap>,
    declared: bool,
    body_started: bool,
}

impl TrailerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pre-body headers accumulated so far (just the `Trailer:`
    /// announcement, once `declare` has run).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Marks that a body byte has been written; after this, `declare`
    /// fails.
    pub fn mark_body_started(&mut self) {
        self.body_started = true;
    }

    /// Announces the trailers this response will carry. Must be called
    /// before the first body byte.
    pub fn declare(&mut self) -> Result<(), TrailerError> {
        if self.body_started {
            return Err(TrailerError::HeadersAlreadySent);
        }
        self.headers.insert(
            TRAILER_HEADER,
            HeaderValue::from_static("data-truncated,checksum"),
        );
        self.declared = true;
        Ok(())
    }

    /// Undoes `declare`. Idempotent — never fails, even if nothing was
    /// declared.
    pub fn remove_declaration(&mut self) {
        self.headers.remove(TRAILER_HEADER);
        self.declared = false;
    }

    /// Emits the trailer values. Fails if `declare` was never called.
    pub fn set_data_truncation(
        &mut self,
        truncated: bool,
        checksum: Option<&str>,
    ) -> Result<(), TrailerError> {
        if !self.declared {
            return Err(TrailerError::TrailerNotDeclared);
        }
        let mut trailers = HeaderMap::new();
        trailers.insert(
            DATA_TRUNCATED,
            HeaderValue::from_static(if truncated { "true" } else { "false" }),
        );
        trailers.insert(
            CHECKSUM,
            HeaderValue::from_str(checksum.unwrap_or("null"))
                .unwrap_or_else(|_| HeaderValue::from_static("null")),
        );
        self.trailers = Some(trailers);
        Ok(())
    }

    /// Takes the trailer values set by `set_data_truncation`, if any.
    pub fn take_trailers(&mut self) -> Option<HeaderMap> {
        self.trailers.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_sets_trailer_header_value() {
        let mut w = TrailerState::new();
        w.declare().unwrap();
        assert_eq!(w.headers().get(TRAILER_HEADER).unwrap(), "data-truncated,checksum");
    }

    #[test]
    fn declare_after_body_write_fails() {
        let mut w = TrailerState::new();
        w.mark_body_started();
        assert_eq!(w.declare().unwrap_err(), TrailerError::HeadersAlreadySent);
        assert!(w.headers().get(TRAILER_HEADER).is_none());
    }

    #[test]
    fn set_without_declare_fails() {
        let mut w = TrailerState::new();
        assert_eq!(
            w.set_data_truncation(true, None).unwrap_err(),
            TrailerError::TrailerNotDeclared
        );
    }

    #[test]
    fn set_truncated_true_yields_null_checksum() {
        let mut w = TrailerState::new();
        w.declare().unwrap();
        w.set_data_truncation(true, None).unwrap();
        let t = w.take_trailers().unwrap();
        assert_eq!(t.get(DATA_TRUNCATED).unwrap(), "true");
        assert_eq!(t.get(CHECKSUM).unwrap(), "null");
    }

    #[test]
    fn set_success_yields_checksum_value() {
        let mut w = TrailerState::new();
        w.declare().unwrap();
        w.set_data_truncation(false, Some("5a1ca5a77b7eb8af83bf55483715b1ba"))
            .unwrap();
        let t = w.take_trailers().unwrap();
        assert_eq!(t.get(DATA_TRUNCATED).unwrap(), "false");
        assert_eq!(t.get(CHECKSUM).unwrap(), "5a1ca5a77b7eb8af83bf55483715b1ba");
    }

    #[test]
    fn declare_then_remove_is_observably_identical_to_no_declaration() {
        let baseline = TrailerState::new();
        let mut w = TrailerState::new();
        w.declare().unwrap();
        w.remove_declaration();
        assert_eq!(w.headers(), baseline.headers());
    }

    #[test]
    fn remove_declaration_with_none_present_is_a_no_op() {
        let mut w = TrailerState::new();
        let before = w.headers().clone();
        w.remove_declaration();
        assert_eq!(w.headers(), &before);
    }
}
