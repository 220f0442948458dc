//! Drives Plan Builder → Pipeline Engine → Trailer Writer for one
//! request, and owns the per-request temp directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query as AxumQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use gateway_pipeline::{build_plan, validate, PipelineEngine, ProcessHandle, ResponseSink, ToolNames, TrailerState};
use gateway_types::{FileRef, Format, GatewayError, Query, QueryValidationError};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use crate::config::GatewayConfig;
use crate::response_body::TrailerBody;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub tools: Arc<ToolNames>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
            tools: Arc::new(ToolNames::default()),
        }
    }
}

/// The raw HTTP query-string parameters. `axum::extract::Query` deserializes
/// via `serde_urlencoded`, which has no notion of repeated-key sequences, so
/// `files`/`region` are comma-separated here rather than repeated params.
/// Resolving `data_object` entries to filesystem paths belongs to a
/// separate catalog service; here each file is passed as `data_object:path`
/// so the engine has something concrete to stream without a real catalog
/// wired in.
#[derive(Debug, Deserialize)]
pub struct RawQueryParams {
    pub files: Option<String>,
    pub region: Option<String>,
    pub format: Option<String>,
    pub reference: Option<PathBuf>,
}

impl RawQueryParams {
    pub fn into_query(self) -> Result<Query, QueryValidationError> {
        let files = self
            .files
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|f| !f.is_empty())
            .map(|f| match f.split_once(':') {
                Some((data_object, path)) => FileRef::new(data_object, path),
                None => FileRef::new(f, f),
            })
            .collect::<Vec<_>>();

        let regions = self
            .region
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        let format = match self.format.as_deref() {
            None => Format::DEFAULT,
            Some("BAM") | Some("bam") => Format::Bam,
            Some("CRAM") | Some("cram") => Format::Cram,
            Some("SAM") | Some("sam") => Format::Sam,
            Some("VCF") | Some("vcf") => Format::Vcf,
            Some(_) => return Err(QueryValidationError::UnknownFormat),
        };

        let mut query = Query::new(files).with_format(format).with_regions(regions);
        if let Some(reference) = self.reference {
            query = query.with_reference(reference);
        }
        Ok(query)
    }
}

/// A thin `IntoResponse` mapping of the error taxonomy's 4xx/5xx split:
/// validation errors are the controller's 4xx, trailer protocol
/// violations are programmer errors and map to 5xx. Neither is reachable
/// once body streaming has begun — see [`stream_handler`].
pub struct ErrorResponse(GatewayError);

impl From<GatewayError> for ErrorResponse {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl From<QueryValidationError> for ErrorResponse {
    fn from(e: QueryValidationError) -> Self {
        Self(GatewayError::Validation(e))
    }
}

impl From<std::io::Error> for ErrorResponse {
    fn from(e: std::io::Error) -> Self {
        Self(GatewayError::Io(e))
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Trailer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

/// The core streaming handler: validates the query, builds the plan,
/// spawns the stage subprocesses, and hands them to the Pipeline Engine
/// while the response body streams to the client.
pub async fn stream_handler(
    State(state): State<AppState>,
    AxumQuery(params): AxumQuery<RawQueryParams>,
) -> Result<Response, ErrorResponse> {
    let query = params.into_query()?;
    validate(&query)?;

    let temp_dir = if query.is_multi_file() {
        Some(
            tempfile::Builder::new()
                .prefix("gateway-")
                .tempdir_in(&state.config.tempdir)?,
        )
    } else {
        None
    };

    let plan = build_plan(&query, &state.tools, temp_dir.as_ref().map(|d| d.path()))?;

    let mut handles = Vec::with_capacity(plan.len());
    for stage in &plan.stages {
        let handle = ProcessHandle::spawn(stage.title, &stage.executable, stage.argv.clone(), stage.cwd.as_deref())
            .map_err(ErrorResponse::from)?;
        handles.push(Arc::new(handle));
    }

    let mut trailer_state = TrailerState::new();
    trailer_state
        .declare()
        .expect("declare is always called before the first body byte");
    let pre_body_headers = trailer_state.headers().clone();

    let (data_tx, data_rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let (trailer_tx, trailer_rx) = oneshot::channel();

    let grace_handles = handles.clone();
    let grace = state.config.grace_millis();
    let engine = PipelineEngine::from_handles(handles);
    let sink = ResponseSink::new(data_tx.clone());

    tokio::spawn(async move {
        // Grace timer: armed on client hangup (the sink's disconnect is
        // the same `closed()` signal the engine's watchdog uses), and
        // force-kills any handle still not closed after the grace period
        // — a backstop this handler owns independently of the engine's
        // own cancellation cascade.
        let watchdog_tx = data_tx.clone();
        tokio::spawn(async move {
            watchdog_tx.closed().await;
            tokio::time::sleep(Duration::from_millis(grace)).await;
            for handle in &grace_handles {
                if !handle.is_closed() {
                    tracing::warn!(stage = handle.title, "grace period elapsed; force-killing stage");
                    handle.kill();
                }
            }
        });

        let settled = engine.run(sink).await;
        let _ = trailer_state.set_data_truncation(settled.truncated, settled.checksum.as_deref());
        let trailers = trailer_state.take_trailers().unwrap_or_default();
        let _ = trailer_tx.send(trailers);

        // temp_dir is dropped here, after the pipeline has settled,
        // removing it regardless of success or failure. Cleanup failures
        // are logged, not propagated — the response has already settled.
        if let Some(dir) = temp_dir {
            if let Err(e) = dir.close() {
                tracing::warn!(error = %e, "temp directory cleanup failed");
            }
        }
    });

    let mut response = Response::new(Body::new(TrailerBody::new(data_rx, trailer_rx)));
    for (name, value) in pre_body_headers.iter() {
        response.headers_mut().insert(name, value.clone());
    }
    Ok(response)
}

/// Pure queries used by the controller.
pub fn supported_formats() -> [Format; 4] {
    Format::SUPPORTED
}

pub fn default_format() -> Format {
    Format::DEFAULT
}

pub fn textual_formats() -> [Format; 2] {
    Format::TEXTUAL
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(files: Option<&str>, region: Option<&str>, format: Option<&str>) -> RawQueryParams {
        RawQueryParams {
            files: files.map(str::to_string),
            region: region.map(str::to_string),
            format: format.map(str::to_string),
            reference: None,
        }
    }

    #[test]
    fn comma_separated_files_split_into_file_refs() {
        let query = raw(Some("a.bam,b.bam"), None, None).into_query().unwrap();
        assert_eq!(query.files.len(), 2);
        assert_eq!(query.files[0].path, PathBuf::from("a.bam"));
        assert_eq!(query.files[1].path, PathBuf::from("b.bam"));
    }

    #[test]
    fn data_object_colon_path_splits_on_the_first_colon() {
        let query = raw(Some("sample1:/data/sample1.bam"), None, None).into_query().unwrap();
        assert_eq!(query.files.len(), 1);
        assert_eq!(query.files[0].data_object, "sample1");
        assert_eq!(query.files[0].path, PathBuf::from("/data/sample1.bam"));
    }

    #[test]
    fn bare_filename_uses_itself_as_both_data_object_and_path() {
        let query = raw(Some("a.bam"), None, None).into_query().unwrap();
        assert_eq!(query.files[0].data_object, "a.bam");
        assert_eq!(query.files[0].path, PathBuf::from("a.bam"));
    }

    #[test]
    fn empty_files_param_yields_no_files() {
        let query = raw(None, None, None).into_query().unwrap();
        assert!(query.files.is_empty());
    }

    #[test]
    fn comma_separated_regions_split_into_separate_strings() {
        let query = raw(Some("a.bam"), Some("chr1,chr2:1-100"), None).into_query().unwrap();
        assert_eq!(query.regions, vec!["chr1".to_string(), "chr2:1-100".to_string()]);
    }

    #[test]
    fn format_strings_are_case_insensitive() {
        for (raw_format, expected) in [
            ("bam", Format::Bam),
            ("BAM", Format::Bam),
            ("cram", Format::Cram),
            ("CRAM", Format::Cram),
            ("sam", Format::Sam),
            ("SAM", Format::Sam),
            ("vcf", Format::Vcf),
            ("VCF", Format::Vcf),
        ] {
            let query = raw(Some("a.bam"), None, Some(raw_format)).into_query().unwrap();
            assert_eq!(query.format, expected);
        }
    }

    #[test]
    fn missing_format_falls_back_to_the_default() {
        let query = raw(Some("a.bam"), None, None).into_query().unwrap();
        assert_eq!(query.format, Format::DEFAULT);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = raw(Some("a.bam"), None, Some("fasta")).into_query().unwrap_err();
        assert_eq!(err, QueryValidationError::UnknownFormat);
    }

    #[test]
    fn reference_path_is_carried_through_when_present() {
        let mut params = raw(Some("a.bam"), None, Some("vcf"));
        params.reference = Some(PathBuf::from("/ref/hs37d5.fa"));
        let query = params.into_query().unwrap();
        assert_eq!(query.reference, Some(PathBuf::from("/ref/hs37d5.fa")));
    }
}
