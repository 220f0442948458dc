//! The query data model and the pure [`PipelinePlan`] it compiles to.
//!
//! Both types are immutable once constructed: the Plan Builder (in
//! `gateway-pipeline`) takes `&Query` and never mutates it, so a query can
//! be freely shared across the validation, planning and logging paths of
//! one request.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One input alignment/variant file as resolved by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Filename used for format sniffing by the catalog; not necessarily
    /// the basename of `path`.
    pub data_object: String,
    /// Resolved filesystem path.
    pub path: PathBuf,
}

impl FileRef {
    pub fn new(data_object: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            data_object: data_object.into(),
            path: path.into(),
        }
    }
}

/// The output format requested for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Bam,
    Cram,
    Sam,
    Vcf,
}

impl Format {
    /// Output formats the engine knows how to produce.
    pub const SUPPORTED: [Format; 4] = [Format::Bam, Format::Cram, Format::Sam, Format::Vcf];

    pub const DEFAULT: Format = Format::Bam;

    /// Formats whose body is human-readable text rather than a binary
    /// container.
    pub const TEXTUAL: [Format; 2] = [Format::Sam, Format::Vcf];

    pub fn is_textual(self) -> bool {
        matches!(self, Format::Sam | Format::Vcf)
    }
}

/// An immutable, validated request for sequence/variant data. `Serialize`
/// is used for structured `tracing` fields and request logging, not a
/// wire format — the HTTP surface is plain query-string parameters
/// (`gateway::request_processor::RawQueryParams`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub files: Vec<FileRef>,
    pub regions: Vec<String>,
    pub format: Format,
    pub reference: Option<PathBuf>,
}

impl Query {
    pub fn new(files: Vec<FileRef>) -> Self {
        Self {
            files,
            regions: Vec::new(),
            format: Format::DEFAULT,
            reference: None,
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_reference(mut self, reference: PathBuf) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn is_multi_file(&self) -> bool {
        self.files.len() >= 2
    }

    /// Single region string, when exactly one was supplied — used by the
    /// variant-caller `-r` flag which only accepts one region.
    pub fn single_region(&self) -> Option<&str> {
        match self.regions.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}
