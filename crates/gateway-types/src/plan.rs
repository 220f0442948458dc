//! The [`PipelinePlan`] produced by the Plan Builder: an ordered,
//! language-neutral description of the subprocess stages needed to
//! satisfy one query.

use std::path::PathBuf;

/// One subprocess stage of a pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Human-readable title used for log correlation, e.g. `"alignment-view"`.
    pub title: &'static str,
    pub executable: String,
    pub argv: Vec<String>,
    /// Working directory. Only the merge stage of a multi-file plan needs
    /// one (its private temp directory).
    pub cwd: Option<PathBuf>,
}

impl Stage {
    pub fn new(title: &'static str, executable: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            title,
            executable: executable.into(),
            argv,
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }
}

/// An ordered list of 1-4 stages; the last is always the terminal stage
/// whose stdout streams to the HTTP response.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub stages: Vec<Stage>,
}

impl PipelinePlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        debug_assert!(!stages.is_empty() && stages.len() <= 4);
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
