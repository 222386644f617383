use crate::model::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("cannot read presentation {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a presentation package: {0}")]
    Archive(String),

    #[error("malformed part {part}: {reason}")]
    Malformed { part: String, reason: String },

    #[error("automation host `{0}` is not available")]
    HostUnavailable(String),

    #[error("{tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    #[error("rendered {rendered} slide images but the deck has {expected} slides")]
    ImageCountMismatch { rendered: usize, expected: usize },

    #[error("slide {number} is out of range (deck has {count} slides)")]
    SlideOutOfRange { number: usize, count: usize },

    #[error("invalid slide selection `{0}`")]
    InvalidSelection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisErrorKind {
    Network,
    Auth,
    Quota,
    Engine,
    Audio,
    Config,
}

/// Per-slide, recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("SynthesisError ({kind:?}): {reason}")]
pub struct SynthesisError {
    pub kind: SynthesisErrorKind,
    pub reason: String,
}

impl SynthesisError {
    pub fn new(kind: SynthesisErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<hound::Error> for SynthesisError {
    fn from(e: hound::Error) -> Self {
        Self::new(SynthesisErrorKind::Audio, e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("slide index {0} appears more than once")]
    DuplicateIndex(usize),

    #[error("slide indices are not contiguous: index {found} in a deck of {count} slides")]
    NonContiguous { found: usize, count: usize },

    #[error("more than one audio clip for slide index {0}")]
    DuplicateClip(usize),

    #[error("audio clip for unknown slide index {0}")]
    OrphanClip(usize),

    #[error("minimum display duration must be positive")]
    ZeroFloor,
}

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("encoder `{0}` not found")]
    EncoderMissing(String),

    #[error("encoder failed during {step} ({status}): {stderr}")]
    EncoderFailed {
        step: String,
        status: String,
        stderr: String,
    },

    #[error("nothing to assemble")]
    EmptyPlan,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("assembly failed: {source} ({} degraded slides)", .diagnostics.len())]
    Assembly {
        #[source]
        source: AssemblyError,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("{degraded} of {total} slides degraded, above the allowed ratio {max_ratio}")]
    FailureThreshold {
        degraded: usize,
        total: usize,
        max_ratio: f64,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plan serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
