use serde::Serialize;
use std::path::PathBuf;

/// One slide as produced by an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideRecord {
    /// 0-based position among the selected slides.
    pub index: usize,
    /// 1-based slide number in the source deck.
    pub source_number: usize,
    pub image_path: PathBuf,
    pub notes_text: String,
}

impl SlideRecord {
    pub fn has_notes(&self) -> bool {
        !self.notes_text.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisStatus {
    Ok,
    Skipped(String),
    Failed(String),
}

/// Result of synthesizing one slide's notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub slide_index: usize,
    pub audio_path: PathBuf,
    pub duration_ms: u64,
    pub status: SynthesisStatus,
}

impl AudioClip {
    pub fn ok(slide_index: usize, audio_path: PathBuf, duration_ms: u64) -> Self {
        Self {
            slide_index,
            audio_path,
            duration_ms,
            status: SynthesisStatus::Ok,
        }
    }

    pub fn failed(slide_index: usize, reason: impl Into<String>) -> Self {
        Self {
            slide_index,
            audio_path: PathBuf::new(),
            duration_ms: 0,
            status: SynthesisStatus::Failed(reason.into()),
        }
    }

    pub fn skipped(slide_index: usize, reason: impl Into<String>) -> Self {
        Self {
            slide_index,
            audio_path: PathBuf::new(),
            duration_ms: 0,
            status: SynthesisStatus::Skipped(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlidePlanEntry {
    pub index: usize,
    pub source_number: usize,
    pub image_path: PathBuf,
    pub audio_path: Option<PathBuf>,
    pub display_duration_ms: u64,
    /// Spoken text, empty when the slide is silent.
    pub caption: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    SynthesisFailed,
    SynthesisSkipped,
    /// Notes were present but no synthesis result came back (cancelled or lost task).
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub index: usize,
    pub source_number: usize,
    pub kind: DiagnosticKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyPlan {
    pub entries: Vec<SlidePlanEntry>,
    pub total_duration_ms: u64,
    pub diagnostics: Vec<Diagnostic>,
}

impl AssemblyPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Share of slides that ended up degraded, 0.0 for an empty plan.
    pub fn degraded_ratio(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.diagnostics.len() as f64 / self.entries.len() as f64
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
