//! Turns extracted slides and their synthesis results into an ordered,
//! timed assembly plan.
//!
//! Planning is a pure function of its inputs. Per-slide synthesis problems
//! never fail the plan; they degrade the slide to a silent entry shown for
//! the minimum duration and are recorded as diagnostics. Only malformed
//! input (duplicate or missing indices) is fatal.

use crate::error::PlanningError;
use crate::model::{
    AssemblyPlan, AudioClip, Diagnostic, DiagnosticKind, SlidePlanEntry, SlideRecord,
    SynthesisStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    /// No slide is shown for less than this, audio or not.
    pub min_display_ms: u64,
}

impl PlannerConfig {
    pub fn new(min_display_ms: u64) -> Self {
        Self { min_display_ms }
    }
}

pub fn plan(
    records: &[SlideRecord],
    clips: &[AudioClip],
    config: &PlannerConfig,
) -> Result<AssemblyPlan, PlanningError> {
    if config.min_display_ms == 0 {
        return Err(PlanningError::ZeroFloor);
    }

    let count = records.len();
    let mut slides: Vec<Option<&SlideRecord>> = vec![None; count];
    for record in records {
        let slot = slides
            .get_mut(record.index)
            .ok_or(PlanningError::NonContiguous {
                found: record.index,
                count,
            })?;
        if slot.is_some() {
            return Err(PlanningError::DuplicateIndex(record.index));
        }
        *slot = Some(record);
    }

    let mut results: Vec<Option<&AudioClip>> = vec![None; count];
    for clip in clips {
        let slot = results
            .get_mut(clip.slide_index)
            .ok_or(PlanningError::OrphanClip(clip.slide_index))?;
        if slot.is_some() {
            return Err(PlanningError::DuplicateClip(clip.slide_index));
        }
        *slot = Some(clip);
    }

    let floor = config.min_display_ms;
    let mut entries = Vec::with_capacity(count);
    let mut diagnostics = Vec::new();
    let mut total_duration_ms = 0u64;

    // `count` records landed in `count` distinct slots, so none is empty.
    for (slide, result) in slides.into_iter().flatten().zip(results) {
        let mut entry = SlidePlanEntry {
            index: slide.index,
            source_number: slide.source_number,
            image_path: slide.image_path.clone(),
            audio_path: None,
            display_duration_ms: floor,
            caption: String::new(),
        };

        if slide.has_notes() {
            let degraded = match result {
                Some(clip) => match &clip.status {
                    SynthesisStatus::Ok => {
                        entry.audio_path = Some(clip.audio_path.clone());
                        entry.display_duration_ms = clip.duration_ms.max(floor);
                        entry.caption = slide.notes_text.trim().to_string();
                        None
                    }
                    SynthesisStatus::Failed(reason) => {
                        Some((DiagnosticKind::SynthesisFailed, reason.clone()))
                    }
                    SynthesisStatus::Skipped(reason) => {
                        Some((DiagnosticKind::SynthesisSkipped, reason.clone()))
                    }
                },
                None => Some((
                    DiagnosticKind::Missing,
                    "no synthesis result".to_string(),
                )),
            };
            if let Some((kind, reason)) = degraded {
                diagnostics.push(Diagnostic {
                    index: slide.index,
                    source_number: slide.source_number,
                    kind,
                    reason,
                });
            }
        }

        total_duration_ms += entry.display_duration_ms;
        entries.push(entry);
    }

    Ok(AssemblyPlan {
        entries,
        total_duration_ms,
        diagnostics,
    })
}
