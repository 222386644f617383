use crate::assemble::format_seconds;
use crate::model::{AssemblyPlan, Diagnostic};
use std::fmt;
use std::path::PathBuf;

/// Summary printed at the end of every run.
#[derive(Debug, Clone)]
pub struct Report {
    pub total_slides: usize,
    pub total_duration_ms: u64,
    pub total_chars: usize,
    pub degraded: Vec<Diagnostic>,
    pub output: Option<PathBuf>,
    pub work_dir: PathBuf,
}

impl Report {
    pub fn from_plan(plan: &AssemblyPlan, total_chars: usize, work_dir: PathBuf) -> Self {
        Self {
            total_slides: plan.len(),
            total_duration_ms: plan.total_duration_ms,
            total_chars,
            degraded: plan.diagnostics.clone(),
            output: None,
            work_dir,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Slides: {}", self.total_slides)?;
        writeln!(f, "Total duration: {} s", format_seconds(self.total_duration_ms))?;
        writeln!(f, "Total characters synthesized: {}", self.total_chars)?;
        if self.degraded.is_empty() {
            writeln!(f, "Degraded slides: none")?;
        } else {
            writeln!(f, "Degraded slides: {}", self.degraded.len())?;
            for d in &self.degraded {
                writeln!(f, "  slide {} (#{}): {}", d.source_number, d.index, d.reason)?;
            }
        }
        if let Some(output) = &self.output {
            writeln!(f, "Video: {}", output.display())?;
        }
        write!(f, "Temporary files kept in {}", self.work_dir.display())
    }
}
