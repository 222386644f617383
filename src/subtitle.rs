use crate::model::AssemblyPlan;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// One cue per narrated slide, spanning the slide's time on screen.
pub fn build_cues(plan: &AssemblyPlan) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut cursor = 0u64;
    for entry in &plan.entries {
        let start = cursor;
        cursor += entry.display_duration_ms;
        if !entry.caption.is_empty() {
            cues.push(Cue {
                start_ms: start,
                end_ms: cursor,
                text: entry.caption.clone(),
            });
        }
    }
    cues
}

pub fn write_srt(path: &Path, cues: &[Cue]) -> std::io::Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    for (i, cue) in cues.iter().enumerate() {
        writeln!(f, "{}", i + 1)?;
        writeln!(f, "{} --> {}", format_srt_time(cue.start_ms), format_srt_time(cue.end_ms))?;
        for line in wrap_text(&cue.text, 80) {
            writeln!(f, "{}", line)?;
        }
        writeln!(f)?;
    }
    f.flush()
}

fn format_srt_time(total_ms: u64) -> String {
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        if current.len() + word.len() + 1 > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SlidePlanEntry;
    use std::path::PathBuf;

    fn entry(index: usize, ms: u64, caption: &str) -> SlidePlanEntry {
        SlidePlanEntry {
            index,
            source_number: index + 1,
            image_path: PathBuf::from("x.png"),
            audio_path: None,
            display_duration_ms: ms,
            caption: caption.to_string(),
        }
    }

    #[test]
    fn cues_skip_silent_slides_but_keep_their_time() {
        let plan = AssemblyPlan {
            entries: vec![entry(0, 4000, "Intro"), entry(1, 3000, ""), entry(2, 5500, "Outro")],
            total_duration_ms: 12_500,
            diagnostics: vec![],
        };
        assert_eq!(
            build_cues(&plan),
            vec![
                Cue { start_ms: 0, end_ms: 4000, text: "Intro".into() },
                Cue { start_ms: 7000, end_ms: 12_500, text: "Outro".into() },
            ]
        );
    }

    #[test]
    fn srt_time_format() {
        assert_eq!(format_srt_time(0), "00:00:00,000");
        assert_eq!(format_srt_time(3_723_045), "01:02:03,045");
    }

    #[test]
    fn long_captions_wrap() {
        let text = "word ".repeat(30);
        let lines = wrap_text(&text, 80);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.len() <= 80));
    }

    #[test]
    fn writes_numbered_cues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talk.srt");
        let cues = vec![Cue { start_ms: 0, end_ms: 1500, text: "Hello".into() }];
        write_srt(&path, &cues).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "1\n00:00:00,000 --> 00:00:01,500\nHello\n\n"
        );
    }
}
