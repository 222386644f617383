use crate::error::ExtractionError;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Notes are read as one utterance: line breaks become spaces.
pub fn normalize_notes(text: &str) -> String {
    text.replace(['\n', '\r'], " ").trim().to_string()
}

/// Whole-word replacements applied to notes before synthesis, e.g.
/// `FDAT=effdutt`.
#[derive(Debug, Default)]
pub struct PronunciationMap {
    rules: Vec<(Regex, String)>,
}

impl PronunciationMap {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut rules = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((word, pronunciation)) = line.split_once('=') else {
                anyhow::bail!("pronunciation mapping line {} has no `=`: {}", n + 1, line);
            };
            let word = word.trim().to_lowercase();
            if word.is_empty() {
                anyhow::bail!("pronunciation mapping line {} has an empty word", n + 1);
            }
            let pattern = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&word)))
                .case_insensitive(true)
                .build()?;
            rules.push((pattern, pronunciation.trim().to_lowercase()));
        }
        Ok(Self { rules })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let map = Self::parse(&content)?;
        debug!("Loaded {} pronunciation rules from {}", map.len(), path.display());
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (pattern, replacement) in &self.rules {
            out = pattern
                .replace_all(&out, regex::NoExpand(replacement))
                .into_owned();
        }
        out
    }
}

/// Parses `"1,3-5"` into sorted, de-duplicated 1-based slide numbers.
pub fn parse_slide_selection(spec: &str) -> Result<Vec<usize>, ExtractionError> {
    let invalid = || ExtractionError::InvalidSelection(spec.to_string());
    let number = |s: &str| s.trim().parse::<usize>().ok().filter(|&n| n > 0);

    let mut numbers = BTreeSet::new();
    for part in spec.split(',').map(str::trim) {
        if part.is_empty() {
            return Err(invalid());
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = number(start).zip(number(end)).ok_or_else(invalid)?;
                if start > end {
                    return Err(invalid());
                }
                numbers.extend(start..=end);
            }
            None => {
                numbers.insert(number(part).ok_or_else(invalid)?);
            }
        }
    }
    Ok(numbers.into_iter().collect())
}
