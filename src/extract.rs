use crate::error::ExtractionError;
use crate::model::SlideRecord;
use crate::pptx;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

/// Hidden slides are exported too, so pages line up with the notes of every
/// `p:sldId` in the deck.
const PDF_EXPORT_FILTER: &str =
    r#"pdf:impress_pdf_Export:{"ExportHiddenSlides":{"type":"boolean","value":"true"}}"#;

fn convert_args<'a>(render_dir: &'a str, document: &'a str) -> [&'a str; 6] {
    ["--headless", "--convert-to", PDF_EXPORT_FILTER, "--outdir", render_dir, document]
}

#[async_trait]
pub trait SlideExtractor: Send + Sync {
    /// Records for the selected 1-based slide numbers (all slides when
    /// `selection` is `None`), re-indexed from 0 in deck order. Images are
    /// written below `work_dir`.
    async fn extract_slides(
        &self,
        document: &Path,
        selection: Option<&[usize]>,
        work_dir: &Path,
    ) -> Result<Vec<SlideRecord>, ExtractionError>;
}

/// Reads notes straight from the `.pptx` package and rasterizes slides with
/// LibreOffice (deck → PDF) and poppler's `pdftoppm` (PDF → PNG).
#[derive(Debug, Clone)]
pub struct OfficeExtractor {
    pub soffice_bin: String,
    pub pdftoppm_bin: String,
    pub width: u32,
    pub height: u32,
}

impl OfficeExtractor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            soffice_bin: "soffice".to_string(),
            pdftoppm_bin: "pdftoppm".to_string(),
            width,
            height,
        }
    }

    async fn run(&self, bin: &str, args: &[&str]) -> Result<(), ExtractionError> {
        debug!("Running {} {:?}", bin, args);
        let output = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExtractionError::HostUnavailable(bin.to_string()),
                _ => ExtractionError::ToolFailed {
                    tool: bin.to_string(),
                    reason: e.to_string(),
                },
            })?;
        if !output.status.success() {
            return Err(ExtractionError::ToolFailed {
                tool: bin.to_string(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    async fn render_pages(&self, document: &Path, render_dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
        fs::create_dir_all(render_dir).await?;
        let render = render_dir.to_string_lossy();
        let doc = document.to_string_lossy();

        info!("Converting {} to PDF", document.display());
        self.run(&self.soffice_bin, &convert_args(&render, &doc)).await?;

        let stem = document
            .file_stem()
            .ok_or_else(|| ExtractionError::Archive(format!("{} has no file name", doc)))?;
        let pdf = render_dir.join(format!("{}.pdf", stem.to_string_lossy()));
        if !pdf.exists() {
            return Err(ExtractionError::ToolFailed {
                tool: self.soffice_bin.clone(),
                reason: format!("expected {} was not produced", pdf.display()),
            });
        }

        info!("Rasterizing slides at {}x{}", self.width, self.height);
        let (w, h) = (self.width.to_string(), self.height.to_string());
        let prefix = render_dir.join("page");
        self.run(
            &self.pdftoppm_bin,
            &[
                "-png",
                "-scale-to-x",
                &w,
                "-scale-to-y",
                &h,
                &pdf.to_string_lossy(),
                &prefix.to_string_lossy(),
            ],
        )
        .await?;

        let mut entries = fs::read_dir(render_dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.path());
        }
        Ok(page_images(names))
    }
}

/// `pdftoppm` names pages `page-1.png` or `page-01.png` depending on the page
/// count; order by the parsed number.
fn page_images(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut pages: Vec<(usize, PathBuf)> = paths
        .into_iter()
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            let number = name.strip_prefix("page-")?.strip_suffix(".png")?.parse().ok()?;
            Some((number, p))
        })
        .collect();
    pages.sort_by_key(|(n, _)| *n);
    pages.into_iter().map(|(_, p)| p).collect()
}

/// Resolves the selection against the deck and pairs notes with images.
pub fn select_records(
    notes: Vec<String>,
    images: Vec<PathBuf>,
    selection: Option<&[usize]>,
) -> Result<Vec<SlideRecord>, ExtractionError> {
    let count = notes.len();
    if images.len() != count {
        return Err(ExtractionError::ImageCountMismatch {
            rendered: images.len(),
            expected: count,
        });
    }
    let numbers: Vec<usize> = match selection {
        Some(numbers) => numbers.to_vec(),
        None => (1..=count).collect(),
    };
    if let Some(&number) = numbers.iter().find(|&&n| n == 0 || n > count) {
        return Err(ExtractionError::SlideOutOfRange { number, count });
    }

    Ok(numbers
        .into_iter()
        .enumerate()
        .map(|(index, number)| SlideRecord {
            index,
            source_number: number,
            image_path: images[number - 1].clone(),
            notes_text: notes[number - 1].clone(),
        })
        .collect())
}

#[async_trait]
impl SlideExtractor for OfficeExtractor {
    async fn extract_slides(
        &self,
        document: &Path,
        selection: Option<&[usize]>,
        work_dir: &Path,
    ) -> Result<Vec<SlideRecord>, ExtractionError> {
        let path = document.to_path_buf();
        let notes = tokio::task::spawn_blocking(move || pptx::read_notes(&path))
            .await
            .map_err(|e| ExtractionError::ToolFailed {
                tool: "notes reader".to_string(),
                reason: e.to_string(),
            })??;
        info!("Presentation has {} slides", notes.len());

        let pages = self.render_pages(document, &work_dir.join("render")).await?;
        let records = select_records(notes, pages, selection)?;

        // Stable names per source slide, like slides/slide_3.png.
        let slide_dir = work_dir.join("slides");
        fs::create_dir_all(&slide_dir).await?;
        let mut out = Vec::with_capacity(records.len());
        for mut record in records {
            let target = slide_dir.join(format!("slide_{}.png", record.source_number));
            fs::copy(&record.image_path, &target).await?;
            record.image_path = target;
            out.push(record);
        }
        Ok(out)
    }
}
