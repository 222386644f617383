//! Speaker notes from an Office Open XML presentation.
//!
//! Slides are listed in `ppt/presentation.xml` (`p:sldIdLst`) and resolved
//! through the package relationships. A slide's notes live in its
//! `notesSlide` part; only the body placeholder is read, so slide-number and
//! header placeholders never leak into the narration.

use crate::error::ExtractionError;
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;

const NOTES_SLIDE_REL: &str = "/notesSlide";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
}

/// Notes text of every slide, in deck order. Slides without notes yield an
/// empty string.
pub fn read_notes(path: &Path) -> Result<Vec<String>, ExtractionError> {
    let file = File::open(path).map_err(|source| ExtractionError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractionError::Archive(e.to_string()))?;
    read_notes_from(&mut archive)
}

fn read_notes_from<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<String>, ExtractionError> {
    let presentation = read_part(archive, "ppt/presentation.xml")?
        .ok_or_else(|| ExtractionError::Archive("missing ppt/presentation.xml".to_string()))?;
    let slide_ids = slide_rel_ids(&presentation, "ppt/presentation.xml")?;

    let rels_xml = read_part(archive, "ppt/_rels/presentation.xml.rels")?.unwrap_or_default();
    let rels = relationships(&rels_xml, "ppt/_rels/presentation.xml.rels")?;

    let mut notes = Vec::with_capacity(slide_ids.len());
    for rid in slide_ids {
        let rel = rels
            .iter()
            .find(|r| r.id == rid)
            .ok_or_else(|| ExtractionError::Malformed {
                part: "ppt/_rels/presentation.xml.rels".to_string(),
                reason: format!("no relationship {}", rid),
            })?;
        let slide_part = resolve_target("ppt", &rel.target);
        notes.push(slide_notes(archive, &slide_part)?);
    }
    Ok(notes)
}

fn slide_notes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    slide_part: &str,
) -> Result<String, ExtractionError> {
    let (dir, file) = slide_part.rsplit_once('/').unwrap_or(("", slide_part));
    let rels_part = format!("{}/_rels/{}.rels", dir, file);
    let Some(rels_xml) = read_part(archive, &rels_part)? else {
        return Ok(String::new());
    };
    let rels = relationships(&rels_xml, &rels_part)?;
    let Some(rel) = rels.iter().find(|r| r.rel_type.ends_with(NOTES_SLIDE_REL)) else {
        return Ok(String::new());
    };
    let notes_part = resolve_target(dir, &rel.target);
    match read_part(archive, &notes_part)? {
        Some(xml) => body_text(&xml, &notes_part),
        None => Ok(String::new()),
    }
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, ExtractionError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ExtractionError::Archive(e.to_string())),
    };
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(Some(content))
}

/// Resolves a relationship target against the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

fn attr(e: &BytesStart<'_>, key: &[u8], part: &str) -> Result<Option<String>, ExtractionError> {
    match e.attributes().flatten().find(|a| a.key.as_ref() == key) {
        Some(a) => Ok(Some(a.unescape_value().map_err(|e| xml_error(part, e))?.into_owned())),
        None => Ok(None),
    }
}

/// `&amp;` and friends arrive as separate events between text chunks.
fn entity_text(r: &BytesRef<'_>, part: &str) -> Result<String, ExtractionError> {
    if let Some(c) = r.resolve_char_ref().map_err(|e| xml_error(part, e))? {
        return Ok(c.to_string());
    }
    let name = r.decode().map_err(|e| xml_error(part, e))?;
    match resolve_predefined_entity(&name) {
        Some(text) => Ok(text.to_string()),
        None => Ok(format!("&{};", name)),
    }
}

fn xml_error(part: &str, e: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Malformed {
        part: part.to_string(),
        reason: e.to_string(),
    }
}

fn slide_rel_ids(xml: &str, part: &str) -> Result<Vec<String>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut ids = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sldId" => {
                if let Some(id) = attr(&e, b"r:id", part)? {
                    ids.push(id);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
    }
    Ok(ids)
}

fn relationships(xml: &str, part: &str) -> Result<Vec<Relationship>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut rels = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(rel_type), Some(target)) =
                    (attr(&e, b"Id", part)?, attr(&e, b"Type", part)?, attr(&e, b"Target", part)?)
                {
                    rels.push(Relationship {
                        id,
                        rel_type,
                        target,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
    }
    Ok(rels)
}

/// Text of the body placeholder of a notes slide, paragraphs separated by
/// newlines.
fn body_text(xml: &str, part: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs: Vec<String> = Vec::new();

    let mut in_shape = false;
    let mut is_body = false;
    let mut in_text = false;
    let mut shape_paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sp" => {
                    in_shape = true;
                    is_body = false;
                    shape_paragraphs.clear();
                    current.clear();
                }
                b"ph" if in_shape => {
                    is_body = attr(&e, b"type", part)?.as_deref() == Some("body");
                }
                b"t" if in_shape => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"ph" if in_shape => {
                    is_body = attr(&e, b"type", part)?.as_deref() == Some("body");
                }
                b"br" if in_shape => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                current.push_str(&t.xml10_content().map_err(|e| xml_error(part, e))?);
            }
            Ok(Event::GeneralRef(r)) if in_text => current.push_str(&entity_text(&r, part)?),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if in_shape => shape_paragraphs.push(std::mem::take(&mut current)),
                b"sp" => {
                    if is_body {
                        paragraphs.append(&mut shape_paragraphs);
                    }
                    in_shape = false;
                    is_body = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
    }

    Ok(paragraphs.join("\n").trim().to_string())
}
