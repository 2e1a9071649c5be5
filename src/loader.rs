//! Multi-format book loading: PDF, EPUB, UTF-8 plain text.
//!
//! `load` turns a file into display metadata plus the ordered sequence of
//! overlapping text windows consumed by the embedding index. Titles come
//! from embedded metadata where the format carries it (EPUB OPF), else
//! the filename stem. Unsupported extensions fail with
//! [`PipelineError::UnsupportedFormat`]; unreadable, corrupt, or empty
//! documents fail with [`PipelineError::DocumentLoadFailed`].

use std::io::Read;
use std::path::Path;

use crate::config::WindowingConfig;
use crate::error::PipelineError;
use crate::models::{BookMetadata, SourceFormat};
use crate::window::split_windows;

/// Maximum decompressed bytes read from a single EPUB entry.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Load a book file and split it into retrieval windows.
pub fn load(
    path: &Path,
    windowing: &WindowingConfig,
) -> Result<(BookMetadata, Vec<String>), PipelineError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let stem_title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string();

    let (format, text, title, author) = match ext.as_str() {
        "pdf" => {
            let text = pdf_extract::extract_text(path)
                .map_err(|e| PipelineError::DocumentLoadFailed(e.to_string()))?;
            // pdf-extract exposes no document-info dictionary, so the
            // title falls back to the filename stem.
            (SourceFormat::Pdf, text, stem_title, None)
        }
        "epub" => {
            let bytes = std::fs::read(path)
                .map_err(|e| PipelineError::DocumentLoadFailed(e.to_string()))?;
            let epub = extract_epub(&bytes)?;
            let title = epub.title.unwrap_or(stem_title);
            (SourceFormat::Epub, epub.text, title, epub.author)
        }
        "txt" => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| PipelineError::DocumentLoadFailed(e.to_string()))?;
            (SourceFormat::Text, text, stem_title, None)
        }
        other => {
            return Err(PipelineError::UnsupportedFormat(if other.is_empty() {
                "(no extension)".to_string()
            } else {
                other.to_string()
            }))
        }
    };

    let windows = split_windows(&text, windowing.window_chars, windowing.overlap_chars);
    if windows.is_empty() {
        return Err(PipelineError::DocumentLoadFailed(
            "no extractable text".to_string(),
        ));
    }

    let metadata = BookMetadata {
        title,
        author,
        format,
        window_count: windows.len(),
    };

    Ok((metadata, windows))
}

struct EpubContent {
    text: String,
    title: Option<String>,
    author: Option<String>,
}

/// Extract spine-ordered text and OPF metadata from an EPUB archive.
///
/// An EPUB is zipped XHTML: the OPF package document lists the content
/// files (`manifest`) and their reading order (`spine`). Falls back to
/// lexicographically ordered HTML entries when the spine is unusable.
fn extract_epub(bytes: &[u8]) -> Result<EpubContent, PipelineError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| PipelineError::DocumentLoadFailed(e.to_string()))?;

    let entry_names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();

    let opf_name = entry_names.iter().find(|n| n.ends_with(".opf")).cloned();

    let mut title = None;
    let mut author = None;
    let mut spine_docs: Vec<String> = Vec::new();

    if let Some(ref opf) = opf_name {
        let opf_xml = read_entry(&mut archive, opf)?;
        let opf_dir = match opf.rfind('/') {
            Some(pos) => &opf[..pos + 1],
            None => "",
        };
        let parsed = parse_opf(&opf_xml)?;
        title = parsed.title;
        author = parsed.author;
        spine_docs = parsed
            .spine_hrefs
            .into_iter()
            .map(|href| format!("{}{}", opf_dir, href))
            .filter(|name| entry_names.iter().any(|n| n == name))
            .collect();
    }

    if spine_docs.is_empty() {
        spine_docs = entry_names
            .iter()
            .filter(|n| {
                let lower = n.to_lowercase();
                lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
            })
            .cloned()
            .collect();
        spine_docs.sort();
    }

    if spine_docs.is_empty() {
        return Err(PipelineError::DocumentLoadFailed(
            "EPUB contains no content documents".to_string(),
        ));
    }

    let mut text = String::new();
    for name in spine_docs {
        let xml = read_entry(&mut archive, &name)?;
        let body = extract_xhtml_text(&xml)?;
        if !body.trim().is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(body.trim());
        }
    }

    Ok(EpubContent {
        text,
        title,
        author,
    })
}

fn read_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, PipelineError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| PipelineError::DocumentLoadFailed(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::DocumentLoadFailed(e.to_string()))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(PipelineError::DocumentLoadFailed(format!(
            "EPUB entry {} exceeds size limit",
            name
        )));
    }
    Ok(out)
}

struct OpfPackage {
    title: Option<String>,
    author: Option<String>,
    spine_hrefs: Vec<String>,
}

/// Parse `dc:title`, `dc:creator`, the manifest id→href table, and the
/// spine reading order out of an OPF package document.
fn parse_opf(xml: &[u8]) -> Result<OpfPackage, PipelineError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut title = None;
    let mut author = None;
    let mut manifest: Vec<(String, String)> = Vec::new();
    let mut spine_idrefs: Vec<String> = Vec::new();
    let mut capture: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"title" => capture = Some("title"),
                b"creator" => capture = Some("creator"),
                _ => collect_opf_item(&e, &mut manifest, &mut spine_idrefs),
            },
            Ok(quick_xml::events::Event::Empty(e)) => {
                collect_opf_item(&e, &mut manifest, &mut spine_idrefs);
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if let Some(field) = capture.take() {
                    let value = t.unescape().unwrap_or_default().trim().to_string();
                    if !value.is_empty() {
                        match field {
                            "title" if title.is_none() => title = Some(value),
                            "creator" if author.is_none() => author = Some(value),
                            _ => {}
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::End(_)) => capture = None,
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(PipelineError::DocumentLoadFailed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let spine_hrefs = spine_idrefs
        .iter()
        .filter_map(|idref| {
            manifest
                .iter()
                .find(|(id, _)| id == idref)
                .map(|(_, href)| href.clone())
        })
        .collect();

    Ok(OpfPackage {
        title,
        author,
        spine_hrefs,
    })
}

fn collect_opf_item(
    e: &quick_xml::events::BytesStart<'_>,
    manifest: &mut Vec<(String, String)>,
    spine_idrefs: &mut Vec<String>,
) {
    match e.local_name().as_ref() {
        b"item" => {
            let mut id = None;
            let mut href = None;
            for attr in e.attributes().flatten() {
                match attr.key.as_ref() {
                    b"id" => id = String::from_utf8(attr.value.to_vec()).ok(),
                    b"href" => href = String::from_utf8(attr.value.to_vec()).ok(),
                    _ => {}
                }
            }
            if let (Some(id), Some(href)) = (id, href) {
                manifest.push((id, href));
            }
        }
        b"itemref" => {
            for attr in e.attributes().flatten() {
                if attr.key.as_ref() == b"idref" {
                    if let Ok(idref) = String::from_utf8(attr.value.to_vec()) {
                        spine_idrefs.push(idref);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Block-level XHTML tags that terminate a text run.
const BLOCK_TAGS: [&[u8]; 11] = [
    b"p", b"div", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"li", b"blockquote", b"section",
];

/// Extract readable text from an XHTML document, inserting paragraph
/// breaks at block boundaries and skipping script/style content.
fn extract_xhtml_text(xml: &[u8]) -> Result<String, PipelineError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"script" || name.as_ref() == b"style" {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"script" || name.as_ref() == b"style" {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if BLOCK_TAGS.contains(&name.as_ref()) && !out.ends_with("\n\n") {
                    out.push_str("\n\n");
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"br" && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if skip_depth == 0 {
                    let piece = t.unescape().unwrap_or_default();
                    let piece = piece.trim();
                    if !piece.is_empty() {
                        if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                            out.push(' ');
                        }
                        out.push_str(piece);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(PipelineError::DocumentLoadFailed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowingConfig;

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = load(Path::new("/tmp/book.mobi"), &WindowingConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn missing_txt_file_fails_load() {
        let err = load(
            Path::new("/tmp/storymind-definitely-missing.txt"),
            &WindowingConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::DocumentLoadFailed(_)));
    }

    #[test]
    fn invalid_pdf_bytes_fail_load() {
        let dir = std::env::temp_dir();
        let path = dir.join("storymind-not-a-pdf.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        let err = load(&path, &WindowingConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::DocumentLoadFailed(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn txt_title_is_filename_stem() {
        let dir = std::env::temp_dir();
        let path = dir.join("HP-PS.txt");
        std::fs::write(&path, "Mr and Mrs Dursley, of number four, Privet Drive.").unwrap();
        let (meta, windows) = load(&path, &WindowingConfig::default()).unwrap();
        assert_eq!(meta.title, "HP-PS");
        assert_eq!(meta.format, SourceFormat::Text);
        assert_eq!(meta.window_count, windows.len());
        assert_eq!(windows.len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn whitespace_only_txt_fails_load() {
        let dir = std::env::temp_dir();
        let path = dir.join("storymind-blank.txt");
        std::fs::write(&path, "   \n\n\t  ").unwrap();
        let err = load(&path, &WindowingConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::DocumentLoadFailed(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn xhtml_text_extraction_inserts_paragraph_breaks() {
        let xml = br#"<html><head><style>p { color: red; }</style></head>
            <body><p>First paragraph.</p><p>Second paragraph.</p></body></html>"#;
        let text = extract_xhtml_text(xml).unwrap();
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second paragraph."));
        assert!(text.contains("\n\n"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn opf_metadata_and_spine_order() {
        let xml = br#"<?xml version="1.0"?>
            <package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/">
              <metadata>
                <dc:title>The Night Circus</dc:title>
                <dc:creator>Erin Morgenstern</dc:creator>
              </metadata>
              <manifest>
                <item id="ch2" href="chapter2.xhtml" media-type="application/xhtml+xml"/>
                <item id="ch1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
              </manifest>
              <spine>
                <itemref idref="ch1"/>
                <itemref idref="ch2"/>
              </spine>
            </package>"#;
        let pkg = parse_opf(xml).unwrap();
        assert_eq!(pkg.title.as_deref(), Some("The Night Circus"));
        assert_eq!(pkg.author.as_deref(), Some("Erin Morgenstern"));
        assert_eq!(pkg.spine_hrefs, vec!["chapter1.xhtml", "chapter2.xhtml"]);
    }
}
