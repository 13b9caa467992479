//! Document loading and chunking. Loaders are synchronous and CPU/IO bound;
//! the ingestion pipeline runs them under `spawn_blocking` with a deadline.

pub mod chunker;

pub use chunker::{ChunkResult, TextChunker};

use anyhow::{anyhow, Context};
use regex::Regex;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Extensions the pipeline accepts, lowercase. Anything else is rejected
/// before a byte is written or read.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "md", "pptx", "html", "ipynb"];

pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

pub fn supported_extensions_list() -> String {
    SUPPORTED_EXTENSIONS.join(", ")
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unsupported file format '{extension}'. Supported formats: {supported}")]
    UnsupportedFormat {
        extension: String,
        supported: String,
    },
    #[error("Document contains no readable text: {path}")]
    EmptyDocument { path: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoadError {
    fn unsupported(extension: &str) -> Self {
        LoadError::UnsupportedFormat {
            extension: extension.to_string(),
            supported: supported_extensions_list(),
        }
    }
}

/// Load a document into text blocks (pages, slides or cells depending on
/// format). Blocks are joined by the chunker later; keeping them separate
/// preserves natural boundaries.
pub fn load_document(path: &Path, extension: &str) -> Result<Vec<String>, LoadError> {
    let ext = extension.to_lowercase();
    if !is_supported_extension(&ext) {
        return Err(LoadError::unsupported(&ext));
    }

    let blocks = match ext.as_str() {
        "txt" | "md" => load_text(path)?,
        "pdf" => load_pdf(path)?,
        "docx" => load_docx(path)?,
        "pptx" => load_pptx(path)?,
        "html" => load_html(path)?,
        "ipynb" => load_notebook(path)?,
        _ => return Err(LoadError::unsupported(&ext)),
    };

    let blocks: Vec<String> = blocks
        .into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect();

    if blocks.is_empty() {
        return Err(LoadError::EmptyDocument {
            path: path.display().to_string(),
        });
    }
    Ok(blocks)
}

fn load_text(path: &Path) -> Result<Vec<String>, LoadError> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(vec![content])
}

fn load_pdf(path: &Path) -> Result<Vec<String>, LoadError> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| anyhow!("Failed to extract PDF text from {}: {}", path.display(), e))?;
    Ok(vec![text])
}

fn read_zip_entry(path: &Path, entry: &str) -> Result<String, LoadError> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("Not a zip archive: {}", path.display()))?;
    let mut xml = String::new();
    archive
        .by_name(entry)
        .map_err(|e| anyhow!("Missing {} in {}: {}", entry, path.display(), e))?
        .read_to_string(&mut xml)
        .with_context(|| format!("Failed to read {} from {}", entry, path.display()))?;
    Ok(xml)
}

fn load_docx(path: &Path) -> Result<Vec<String>, LoadError> {
    let xml = read_zip_entry(path, "word/document.xml")?;
    // Paragraph ends become newlines before tags are stripped.
    let with_breaks = xml.replace("</w:p>", "</w:p>\n");
    Ok(vec![strip_xml_tags(&with_breaks)])
}

fn load_pptx(path: &Path) -> Result<Vec<String>, LoadError> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("Not a zip archive: {}", path.display()))?;

    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|n| n.to_string())
        .collect();
    slide_names.sort();

    let text_run = Regex::new(r"<a:t>([^<]*)</a:t>").map_err(|e| anyhow!(e))?;
    let mut slides = Vec::new();
    for name in slide_names {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|e| anyhow!("Failed to open {}: {}", name, e))?
            .read_to_string(&mut xml)
            .map_err(|e| anyhow!("Failed to read {}: {}", name, e))?;
        let text: Vec<&str> = text_run
            .captures_iter(&xml)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        slides.push(text.join("\n"));
    }
    Ok(slides)
}

fn load_html(path: &Path) -> Result<Vec<String>, LoadError> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let no_scripts = Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
        .map_err(|e| anyhow!(e))?
        .replace_all(&content, " ");
    Ok(vec![strip_xml_tags(&no_scripts)])
}

fn load_notebook(path: &Path) -> Result<Vec<String>, LoadError> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let notebook: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid notebook JSON: {}", path.display()))?;

    let mut blocks = Vec::new();
    if let Some(cells) = notebook["cells"].as_array() {
        for cell in cells {
            let source = match &cell["source"] {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Array(lines) => lines
                    .iter()
                    .filter_map(|l| l.as_str())
                    .collect::<Vec<_>>()
                    .join(""),
                _ => continue,
            };
            if !source.trim().is_empty() {
                blocks.push(source);
            }
        }
    }
    Ok(blocks)
}

/// Remove markup tags and decode the common entities. Good enough for
/// indexing; layout fidelity is not a goal.
fn strip_xml_tags(input: &str) -> String {
    let stripped = Regex::new(r"<[^>]+>")
        .map(|re| re.replace_all(input, " ").to_string())
        .unwrap_or_else(|_| input.to_string());
    let decoded = stripped
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    // Collapse runs of blanks left behind by tag removal.
    let mut out = String::with_capacity(decoded.len());
    let mut last_blank = false;
    for line in decoded.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !last_blank && !out.is_empty() {
                out.push('\n');
            }
            last_blank = true;
        } else {
            let words: Vec<&str> = line.split_whitespace().collect();
            out.push_str(&words.join(" "));
            out.push('\n');
            last_blank = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unsupported_extension_is_rejected_with_the_full_list() {
        let err = load_document(Path::new("/tmp/x.exe"), "exe").unwrap_err();
        match err {
            LoadError::UnsupportedFormat { extension, supported } => {
                assert_eq!(extension, "exe");
                for ext in SUPPORTED_EXTENSIONS {
                    assert!(supported.contains(ext));
                }
            }
            other => panic!("expected UnsupportedFormat, got {:?}", other),
        }
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(is_supported_extension("PDF"));
        assert!(is_supported_extension("Txt"));
        assert!(!is_supported_extension("exe"));
    }

    #[test]
    fn plain_text_loads_as_one_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello world\nsecond line").unwrap();
        let blocks = load_document(&path, "txt").unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].contains("second line"));
    }

    #[test]
    fn empty_text_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "   \n  ").unwrap();
        assert!(matches!(
            load_document(&path, "txt"),
            Err(LoadError::EmptyDocument { .. })
        ));
    }

    #[test]
    fn html_is_stripped_to_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(
            &path,
            "<html><head><style>body{color:red}</style></head>\
             <body><h1>Graph Theory</h1><p>Dijkstra &amp; friends</p>\
             <script>alert(1)</script></body></html>",
        )
        .unwrap();
        let blocks = load_document(&path, "html").unwrap();
        let text = blocks.join("\n");
        assert!(text.contains("Graph Theory"));
        assert!(text.contains("Dijkstra & friends"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
    }

    #[test]
    fn notebook_cells_become_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.ipynb");
        std::fs::write(
            &path,
            r##"{"cells":[
                {"cell_type":"markdown","source":["# Lab 1\n","Sorting"]},
                {"cell_type":"code","source":"print('hi')"},
                {"cell_type":"code","source":[]}
            ]}"##,
        )
        .unwrap();
        let blocks = load_document(&path, "ipynb").unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("Sorting"));
        assert!(blocks[1].contains("print"));
    }

    #[test]
    fn docx_paragraphs_are_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.docx");
        let file = std::fs::File::create(&path).unwrap();
        let mut archive = zip::ZipWriter::new(file);
        archive
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        archive
            .write_all(
                b"<w:document><w:body>\
                  <w:p><w:r><w:t>First paragraph</w:t></w:r></w:p>\
                  <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>\
                  </w:body></w:document>",
            )
            .unwrap();
        archive.finish().unwrap();

        let blocks = load_document(&path, "docx").unwrap();
        let text = blocks.join("\n");
        assert!(text.contains("First paragraph"));
        assert!(text.contains("Second paragraph"));
    }
}
