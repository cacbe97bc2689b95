//! Text extraction for device manuals (PDF, DOCX, plain text).
//!
//! Manuals are read from disk and turned into UTF-8 text before chunking.
//! The format is chosen by file extension. Trailing whitespace is trimmed so
//! page padding does not become an extra chunk.

use std::io::Read;
use std::path::Path;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Document formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            "txt" | "md" | "text" => Some(DocumentKind::PlainText),
            _ => None,
        }
    }
}

/// Extraction error. Never panics on bad input.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Io(std::io::Error),
    Pdf(String),
    Docx(String),
    NotUtf8,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(p) => write!(f, "unsupported document format: {}", p),
            ExtractError::Io(e) => write!(f, "failed to read document: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
            ExtractError::NotUtf8 => write!(f, "text document is not valid UTF-8"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract text from in-memory document bytes.
pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    let text = match kind {
        DocumentKind::Pdf => extract_pdf(bytes)?,
        DocumentKind::Docx => extract_docx(bytes)?,
        DocumentKind::PlainText => {
            String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::NotUtf8)?
        }
    };
    Ok(text.trim_end().to_string())
}

/// Read and extract a manual from disk on the blocking pool.
pub async fn extract_file(path: &Path) -> anyhow::Result<String> {
    let kind = DocumentKind::from_path(path)
        .ok_or_else(|| ExtractError::UnsupportedFormat(path.display().to_string()))?;
    let path = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || {
        let bytes = std::fs::read(&path).map_err(ExtractError::Io)?;
        extract_text(&bytes, kind)
    })
    .await??;
    Ok(text)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraph_text(&doc_xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
