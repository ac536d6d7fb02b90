//! Bounded content excerpts for oracle requests.

use crate::models::{AssignmentRequest, FileRecord};
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::warn;

fn guess_mime(ext: Option<&str>) -> &'static str {
    match ext.map(str::to_lowercase).as_deref() {
        Some("txt" | "md" | "log" | "csv" | "tsv" | "eml" | "html" | "htm" | "xml") => "text/plain",
        Some("rs" | "py" | "js" | "ts" | "json" | "toml" | "yaml" | "yml" | "ini") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("doc" | "docx") => "application/msword",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

fn is_texty(mime: &str) -> bool {
    mime.starts_with("text/") || mime.contains("json") || mime.contains("yaml")
}

/// First `max_bytes` of a text file as lossy UTF-8, cut on a char boundary.
/// Binary files and files containing NUL bytes give an empty excerpt.
pub fn excerpt(path: &Path, max_bytes: usize) -> std::io::Result<String> {
    let ext = path.extension().and_then(|e| e.to_str());
    if max_bytes == 0 || !is_texty(guess_mime(ext)) {
        return Ok(String::new());
    }
    let file = fs::File::open(path)?;
    let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024));
    file.take(max_bytes as u64).read_to_end(&mut buf)?;
    if buf.contains(&0) {
        return Ok(String::new());
    }
    // Drop a trailing partial UTF-8 sequence left by the byte cut.
    let valid = match std::str::from_utf8(&buf) {
        Ok(_) => buf.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => buf.len(),
    };
    Ok(String::from_utf8_lossy(&buf[..valid]).into_owned())
}

/// Never fails: an unreadable file still gets classified from its path.
pub fn build_request(record: &FileRecord, max_bytes: usize) -> AssignmentRequest {
    let content_excerpt = excerpt(&record.absolute_path, max_bytes).unwrap_or_else(|err| {
        warn!(path = %record.absolute_path.display(), error = %err, "excerpt unavailable");
        String::new()
    });
    AssignmentRequest {
        file_record: record.clone(),
        content_excerpt,
    }
}
