//! Keyword and extension based oracle. Deterministic and offline.

use crate::{ClassificationOracle, OracleError, OracleRequest, OracleResponse};
use std::collections::BTreeMap;
use std::path::Path;

/// Confidence assigned when only the extension identified the file.
const EXTENSION_CONFIDENCE: f32 = 0.85;
/// Confidence assigned when a filename or excerpt keyword matched.
const KEYWORD_CONFIDENCE: f32 = 0.95;
/// Confidence for files nothing recognised.
const FALLBACK_CONFIDENCE: f32 = 0.3;

const KEYWORDS: &[(&str, &str, &str)] = &[
    ("invoice", "finance", "invoice"),
    ("receipt", "finance", "receipt"),
    ("statement", "finance", "statement"),
    ("contract", "legal", "contract"),
    ("agreement", "legal", "contract"),
    ("resume", "personal", "resume"),
];

#[derive(Debug, Default, Clone)]
pub struct HeuristicOracle;

impl HeuristicOracle {
    fn classify_one(&self, req: &OracleRequest) -> OracleResponse {
        let path = Path::new(&req.path);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_lowercase();

        let mut fields = BTreeMap::new();
        if let Some((keyword, category, doc_type)) = keyword_label(&name, &req.excerpt) {
            fields.insert("category".to_string(), category.to_string());
            fields.insert("doc_type".to_string(), doc_type.to_string());
            return OracleResponse {
                index: None,
                fields,
                confidence: KEYWORD_CONFIDENCE,
                rationale: format!("matched keyword '{keyword}'"),
            };
        }

        match extension_label(&ext) {
            Some((category, doc_type)) => {
                fields.insert("category".to_string(), category.to_string());
                fields.insert("doc_type".to_string(), doc_type.to_string());
                OracleResponse {
                    index: None,
                    fields,
                    confidence: EXTENSION_CONFIDENCE,
                    rationale: format!("extension '.{ext}'"),
                }
            }
            None => {
                fields.insert("category".to_string(), "misc".to_string());
                fields.insert("doc_type".to_string(), "unknown".to_string());
                OracleResponse {
                    index: None,
                    fields,
                    confidence: FALLBACK_CONFIDENCE,
                    rationale: "no heuristic matched".to_string(),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ClassificationOracle for HeuristicOracle {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn classify(&self, batch: &[OracleRequest]) -> Result<Vec<OracleResponse>, OracleError> {
        Ok(batch.iter().map(|req| self.classify_one(req)).collect())
    }
}

fn keyword_label(name: &str, excerpt: &str) -> Option<(&'static str, &'static str, &'static str)> {
    let excerpt = excerpt.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(kw, _, _)| name.contains(kw))
        .or_else(|| KEYWORDS.iter().find(|(kw, _, _)| excerpt.contains(kw)))
        .copied()
}

fn extension_label(ext: &str) -> Option<(&'static str, &'static str)> {
    let label = match ext {
        "pdf" => ("documents", "pdf"),
        "doc" | "docx" | "odt" | "rtf" => ("documents", "word"),
        "xls" | "xlsx" | "ods" | "csv" => ("documents", "spreadsheet"),
        "ppt" | "pptx" | "odp" => ("documents", "presentation"),
        "txt" | "md" => ("documents", "text"),
        "jpg" | "jpeg" | "png" | "gif" | "heic" | "webp" => ("images", "photo"),
        "mp3" | "flac" | "wav" | "ogg" => ("audio", "track"),
        "mp4" | "mov" | "mkv" | "avi" => ("video", "clip"),
        "zip" | "rar" | "7z" | "tar" | "gz" => ("archives", "archive"),
        _ => return None,
    };
    Some(label)
}
