//! Destination path templates.
//!
//! A template is a `/`-separated pattern with `{field}` placeholders, e.g.
//! `{category}/{case_number}/{doc_type}`. `{{` and `}}` produce literal braces.
//! `{file_name}`, `{stem}` and `{ext}` always come from the source file.
//!
//! A template names the file itself when it uses `{file_name}` or `{stem}`, or
//! when its last component holds a placeholder together with an extension
//! (`{suggested_name}.{ext}`, `{title}.pdf`). Otherwise the original file name
//! is appended as the last component.

use crate::config::TemplateConfig;
use crate::error::TemplateResolutionError;
use crate::models::{Assignment, FileRecord};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

const BUILTIN_FIELDS: &[&str] = &["file_name", "stem", "ext"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    name: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(name: &str, source: &str) -> Result<Self, TemplateResolutionError> {
        let err = |message: String| TemplateResolutionError::Parse {
            template: name.to_string(),
            message,
        };
        if source.trim().is_empty() {
            return Err(err("template is empty".into()));
        }
        if source.starts_with('/') || source.starts_with('\\') {
            return Err(err("template must be relative".into()));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(err(format!("unclosed placeholder after '{field}'")))
                            }
                            Some(ch) => field.push(ch),
                        }
                    }
                    let field = field.trim().to_string();
                    if field.is_empty() {
                        return Err(err("empty placeholder".into()));
                    }
                    if !field
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
                    {
                        return Err(err(format!("invalid placeholder name '{field}'")));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => return Err(err("unmatched '}'".into())),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        for seg in &segments {
            if let Segment::Literal(text) = seg {
                if text.split(is_separator).any(|part| part == "..") {
                    return Err(err("'..' is not allowed in templates".into()));
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            segments,
        })
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(f) => Some(f.as_str()),
            Segment::Literal(_) => None,
        })
    }

    fn names_file(&self) -> bool {
        if self.placeholders().any(|p| p == "file_name" || p == "stem") {
            return true;
        }
        let mut has_field = false;
        let mut has_dot = false;
        for seg in self.segments.iter().rev() {
            match seg {
                Segment::Field(_) => has_field = true,
                Segment::Literal(text) => {
                    let tail = text.rsplit(is_separator).next().unwrap_or("");
                    has_dot |= tail.contains('.');
                    if tail.len() != text.len() {
                        break;
                    }
                }
            }
        }
        has_field && has_dot
    }

    /// Renders against `fields`. Every placeholder must resolve to a non-empty,
    /// sanitized value.
    pub fn render(&self, fields: &BTreeMap<String, String>) -> Result<PathBuf, TemplateResolutionError> {
        let mut rendered = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Field(field) => {
                    let value = fields
                        .get(field)
                        .map(|v| sanitize_component(v))
                        .filter(|v| !v.is_empty() && v != "." && v != "..")
                        .ok_or_else(|| TemplateResolutionError::MissingField {
                            template: self.name.clone(),
                            field: field.clone(),
                        })?;
                    rendered.push_str(&value);
                }
            }
        }

        let path: PathBuf = rendered
            .split(is_separator)
            .map(str::trim)
            .filter(|part| !part.is_empty() && *part != ".")
            .collect();
        if path.as_os_str().is_empty() {
            return Err(TemplateResolutionError::EmptyPath {
                template: self.name.clone(),
            });
        }
        Ok(path)
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Makes an oracle-provided value safe to use as one path component.
pub fn sanitize_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Chooses a template by the assignment's category and renders the
/// destination relative to the output root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    default: PathTemplate,
    by_category: HashMap<String, PathTemplate>,
    category_field: String,
}

impl PathResolver {
    pub fn from_config(
        cfg: &TemplateConfig,
        category_field: &str,
    ) -> Result<Self, TemplateResolutionError> {
        let default = PathTemplate::parse("default", &cfg.default)?;
        let mut by_category = HashMap::new();
        for (category, source) in &cfg.by_category {
            by_category.insert(category.to_lowercase(), PathTemplate::parse(category, source)?);
        }
        Ok(Self {
            default,
            by_category,
            category_field: category_field.to_string(),
        })
    }

    pub fn template_for(&self, fields: &BTreeMap<String, String>) -> &PathTemplate {
        fields
            .get(&self.category_field)
            .and_then(|c| self.by_category.get(&c.trim().to_lowercase()))
            .unwrap_or(&self.default)
    }

    pub fn resolve(&self, assignment: &Assignment) -> Result<PathBuf, TemplateResolutionError> {
        let template = self.template_for(&assignment.proposed_fields);
        let mut fields = assignment.proposed_fields.clone();
        for (key, value) in builtin_fields(&assignment.file_record) {
            fields.insert(key.to_string(), value);
        }
        let mut path = template.render(&fields)?;
        if !template.names_file() {
            path.push(sanitize_component(&assignment.file_record.file_name()));
        }
        Ok(path)
    }
}

fn builtin_fields(record: &FileRecord) -> Vec<(&'static str, String)> {
    let stem = record
        .absolute_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = record.extension.clone().unwrap_or_default();
    BUILTIN_FIELDS
        .iter()
        .map(|&name| {
            let value = match name {
                "file_name" => record.file_name(),
                "stem" => stem.clone(),
                _ => ext.clone(),
            };
            (name, value)
        })
        .collect()
}
