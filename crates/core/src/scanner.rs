//! Walks a source root and yields file records in a stable order.

use crate::error::{FingerprintError, ScanError};
use crate::fingerprint::Fingerprinter;
use crate::models::FileRecord;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub exclude: Vec<String>,
    pub include_hidden: bool,
    /// Directories never descended into (state directory, output root).
    pub skip_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub extension: Option<String>,
}

/// An entry the walk could not read. Reported, never fatal.
#[derive(Debug, Clone)]
pub struct ScanIssue {
    pub path: Option<PathBuf>,
    pub message: String,
}

#[derive(Debug)]
pub enum ScanEvent {
    Record(FileRecord),
    FingerprintFailed {
        file: ScannedFile,
        error: FingerprintError,
    },
    Issue(ScanIssue),
}

#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    excludes: GlobSet,
    include_hidden: bool,
    skip_dirs: Vec<PathBuf>,
}

impl Scanner {
    pub fn new(root: &Path, opts: &ScanOptions) -> Result<Self, ScanError> {
        if !root.exists() {
            return Err(ScanError::RootMissing(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }
        fs::read_dir(root).map_err(|source| ScanError::Untraversable {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            excludes: build_globset(&opts.exclude)?,
            include_hidden: opts.include_hidden,
            skip_dirs: opts.skip_dirs.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walks the tree. Each call starts a fresh walk, sorted by file
    /// name so repeated scans of an unchanged tree yield the same order.
    pub fn entries(&self) -> impl Iterator<Item = Result<ScannedFile, ScanIssue>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| e.depth() == 0 || self.should_descend(e.path()))
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(err) => {
                        let path = err.path().map(Path::to_path_buf);
                        warn!(path = ?path, error = %err, "skipping unreadable entry");
                        return Some(Err(ScanIssue {
                            path,
                            message: err.to_string(),
                        }));
                    }
                };
                let file_type = entry.file_type();
                if file_type.is_symlink() {
                    debug!(path = %entry.path().display(), "skipping symlink");
                    return None;
                }
                if !file_type.is_file() {
                    return None;
                }
                let path = entry.path();
                let meta = match entry.metadata() {
                    Ok(m) => m,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "cannot stat file");
                        return Some(Err(ScanIssue {
                            path: Some(path.to_path_buf()),
                            message: err.to_string(),
                        }));
                    }
                };
                Some(Ok(ScannedFile {
                    path: path.to_path_buf(),
                    size: meta.len(),
                    modified: meta.modified().ok().map(DateTime::<Utc>::from),
                    extension: path
                        .extension()
                        .and_then(|s| s.to_str())
                        .map(|s| s.to_lowercase()),
                }))
            })
    }

    /// Scanned files with their fingerprints attached.
    pub fn records<'a>(
        &'a self,
        fingerprinter: &'a Fingerprinter,
    ) -> impl Iterator<Item = ScanEvent> + 'a {
        self.entries().map(move |entry| match entry {
            Err(issue) => ScanEvent::Issue(issue),
            Ok(file) => match fingerprinter.fingerprint(&file.path) {
                Ok(fp) => ScanEvent::Record(FileRecord {
                    absolute_path: file.path,
                    size_bytes: file.size,
                    modified_time: file.modified,
                    content_fingerprint: fp,
                    extension: file.extension,
                }),
                Err(error) => {
                    warn!(path = %file.path.display(), error = %error, "fingerprint failed");
                    ScanEvent::FingerprintFailed { file, error }
                }
            },
        })
    }

    fn should_descend(&self, path: &Path) -> bool {
        if self.skip_dirs.iter().any(|d| path == d) {
            return false;
        }
        if !self.include_hidden && is_hidden(path) {
            return false;
        }
        !self.is_excluded(path)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.excludes.is_match(path) {
            return true;
        }
        path.strip_prefix(&self.root)
            .map(|rel| self.excludes.is_match(rel))
            .unwrap_or(false)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let pattern_err = |pattern: &str, err: globset::Error| ScanError::Pattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    };
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat).map_err(|e| pattern_err(pat, e))?);
    }
    builder.build().map_err(|e| pattern_err("<set>", e))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(scanner: &Scanner) -> Vec<String> {
        scanner
            .entries()
            .filter_map(Result::ok)
            .map(|f| {
                f.path
                    .strip_prefix(scanner.root())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn missing_root_is_a_scan_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = Scanner::new(&temp.path().join("absent"), &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, ScanError::RootMissing(_)));
    }

    #[test]
    fn file_root_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();
        let err = Scanner::new(&file, &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }

    #[test]
    fn skips_hidden_excluded_and_state_dirs_in_stable_order() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join("state")).unwrap();
        std::fs::write(root.join("b/two.txt"), "2").unwrap();
        std::fs::write(root.join("a.txt"), "1").unwrap();
        std::fs::write(root.join(".hidden"), "h").unwrap();
        std::fs::write(root.join(".git/config"), "g").unwrap();
        std::fs::write(root.join("state/state.db"), "s").unwrap();
        std::fs::write(root.join("scratch.tmp"), "t").unwrap();

        let scanner = Scanner::new(
            root,
            &ScanOptions {
                exclude: vec!["*.tmp".into()],
                include_hidden: false,
                skip_dirs: vec![root.join("state")],
            },
        )
        .unwrap();

        let first = names(&scanner);
        assert_eq!(first, vec!["a.txt", "b/two.txt"]);
        // Restartable: a second walk yields the same sequence.
        assert_eq!(names(&scanner), first);
    }

    #[test]
    fn include_hidden_walks_dot_entries() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(".env"), "x").unwrap();
        let scanner = Scanner::new(
            temp.path(),
            &ScanOptions {
                include_hidden: true,
                ..ScanOptions::default()
            },
        )
        .unwrap();
        assert_eq!(names(&scanner), vec![".env"]);
    }

    #[test]
    fn bad_pattern_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let err = Scanner::new(
            temp.path(),
            &ScanOptions {
                exclude: vec!["a[".into()],
                ..ScanOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Pattern { .. }));
    }

    #[test]
    fn records_carry_fingerprints() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("Report.PDF"), "pdf").unwrap();
        let scanner = Scanner::new(temp.path(), &ScanOptions::default()).unwrap();
        let fp = Fingerprinter::default();
        let events: Vec<_> = scanner.records(&fp).collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ScanEvent::Record(r) => {
                assert_eq!(r.extension.as_deref(), Some("pdf"));
                assert_eq!(r.size_bytes, 3);
                assert!(r.content_fingerprint.as_str().starts_with("b3:"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink(temp.path().join("real.txt"), temp.path().join("link.txt"))
            .unwrap();
        let scanner = Scanner::new(temp.path(), &ScanOptions::default()).unwrap();
        assert_eq!(names(&scanner), vec!["real.txt"]);
    }
}
