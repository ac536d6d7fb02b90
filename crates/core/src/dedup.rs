//! Byte-identical duplicate detection.
//!
//! Files are grouped by fingerprint in scan order. The first member is the
//! canonical one and is the only member the oracle sees; the rest inherit its
//! outcome through [`Deduplicator::resolve_duplicates`].

use crate::models::{DecisionAction, FileRecord, Fingerprint, PlacementDecision};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    pub canonical: FileRecord,
    pub duplicates: Vec<FileRecord>,
}

impl DuplicateGroup {
    pub fn members(&self) -> impl Iterator<Item = &FileRecord> {
        std::iter::once(&self.canonical).chain(self.duplicates.iter())
    }

    pub fn len(&self) -> usize {
        1 + self.duplicates.len()
    }
}

pub struct Deduplicator;

impl Deduplicator {
    /// Groups records by fingerprint, preserving first-occurrence order for
    /// both the groups and their members.
    pub fn group(records: Vec<FileRecord>) -> Vec<DuplicateGroup> {
        let mut index: HashMap<Fingerprint, usize> = HashMap::new();
        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for record in records {
            match index.get(&record.content_fingerprint) {
                Some(&i) => groups[i].duplicates.push(record),
                None => {
                    index.insert(record.content_fingerprint.clone(), groups.len());
                    groups.push(DuplicateGroup {
                        fingerprint: record.content_fingerprint.clone(),
                        canonical: record,
                        duplicates: Vec::new(),
                    });
                }
            }
        }
        groups
    }

    /// Decisions for the non-canonical members given the canonical's decision.
    pub fn resolve_duplicates(
        duplicates: &[FileRecord],
        canonical: &PlacementDecision,
    ) -> Vec<PlacementDecision> {
        duplicates
            .iter()
            .map(|record| Self::inherit(record, canonical))
            .collect()
    }

    pub fn inherit(record: &FileRecord, canonical: &PlacementDecision) -> PlacementDecision {
        let run_id = canonical.run_id.as_str();
        match canonical.action {
            DecisionAction::Move => {
                let target = canonical
                    .destination_path
                    .clone()
                    .unwrap_or_else(|| canonical.source_path.clone());
                PlacementDecision::duplicate(record, target, canonical.confidence).for_run(run_id)
            }
            DecisionAction::SkipDuplicate => {
                let target = canonical
                    .duplicate_of
                    .clone()
                    .unwrap_or_else(|| canonical.source_path.clone());
                PlacementDecision::duplicate(record, target, canonical.confidence).for_run(run_id)
            }
            DecisionAction::SkipLowConfidence | DecisionAction::SkipError => {
                let mut d = canonical.clone();
                d.source_path = record.absolute_path.clone();
                d.destination_path = None;
                d.decided_at = chrono::Utc::now();
                d
            }
        }
    }
}
