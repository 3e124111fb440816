use std::path::Path;

use anyhow::Context;

use crate::models::{ClassId, GradeRecord};

/// Which records a command aggregates over.
#[derive(Debug, Clone)]
pub enum RecordFilter {
    All,
    Learner(i64),
    Class(ClassId),
}

impl RecordFilter {
    pub fn matches(&self, record: &GradeRecord) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::Learner(learner_id) => record.learner_id == *learner_id,
            RecordFilter::Class(class_id) => record.class_id == *class_id,
        }
    }
}

/// Reads a JSON array of grade documents.
pub fn load(path: &Path) -> anyhow::Result<Vec<GradeRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let records: Vec<GradeRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
    tracing::debug!(path = %path.display(), records = records.len(), "loaded snapshot");
    Ok(records)
}

pub fn select(records: &[GradeRecord], filter: &RecordFilter) -> Vec<GradeRecord> {
    records
        .iter()
        .filter(|record| filter.matches(record))
        .cloned()
        .collect()
}
