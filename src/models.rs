use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Class identifiers arrive either as numbers or as section names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum ClassId {
    Numeric(i64),
    Named(String),
}

impl FromStr for ClassId {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidIdentifier(value.to_string()));
        }

        Ok(match trimmed.parse::<i64>() {
            Ok(number) => ClassId::Numeric(number),
            Err(_) => ClassId::Named(trimmed.to_string()),
        })
    }
}

/// Text ids go through `FromStr`, so `"12"` and `12` load as the same class.
impl<'de> Deserialize<'de> for ClassId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawClassId {
            Number(i64),
            Text(String),
        }

        match RawClassId::deserialize(deserializer)? {
            RawClassId::Number(number) => Ok(ClassId::Numeric(number)),
            RawClassId::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassId::Numeric(number) => write!(f, "{number}"),
            ClassId::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoreEntry {
    #[serde(rename = "type")]
    pub score_type: String,
    pub score: f64,
}

/// One learner's enrollment in one class.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GradeRecord {
    pub learner_id: i64,
    pub class_id: ClassId,
    #[serde(default)]
    pub scores: Vec<ScoreEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnerAverage {
    pub learner_id: i64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassAverage {
    pub class_id: ClassId,
    pub average: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassRateCount {
    pub learners_above_threshold: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    pub class_id: ClassId,
    pub total_learners: usize,
    pub above_threshold_count: usize,
    pub above_threshold_percentage: f64,
}
