use std::str::FromStr;

use clap::ValueEnum;

use crate::error::ConfigError;

pub const DEFAULT_THRESHOLD: f64 = 70.0;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Ordered category weight table. Categories missing from the table are
/// not recognized and their scores are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryWeights {
    entries: Vec<(String, f64)>,
}

impl CategoryWeights {
    pub fn new<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut validated: Vec<(String, f64)> = Vec::new();

        for (category, weight) in entries {
            let category = category.into();
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight { category, weight });
            }
            if validated.iter().any(|(existing, _)| *existing == category) {
                return Err(ConfigError::DuplicateCategory(category));
            }
            validated.push((category, weight));
        }

        if validated.is_empty() {
            return Err(ConfigError::EmptyWeights);
        }

        let total: f64 = validated.iter().map(|(_, weight)| weight).sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(total));
        }

        Ok(Self { entries: validated })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .map(|(name, weight)| (name.as_str(), *weight))
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            entries: vec![
                ("exam".to_string(), 0.5),
                ("quiz".to_string(), 0.3),
                ("homework".to_string(), 0.2),
            ],
        }
    }
}

impl FromStr for CategoryWeights {
    type Err = ConfigError;

    /// Parses `exam=0.5,quiz=0.3,homework=0.2`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();

        for part in value.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let (category, weight) = part
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedWeight(part.to_string()))?;
            let category = category.trim();
            if category.is_empty() {
                return Err(ConfigError::MalformedWeight(part.to_string()));
            }
            let weight: f64 = weight
                .trim()
                .parse()
                .map_err(|_| ConfigError::MalformedWeight(part.to_string()))?;
            entries.push((category.to_string(), weight));
        }

        Self::new(entries)
    }
}

/// How an absent category affects the combined score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MissingCategoryPolicy {
    /// The absent category's term is zero; the other weights are unchanged.
    #[default]
    Zero,
    /// Weights are rescaled over the categories that have scores.
    Renormalize,
}
