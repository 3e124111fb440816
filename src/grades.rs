use std::collections::BTreeMap;

use crate::config::{CategoryWeights, MissingCategoryPolicy};
use crate::models::{
    ClassAverage, ClassId, ClassSummary, GradeRecord, LearnerAverage, PassRateCount, ScoreEntry,
};

/// Scores partitioned by category, one collection per weighted category.
pub type CategoryScores = BTreeMap<String, Vec<f64>>;

/// Combines category means into a single score using an injected weight table.
#[derive(Debug, Clone, Default)]
pub struct Calculator {
    weights: CategoryWeights,
    policy: MissingCategoryPolicy,
}

impl Calculator {
    pub fn new(weights: CategoryWeights, policy: MissingCategoryPolicy) -> Self {
        Self { weights, policy }
    }

    pub fn weights(&self) -> &CategoryWeights {
        &self.weights
    }

    pub fn policy(&self) -> MissingCategoryPolicy {
        self.policy
    }

    /// Every weighted category is present in the output, possibly empty.
    /// Entries of an unweighted type are dropped.
    pub fn classify<'a, I>(&self, scores: I) -> CategoryScores
    where
        I: IntoIterator<Item = &'a ScoreEntry>,
    {
        let mut classified: CategoryScores = self
            .weights
            .iter()
            .map(|(category, _)| (category.to_string(), Vec::new()))
            .collect();

        for entry in scores {
            if let Some(bucket) = classified.get_mut(&entry.score_type) {
                bucket.push(entry.score);
            }
        }

        classified
    }

    pub fn combine(&self, classified: &CategoryScores) -> f64 {
        let mut total = 0.0;
        let mut present_weight = 0.0;

        for (category, weight) in self.weights.iter() {
            // An empty category has no mean and adds nothing to the sum.
            let Some(category_mean) = classified.get(category).and_then(|scores| mean(scores))
            else {
                continue;
            };
            total += weight * category_mean;
            present_weight += weight;
        }

        match self.policy {
            MissingCategoryPolicy::Zero => total,
            MissingCategoryPolicy::Renormalize if present_weight > 0.0 => total / present_weight,
            MissingCategoryPolicy::Renormalize => 0.0,
        }
    }

    pub fn weighted_average<'a, I>(&self, scores: I) -> f64
    where
        I: IntoIterator<Item = &'a ScoreEntry>,
    {
        self.combine(&self.classify(scores))
    }

    /// Overall weighted average per learner, merging every class they take.
    pub fn learner_averages(&self, records: &[GradeRecord]) -> Vec<LearnerAverage> {
        let mut by_learner: BTreeMap<i64, Vec<&ScoreEntry>> = BTreeMap::new();
        for record in records {
            by_learner
                .entry(record.learner_id)
                .or_default()
                .extend(record.scores.iter());
        }

        by_learner
            .into_iter()
            .map(|(learner_id, scores)| LearnerAverage {
                learner_id,
                average: self.weighted_average(scores),
            })
            .collect()
    }

    /// Counts learners whose overall average is strictly above `threshold`.
    pub fn pass_rate_above(&self, records: &[GradeRecord], threshold: f64) -> PassRateCount {
        let learners_above_threshold = self
            .learner_averages(records)
            .iter()
            .filter(|learner| learner.average > threshold)
            .count();

        PassRateCount {
            learners_above_threshold,
        }
    }

    /// Expects records already filtered to one learner. Yields one entry per
    /// distinct class, ordered by class id.
    pub fn per_class_averages_for_learner(&self, records: &[GradeRecord]) -> Vec<ClassAverage> {
        let mut by_class: BTreeMap<&ClassId, Vec<&ScoreEntry>> = BTreeMap::new();
        for record in records {
            by_class
                .entry(&record.class_id)
                .or_default()
                .extend(record.scores.iter());
        }

        by_class
            .into_iter()
            .map(|(class_id, scores)| ClassAverage {
                class_id: class_id.clone(),
                average: self.weighted_average(scores),
            })
            .collect()
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Unweighted mean of every score in the record, regardless of category.
pub fn entry_mean(record: &GradeRecord) -> Option<f64> {
    let values: Vec<f64> = record.scores.iter().map(|entry| entry.score).collect();
    mean(&values)
}

/// Summarizes the records of `class_id` using the per-entry mean of each
/// record. Records of other classes are skipped. Returns `None` when the
/// class has no records.
pub fn class_summary(
    class_id: &ClassId,
    records: &[GradeRecord],
    threshold: f64,
) -> Option<ClassSummary> {
    let members = records.iter().filter(|record| record.class_id == *class_id);
    summarize(class_id.clone(), members, threshold)
}

/// One summary per class present in `records`, ordered by class id.
pub fn class_summaries(records: &[GradeRecord], threshold: f64) -> Vec<ClassSummary> {
    let mut by_class: BTreeMap<&ClassId, Vec<&GradeRecord>> = BTreeMap::new();
    for record in records {
        by_class.entry(&record.class_id).or_default().push(record);
    }

    by_class
        .into_iter()
        .filter_map(|(class_id, members)| summarize(class_id.clone(), members.into_iter(), threshold))
        .collect()
}

fn summarize<'a, I>(class_id: ClassId, records: I, threshold: f64) -> Option<ClassSummary>
where
    I: Iterator<Item = &'a GradeRecord>,
{
    let mut total_learners = 0usize;
    let mut above_threshold_count = 0usize;

    for record in records {
        total_learners += 1;
        // A record without scores has no mean and never counts as above.
        if entry_mean(record).is_some_and(|average| average > threshold) {
            above_threshold_count += 1;
        }
    }

    if total_learners == 0 {
        return None;
    }

    Some(ClassSummary {
        class_id,
        total_learners,
        above_threshold_count,
        above_threshold_percentage: 100.0 * above_threshold_count as f64 / total_learners as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(score_type: &str, score: f64) -> ScoreEntry {
        ScoreEntry {
            score_type: score_type.to_string(),
            score,
        }
    }

    fn record(learner_id: i64, class_id: i64, scores: Vec<ScoreEntry>) -> GradeRecord {
        GradeRecord {
            learner_id,
            class_id: ClassId::Numeric(class_id),
            scores,
        }
    }

    fn flat(learner_id: i64, class_id: i64, scores: &[f64]) -> GradeRecord {
        record(
            learner_id,
            class_id,
            scores.iter().map(|score| entry("exam", *score)).collect(),
        )
    }

    fn approx(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-9
    }

    #[test]
    fn classify_keeps_multiplicity_and_drops_unknown_types() {
        let calculator = Calculator::default();
        let scores = vec![
            entry("quiz", 60.0),
            entry("exam", 80.0),
            entry("quiz", 70.0),
            entry("essay", 99.0),
        ];

        let classified = calculator.classify(&scores);
        assert_eq!(classified.len(), 3);
        assert_eq!(classified["quiz"], vec![60.0, 70.0]);
        assert_eq!(classified["exam"], vec![80.0]);
        assert!(classified["homework"].is_empty());
        assert!(!classified.contains_key("essay"));
    }

    #[test]
    fn weighted_average_matches_grading_scheme() {
        let calculator = Calculator::default();
        let scores = vec![
            entry("exam", 80.0),
            entry("exam", 90.0),
            entry("quiz", 70.0),
            entry("homework", 100.0),
        ];

        assert!(approx(calculator.weighted_average(&scores), 83.5));
    }

    #[test]
    fn missing_categories_contribute_zero() {
        let calculator = Calculator::default();
        let scores = vec![entry("exam", 64.0), entry("exam", 91.0)];

        assert_eq!(calculator.weighted_average(&scores), 0.5 * mean(&[64.0, 91.0]).unwrap());
        assert_eq!(calculator.weighted_average(&[]), 0.0);
    }

    #[test]
    fn renormalize_policy_rescales_present_weights() {
        let calculator = Calculator::new(CategoryWeights::default(), MissingCategoryPolicy::Renormalize);
        let scores = vec![entry("exam", 80.0), entry("quiz", 60.0)];

        // (0.5 * 80 + 0.3 * 60) / 0.8
        assert!(approx(calculator.weighted_average(&scores), 72.5));
        assert_eq!(calculator.weighted_average(&[entry("essay", 90.0)]), 0.0);
    }

    #[test]
    fn custom_weight_tables_recognize_new_categories() {
        let weights = CategoryWeights::new([("exam", 0.6), ("project", 0.4)]).unwrap();
        let calculator = Calculator::new(weights, MissingCategoryPolicy::Zero);
        let scores = vec![entry("exam", 50.0), entry("project", 100.0), entry("quiz", 10.0)];

        assert!(approx(calculator.weighted_average(&scores), 70.0));
    }

    #[test]
    fn average_stays_in_range_for_in_range_scores() {
        let calculator = Calculator::default();
        let low = vec![entry("exam", 0.0), entry("quiz", 0.0), entry("homework", 0.0)];
        let high = vec![entry("exam", 100.0), entry("quiz", 100.0), entry("homework", 100.0)];

        assert!(approx(calculator.weighted_average(&low), 0.0));
        assert!(approx(calculator.weighted_average(&high), 100.0));
    }

    #[test]
    fn out_of_range_scores_pass_through_unclamped() {
        let calculator = Calculator::default();
        let scores = vec![entry("exam", 150.0), entry("quiz", 150.0), entry("homework", 150.0)];

        assert!(approx(calculator.weighted_average(&scores), 150.0));
    }

    #[test]
    fn pass_rate_is_strictly_above_threshold() {
        let weights = CategoryWeights::new([("exam", 1.0)]).unwrap();
        let calculator = Calculator::new(weights, MissingCategoryPolicy::Zero);
        let records = vec![flat(1, 10, &[70.0]), flat(2, 10, &[70.5]), flat(3, 10, &[40.0])];

        assert_eq!(calculator.pass_rate_above(&records, 70.0).learners_above_threshold, 1);
        assert_eq!(calculator.pass_rate_above(&[], 70.0).learners_above_threshold, 0);
    }

    #[test]
    fn pass_rate_merges_a_learners_classes() {
        let calculator = Calculator::default();
        // Learner 5 is below in class 10 alone but above once class 11 is merged in.
        let records = vec![
            record(5, 10, vec![entry("exam", 60.0), entry("quiz", 80.0), entry("homework", 80.0)]),
            record(5, 11, vec![entry("exam", 100.0)]),
        ];

        let averages = calculator.learner_averages(&records);
        assert_eq!(averages.len(), 1);
        assert!(approx(averages[0].average, 0.5 * 80.0 + 0.3 * 80.0 + 0.2 * 80.0));
        assert_eq!(calculator.pass_rate_above(&records, 70.0).learners_above_threshold, 1);
    }

    #[test]
    fn pass_rate_never_increases_with_threshold() {
        let calculator = Calculator::default();
        let records: Vec<GradeRecord> = (0..20)
            .map(|learner| {
                let base = 40.0 + learner as f64 * 3.0;
                record(
                    learner,
                    1,
                    vec![entry("exam", base), entry("quiz", base + 5.0), entry("homework", 95.0)],
                )
            })
            .collect();

        let mut previous = usize::MAX;
        for step in 0..=20 {
            let threshold = step as f64 * 5.0;
            let count = calculator.pass_rate_above(&records, threshold).learners_above_threshold;
            assert!(count <= previous, "count rose at threshold {threshold}");
            previous = count;
        }
    }

    #[test]
    fn per_class_averages_have_one_entry_per_class() {
        let calculator = Calculator::default();
        let records = vec![
            record(7, 20, vec![entry("exam", 80.0), entry("quiz", 70.0)]),
            record(7, 10, vec![entry("exam", 90.0), entry("quiz", 90.0), entry("homework", 90.0)]),
            record(7, 20, vec![entry("exam", 90.0), entry("homework", 100.0)]),
        ];

        let averages = calculator.per_class_averages_for_learner(&records);
        assert_eq!(averages.len(), 2);
        assert_eq!(averages[0].class_id, ClassId::Numeric(10));
        assert!(approx(averages[0].average, 90.0));
        assert_eq!(averages[1].class_id, ClassId::Numeric(20));
        assert!(approx(averages[1].average, 83.5));
    }

    #[test]
    fn per_class_averages_for_unknown_learner_are_empty() {
        let calculator = Calculator::default();
        assert!(calculator.per_class_averages_for_learner(&[]).is_empty());
    }

    #[test]
    fn class_summary_counts_entry_means_above_threshold() {
        let records = vec![
            flat(1, 339, &[50.0, 70.0]),
            flat(2, 339, &[75.0]),
            flat(3, 339, &[80.0, 80.0]),
        ];

        let summary = class_summary(&ClassId::Numeric(339), &records, 70.0).unwrap();
        assert_eq!(summary.class_id, ClassId::Numeric(339));
        assert_eq!(summary.total_learners, 3);
        assert_eq!(summary.above_threshold_count, 2);
        assert!(approx(summary.above_threshold_percentage, 200.0 / 3.0));
    }

    #[test]
    fn class_summary_ignores_categories() {
        // Weighted this would be 0.5 * 100 = 50; the flat mean is 100.
        let records = vec![record(1, 4, vec![entry("exam", 100.0), entry("essay", 100.0)])];

        let summary = class_summary(&ClassId::Numeric(4), &records, 70.0).unwrap();
        assert_eq!(summary.above_threshold_count, 1);
        assert!(approx(summary.above_threshold_percentage, 100.0));
    }

    #[test]
    fn class_summary_without_records_is_absent() {
        assert_eq!(class_summary(&ClassId::Numeric(339), &[], 70.0), None);
        let other = vec![flat(1, 12, &[90.0])];
        assert_eq!(class_summary(&ClassId::Numeric(339), &other, 70.0), None);
    }

    #[test]
    fn record_without_scores_counts_but_never_passes() {
        let records = vec![flat(1, 2, &[]), flat(2, 2, &[90.0])];

        let summary = class_summary(&ClassId::Numeric(2), &records, 70.0).unwrap();
        assert_eq!(summary.total_learners, 2);
        assert_eq!(summary.above_threshold_count, 1);
        assert!(summary.above_threshold_percentage.is_finite());
        assert!(approx(summary.above_threshold_percentage, 50.0));
    }

    #[test]
    fn class_summary_skips_records_of_other_classes() {
        let records = vec![
            flat(1, 8, &[95.0]),
            flat(2, 9, &[40.0]),
            flat(3, 9, &[85.0]),
        ];

        let summary = class_summary(&ClassId::Numeric(9), &records, 70.0).unwrap();
        assert_eq!(summary.class_id, ClassId::Numeric(9));
        assert_eq!(summary.total_learners, 2);
        assert_eq!(summary.above_threshold_count, 1);
        assert!(approx(summary.above_threshold_percentage, 50.0));
    }

    #[test]
    fn class_summaries_group_by_class() {
        let records = vec![
            flat(1, 2, &[90.0]),
            flat(1, 1, &[40.0]),
            flat(2, 2, &[60.0]),
        ];

        let summaries = class_summaries(&records, 70.0);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].class_id, ClassId::Numeric(1));
        assert_eq!(summaries[0].above_threshold_count, 0);
        assert_eq!(summaries[1].total_learners, 2);
        assert_eq!(summaries[1].above_threshold_count, 1);
    }
}
