use std::fmt::Write;

use chrono::NaiveDate;

use crate::config::MissingCategoryPolicy;
use crate::grades::{self, Calculator};
use crate::models::{ClassId, GradeRecord, LearnerAverage};

const TOP_LEARNERS: usize = 10;

/// Learners ordered by overall average, highest first.
pub fn rank_learners(calculator: &Calculator, records: &[GradeRecord]) -> Vec<LearnerAverage> {
    let mut averages = calculator.learner_averages(records);
    averages.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.learner_id.cmp(&b.learner_id))
    });
    averages
}

pub fn build_report(
    class_id: Option<&ClassId>,
    threshold: f64,
    generated_on: NaiveDate,
    calculator: &Calculator,
    records: &[GradeRecord],
) -> String {
    let pass_rate = calculator.pass_rate_above(records, threshold);
    let summaries = grades::class_summaries(records, threshold);
    let ranked = rank_learners(calculator, records);

    let mut output = String::new();
    let scope_label = class_id
        .map(|class_id| format!("class {class_id}"))
        .unwrap_or_else(|| "all classes".to_string());
    let weights_label = calculator
        .weights()
        .iter()
        .map(|(category, weight)| format!("{category} {:.0}%", weight * 100.0))
        .collect::<Vec<_>>()
        .join(", ");
    let policy_label = match calculator.policy() {
        MissingCategoryPolicy::Zero => "missing categories count as zero",
        MissingCategoryPolicy::Renormalize => "weights renormalized over present categories",
    };

    let _ = writeln!(output, "# Grade Aggregates Report");
    let _ = writeln!(
        output,
        "Generated for {} on {} (threshold {:.1})",
        scope_label, generated_on, threshold
    );
    let _ = writeln!(output, "Weights: {} ({})", weights_label, policy_label);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Pass Rate");
    let _ = writeln!(
        output,
        "{} of {} learners have a weighted average above {:.1}.",
        pass_rate.learners_above_threshold,
        ranked.len(),
        threshold
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Class Summaries");

    if summaries.is_empty() {
        let _ = writeln!(output, "No grade records for this scope.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- class {}: {} of {} learners above threshold ({:.2}%)",
                summary.class_id,
                summary.above_threshold_count,
                summary.total_learners,
                summary.above_threshold_percentage
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Weighted Averages");

    if ranked.is_empty() {
        let _ = writeln!(output, "No learners for this scope.");
    } else {
        for learner in ranked.iter().take(TOP_LEARNERS) {
            let _ = writeln!(
                output,
                "- learner {}: {:.2}",
                learner.learner_id, learner.average
            );
        }
    }

    output
}
