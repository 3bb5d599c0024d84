//! Detection metrics and token-overlap scoring
//!
//! Streaming, single-pass accumulation: each row is folded once, in input
//! order, into an accumulator that owns its counters exclusively. Rows with
//! missing or malformed gold fields simply skip the corresponding update;
//! nothing here can fail.

use crate::core::{GoldRow, Prediction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Running confusion and task-overlap accumulator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalAccumulator {
    pub count: u64,
    pub true_pos: u64,
    pub false_pos: u64,
    pub false_neg: u64,
    pub true_neg: u64,
    pub task_f1_sum: f64,
    pub task_f1_count: u64,
}

/// Finalized metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub count: u64,
    pub tp: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_count: u64,
    pub tn: u64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub avg_task_f1: Option<f64>,
    pub task_overlap_evaluated: u64,
}

impl EvalAccumulator {
    /// Fold one row into the accumulator.
    ///
    /// The confusion update requires a parseable label; the overlap update
    /// requires a non-empty gold task. A row can contribute to one, both, or
    /// neither, and always bumps `count`.
    pub fn fold(&mut self, prediction: &Prediction, gold: &GoldRow) {
        self.count += 1;

        if let Some(label) = gold.label.as_deref().and_then(parse_label) {
            match (prediction.is_task, label) {
                (true, true) => self.true_pos += 1,
                (true, false) => self.false_pos += 1,
                (false, true) => self.false_neg += 1,
                (false, false) => self.true_neg += 1,
            }
        }

        if let Some(gold_task) = gold
            .gold_task
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            self.task_f1_sum += token_set_f1(&prediction.task, gold_task);
            self.task_f1_count += 1;
        }
    }

    /// Sum another accumulator into this one. Folding is associative and
    /// commutative over independent rows, so merged partials equal a single
    /// sequential pass.
    pub fn merge(&mut self, other: &EvalAccumulator) {
        self.count += other.count;
        self.true_pos += other.true_pos;
        self.false_pos += other.false_pos;
        self.false_neg += other.false_neg;
        self.true_neg += other.true_neg;
        self.task_f1_sum += other.task_f1_sum;
        self.task_f1_count += other.task_f1_count;
    }

    /// Compute the metrics snapshot. Zero denominators yield 0.0 rates; an
    /// absent `avg_task_f1` stays `None`, distinguishable from 0.0.
    pub fn finalize(&self) -> Metrics {
        let precision = ratio(self.true_pos, self.true_pos + self.false_pos);
        let recall = ratio(self.true_pos, self.true_pos + self.false_neg);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        let avg_task_f1 = if self.task_f1_count > 0 {
            Some(self.task_f1_sum / self.task_f1_count as f64)
        } else {
            None
        };

        Metrics {
            count: self.count,
            tp: self.true_pos,
            fp: self.false_pos,
            fn_count: self.false_neg,
            tn: self.true_neg,
            precision,
            recall,
            f1,
            avg_task_f1,
            task_overlap_evaluated: self.task_f1_count,
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

/// Parse a raw label cell into a binary gold label.
///
/// The value must parse as a finite number whose truncation is exactly 0 or
/// 1; anything else counts as "label not provided" and updates no bucket.
pub fn parse_label(raw: &str) -> Option<bool> {
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    match value.trunc() as i64 {
        1 => Some(true),
        0 => Some(false),
        _ => None,
    }
}

/// Tokenize into a lowercase set, treating `/` and `-` as word separators
fn token_set(text: &str) -> HashSet<String> {
    text.replace(['/', '-'], " ")
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

/// Token-set F1 between two strings.
///
/// Both sets empty is a vacuous match (1.0); exactly one empty is a total
/// miss (0.0); otherwise the harmonic mean of set precision and recall.
pub fn token_set_f1(predicted: &str, gold: &str) -> f64 {
    let pred = token_set(predicted);
    let gold = token_set(gold);

    if pred.is_empty() && gold.is_empty() {
        return 1.0;
    }
    if pred.is_empty() || gold.is_empty() {
        return 0.0;
    }

    let intersection = pred.intersection(&gold).count() as f64;
    let precision = intersection / pred.len() as f64;
    let recall = intersection / gold.len() as f64;

    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(is_task: bool, task: &str) -> Prediction {
        Prediction {
            is_task,
            confidence: 0.0,
            task: task.to_string(),
        }
    }

    fn gold(label: Option<&str>, gold_task: Option<&str>) -> GoldRow {
        GoldRow {
            text: String::new(),
            label: label.map(str::to_string),
            gold_task: gold_task.map(str::to_string),
        }
    }

    #[test]
    fn test_token_set_f1_case_insensitive() {
        assert_eq!(token_set_f1("Buy milk", "buy MILK"), 1.0);
    }

    #[test]
    fn test_token_set_f1_empty_cases() {
        assert_eq!(token_set_f1("", "buy milk"), 0.0);
        assert_eq!(token_set_f1("buy milk", ""), 0.0);
        assert_eq!(token_set_f1("", ""), 1.0);
        // Whitespace-only strings tokenize to the empty set too
        assert_eq!(token_set_f1("  ", " \t"), 1.0);
    }

    #[test]
    fn test_token_set_f1_separators() {
        assert_eq!(token_set_f1("follow-up", "follow up"), 1.0);
        assert_eq!(token_set_f1("read docs/readme", "read docs readme"), 1.0);
    }

    #[test]
    fn test_token_set_f1_partial_overlap() {
        // pred {buy, milk}, gold {buy, milk, today}: P=1, R=2/3, F1=0.8
        let f1 = token_set_f1("buy milk", "buy milk today");
        assert!((f1 - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_token_set_f1_duplicates_ignored() {
        assert_eq!(token_set_f1("buy buy milk", "milk buy"), 1.0);
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("1"), Some(true));
        assert_eq!(parse_label("0"), Some(false));
        assert_eq!(parse_label(" 1.0 "), Some(true));
        assert_eq!(parse_label("0.7"), Some(false));
        assert_eq!(parse_label("1.9"), Some(true));
        assert_eq!(parse_label("2"), None);
        assert_eq!(parse_label("-1"), None);
        assert_eq!(parse_label(""), None);
        assert_eq!(parse_label("yes"), None);
        assert_eq!(parse_label("nan"), None);
        assert_eq!(parse_label("inf"), None);
        assert_eq!(parse_label("1e300"), None);
    }

    #[test]
    fn test_confusion_matrix_all_quadrants() {
        let mut acc = EvalAccumulator::default();
        acc.fold(&pred(true, ""), &gold(Some("1"), None));
        acc.fold(&pred(true, ""), &gold(Some("0"), None));
        acc.fold(&pred(false, ""), &gold(Some("1"), None));
        acc.fold(&pred(false, ""), &gold(Some("0"), None));

        let metrics = acc.finalize();
        assert_eq!(metrics.count, 4);
        assert_eq!(metrics.tp, 1);
        assert_eq!(metrics.fp, 1);
        assert_eq!(metrics.fn_count, 1);
        assert_eq!(metrics.tn, 1);
        assert_eq!(metrics.precision, 0.5);
        assert_eq!(metrics.recall, 0.5);
        assert_eq!(metrics.f1, 0.5);
        assert_eq!(metrics.avg_task_f1, None);
        assert_eq!(metrics.task_overlap_evaluated, 0);
    }

    #[test]
    fn test_unlabeled_rows_skip_confusion() {
        let mut acc = EvalAccumulator::default();
        acc.fold(&pred(true, ""), &gold(None, None));
        acc.fold(&pred(true, ""), &gold(Some(""), None));
        acc.fold(&pred(true, ""), &gold(Some("maybe"), None));
        acc.fold(&pred(true, ""), &gold(Some("2"), None));

        let metrics = acc.finalize();
        assert_eq!(metrics.count, 4);
        assert_eq!(metrics.tp + metrics.fp + metrics.fn_count + metrics.tn, 0);
    }

    #[test]
    fn test_empty_gold_task_skips_overlap() {
        let mut acc = EvalAccumulator::default();
        acc.fold(&pred(true, "buy milk"), &gold(None, None));
        acc.fold(&pred(true, "buy milk"), &gold(None, Some("")));
        acc.fold(&pred(true, "buy milk"), &gold(None, Some("   ")));

        assert_eq!(acc.task_f1_count, 0);
        assert_eq!(acc.finalize().avg_task_f1, None);
    }

    #[test]
    fn test_avg_task_f1_is_mean_of_samples() {
        let mut acc = EvalAccumulator::default();
        acc.fold(&pred(true, "buy milk"), &gold(None, Some("buy milk")));
        acc.fold(&pred(true, ""), &gold(None, Some("call mom")));

        let metrics = acc.finalize();
        assert_eq!(metrics.task_overlap_evaluated, 2);
        assert_eq!(metrics.avg_task_f1, Some(0.5));
    }

    #[test]
    fn test_overlap_and_confusion_independent() {
        // Label present, gold task present: both accumulators move
        let mut acc = EvalAccumulator::default();
        acc.fold(&pred(true, "buy milk"), &gold(Some("1"), Some("buy milk")));
        assert_eq!(acc.true_pos, 1);
        assert_eq!(acc.task_f1_count, 1);

        // Label only
        let mut acc = EvalAccumulator::default();
        acc.fold(&pred(false, ""), &gold(Some("0"), None));
        assert_eq!(acc.true_neg, 1);
        assert_eq!(acc.task_f1_count, 0);

        // Gold task only
        let mut acc = EvalAccumulator::default();
        acc.fold(&pred(false, "x"), &gold(None, Some("y")));
        assert_eq!(acc.true_neg + acc.true_pos + acc.false_neg + acc.false_pos, 0);
        assert_eq!(acc.task_f1_count, 1);
    }

    #[test]
    fn test_merge_matches_sequential_fold() {
        let rows = [
            (pred(true, "buy milk"), gold(Some("1"), Some("buy milk"))),
            (pred(false, ""), gold(Some("1"), Some("call mom"))),
            (pred(true, "ship it"), gold(Some("0"), None)),
            (pred(false, ""), gold(None, None)),
        ];

        let mut sequential = EvalAccumulator::default();
        for (p, g) in &rows {
            sequential.fold(p, g);
        }

        let mut left = EvalAccumulator::default();
        let mut right = EvalAccumulator::default();
        for (p, g) in &rows[..2] {
            left.fold(p, g);
        }
        for (p, g) in &rows[2..] {
            right.fold(p, g);
        }
        left.merge(&right);

        assert_eq!(left, sequential);
        assert_eq!(left.finalize(), sequential.finalize());
    }

    #[test]
    fn test_empty_dataset_finalizes_to_zeros() {
        let metrics = EvalAccumulator::default().finalize();
        assert_eq!(metrics.count, 0);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.f1, 0.0);
        assert_eq!(metrics.avg_task_f1, None);
    }

    #[test]
    fn test_metrics_serialization_keys() {
        let metrics = EvalAccumulator::default().finalize();
        let value = serde_json::to_value(&metrics).unwrap();
        assert!(value.get("fn").is_some());
        assert!(value.get("avg_task_f1").unwrap().is_null());
        assert_eq!(value.get("task_overlap_evaluated"), Some(&serde_json::json!(0)));
    }
}
