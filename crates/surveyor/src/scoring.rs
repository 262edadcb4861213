//! Distribution-metric point functions.
//!
//! DTEF blueprints score a model's free-form response against an expected
//! demographic response distribution. The response parser accepts three
//! shapes: a bracketed JSON array, a comma-separated number list with
//! optional `%` suffixes, and labelled `a. <option>: <n>%` lines. Both
//! vectors are normalised to sum 1 before the similarity is computed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Floating-point tolerance for similarity comparisons.
pub const SIMILARITY_EPSILON: f64 = 1e-9;

/// Partial credit when a vector parses but has the wrong length.
const LENGTH_MISMATCH_SCORE: f64 = 0.1;

/// Similarity metric selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistributionMetric {
    /// `1 - JSD(p, q)` with log base 2; JSD is bounded [0, 1] and 0 for
    /// identical distributions.
    #[default]
    #[serde(rename = "js-divergence")]
    JsDivergence,
    /// Standard cosine similarity; in [0, 1] for non-negative inputs.
    #[serde(rename = "cosine")]
    Cosine,
    /// `1 - Σ|cumulative difference|` (1-D Wasserstein over normalised
    /// bins), clamped to [0, 1].
    #[serde(rename = "earth-mover")]
    EarthMover,
}

/// Arguments to the distribution-metric point function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionArgs {
    /// Expected distribution, in the survey's original units (usually
    /// percentages).
    pub expected: Vec<f64>,
    /// Similarity metric to apply.
    #[serde(default)]
    pub metric: DistributionMetric,
    /// Advisory pass threshold consumed by downstream grading.
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Outcome of a point function.
///
/// `Scored` carries a similarity in [0, 1]; `FailedToParse` is the
/// zero-score outcome for responses no parser shape matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointOutcome {
    /// The response parsed and was scored.
    Scored {
        /// Similarity in [0, 1].
        score: f64,
        /// Human-readable breakdown including both vectors.
        explain: String,
    },
    /// No numeric vector could be extracted from the response.
    FailedToParse {
        /// Diagnostic for the grading UI.
        explain: String,
    },
}

impl PointOutcome {
    /// The numeric score this outcome contributes (0 for parse failures).
    #[must_use]
    pub fn score(&self) -> f64 {
        match self {
            Self::Scored { score, .. } => *score,
            Self::FailedToParse { .. } => 0.0,
        }
    }
}

fn labelled_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:[A-Za-z]|\d{1,2})[.)]\s*[^:\n]*:\s*(-?\d+(?:\.\d+)?)\s*%?\s*$")
            .unwrap()
    })
}

/// Extract a numeric vector from a model response.
///
/// Tried in order: bracketed JSON array, labelled option lines,
/// comma-separated numbers with optional `%`.
#[must_use]
pub fn parse_distribution(response: &str) -> Option<Vec<f64>> {
    if let Some(values) = parse_json_array(response) {
        return Some(values);
    }

    let labelled: Vec<f64> = labelled_line_regex()
        .captures_iter(response)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect();
    if labelled.len() >= 2 {
        return Some(labelled);
    }

    parse_comma_separated(response)
}

fn parse_json_array(response: &str) -> Option<Vec<f64>> {
    let start = response.find('[')?;
    let end = response[start..].find(']')? + start;
    let body = &response[start..=end];

    if let Ok(values) = serde_json::from_str::<Vec<f64>>(body) {
        return Some(values);
    }
    // Arrays with percent-suffixed entries ("[40%, 60%]") are not valid
    // JSON; retry with the suffixes stripped.
    serde_json::from_str::<Vec<f64>>(&body.replace('%', "")).ok()
}

fn parse_comma_separated(response: &str) -> Option<Vec<f64>> {
    let candidates: Vec<&str> = response
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if candidates.len() < 2 {
        return None;
    }
    let values: Vec<f64> = candidates
        .iter()
        .map(|s| s.trim_end_matches('%').trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    Some(values)
}

/// Normalise a vector to sum 1. Returns `None` for non-positive sums.
fn normalize(values: &[f64]) -> Option<Vec<f64>> {
    let sum: f64 = values.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return None;
    }
    Some(values.iter().map(|v| v / sum).collect())
}

fn kl_term(p: f64, m: f64) -> f64 {
    if p > 0.0 && m > 0.0 {
        p * (p / m).log2()
    } else {
        0.0
    }
}

/// Jensen-Shannon divergence with log base 2; bounded [0, 1].
fn js_divergence(p: &[f64], q: &[f64]) -> f64 {
    let mut left = 0.0;
    let mut right = 0.0;
    for (pi, qi) in p.iter().zip(q) {
        let m = (pi + qi) / 2.0;
        left += kl_term(*pi, m);
        right += kl_term(*qi, m);
    }
    (0.5 * left + 0.5 * right).clamp(0.0, 1.0)
}

fn cosine_similarity(p: &[f64], q: &[f64]) -> f64 {
    let dot: f64 = p.iter().zip(q).map(|(a, b)| a * b).sum();
    let mag_p: f64 = p.iter().map(|a| a * a).sum::<f64>().sqrt();
    let mag_q: f64 = q.iter().map(|a| a * a).sum::<f64>().sqrt();
    if mag_p == 0.0 || mag_q == 0.0 {
        return 0.0;
    }
    (dot / (mag_p * mag_q)).clamp(0.0, 1.0)
}

fn earth_mover_similarity(p: &[f64], q: &[f64]) -> f64 {
    let mut cumulative_diff = 0.0;
    let mut running = 0.0;
    for (pi, qi) in p.iter().zip(q) {
        running += pi - qi;
        cumulative_diff += running.abs();
    }
    (1.0 - cumulative_diff).clamp(0.0, 1.0)
}

/// Score a model response against an expected distribution.
///
/// Contract (in order):
/// 1. unparseable response → [`PointOutcome::FailedToParse`], score 0
/// 2. parsed length ≠ expected length → score 0.1 (credit for attempting)
/// 3. both vectors normalised to sum 1
/// 4. similarity per the selected metric
#[must_use]
pub fn expected_distribution(response: &str, args: &DistributionArgs) -> PointOutcome {
    let Some(predicted) = parse_distribution(response) else {
        return PointOutcome::FailedToParse {
            explain: format!(
                "could not extract a numeric vector from response ({} chars)",
                response.len()
            ),
        };
    };

    if predicted.len() != args.expected.len() {
        return PointOutcome::Scored {
            score: LENGTH_MISMATCH_SCORE,
            explain: format!(
                "parsed {} values but expected {}: predicted={predicted:?} expected={:?}",
                predicted.len(),
                args.expected.len(),
                args.expected
            ),
        };
    }

    let (Some(p), Some(q)) = (normalize(&predicted), normalize(&args.expected)) else {
        return PointOutcome::Scored {
            score: 0.0,
            explain: format!(
                "non-normalisable vector: predicted={predicted:?} expected={:?}",
                args.expected
            ),
        };
    };

    let score = match args.metric {
        DistributionMetric::JsDivergence => 1.0 - js_divergence(&p, &q),
        DistributionMetric::Cosine => cosine_similarity(&p, &q),
        DistributionMetric::EarthMover => earth_mover_similarity(&p, &q),
    };

    PointOutcome::Scored {
        score,
        explain: format!(
            "{:?} similarity {score:.4}: predicted={predicted:?} expected={:?}",
            args.metric, args.expected
        ),
    }
}

/// Arguments for scoring a single option of the distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerOptionArgs {
    /// Expected distribution in percentage points.
    pub expected: Vec<f64>,
    /// Index of the option to score.
    #[serde(alias = "optionIndex")]
    pub option_index: usize,
}

/// Score a single option: `error = |predicted_i − expected_i|`,
/// `tolerance = max(5, expected_i · 0.3)` absolute percentage points,
/// `score = max(0, 1 − error / tolerance)`.
#[must_use]
pub fn per_option_accuracy(response: &str, args: &PerOptionArgs) -> PointOutcome {
    let Some(predicted) = parse_distribution(response) else {
        return PointOutcome::FailedToParse {
            explain: "could not extract a numeric vector from response".to_string(),
        };
    };

    let (Some(expected_i), Some(predicted_i)) = (
        args.expected.get(args.option_index).copied(),
        predicted.get(args.option_index).copied(),
    ) else {
        return PointOutcome::Scored {
            score: 0.0,
            explain: format!(
                "option index {} out of bounds: predicted {} values, expected {}",
                args.option_index,
                predicted.len(),
                args.expected.len()
            ),
        };
    };

    let error = (predicted_i - expected_i).abs();
    let tolerance = (expected_i * 0.3).max(5.0);
    let score = (1.0 - error / tolerance).max(0.0);

    PointOutcome::Scored {
        score,
        explain: format!(
            "option {}: predicted {predicted_i} vs expected {expected_i} (error {error:.2}, tolerance {tolerance:.2})",
            args.option_index
        ),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]
#[cfg(test)]
mod tests {
    use super::*;

    fn args(expected: &[f64], metric: DistributionMetric) -> DistributionArgs {
        DistributionArgs {
            expected: expected.to_vec(),
            metric,
            threshold: None,
        }
    }

    fn scored(outcome: &PointOutcome) -> f64 {
        match outcome {
            PointOutcome::Scored { score, .. } => *score,
            PointOutcome::FailedToParse { explain } => panic!("failed to parse: {explain}"),
        }
    }

    #[test]
    fn parses_bracketed_json_array() {
        assert_eq!(parse_distribution("[50, 50]"), Some(vec![50.0, 50.0]));
        assert_eq!(
            parse_distribution("Here you go: [40.5, 59.5] as requested"),
            Some(vec![40.5, 59.5])
        );
    }

    #[test]
    fn parses_percent_suffixed_arrays() {
        assert_eq!(parse_distribution("[40%, 60%]"), Some(vec![40.0, 60.0]));
    }

    #[test]
    fn parses_comma_separated_numbers() {
        assert_eq!(
            parse_distribution("45.2, 30.1, 15.5%, 9.2"),
            Some(vec![45.2, 30.1, 15.5, 9.2])
        );
    }

    #[test]
    fn parses_labelled_option_lines() {
        let response = "a. Strongly agree: 45%\nb. Agree: 30%\nc. Disagree: 25%";
        assert_eq!(parse_distribution(response), Some(vec![45.0, 30.0, 25.0]));
    }

    #[test]
    fn prose_without_numbers_fails_to_parse() {
        assert_eq!(parse_distribution("I cannot answer that."), None);
        let outcome = expected_distribution(
            "I cannot answer that.",
            &args(&[50.0, 50.0], DistributionMetric::JsDivergence),
        );
        assert!(matches!(outcome, PointOutcome::FailedToParse { .. }));
        assert_eq!(outcome.score(), 0.0);
    }

    #[test]
    fn length_mismatch_gets_partial_credit() {
        let outcome = expected_distribution(
            "[40, 30, 30]",
            &args(&[50.0, 50.0], DistributionMetric::JsDivergence),
        );
        assert_eq!(scored(&outcome), 0.1);
    }

    #[test]
    fn identical_distributions_score_one() {
        for metric in [
            DistributionMetric::JsDivergence,
            DistributionMetric::Cosine,
            DistributionMetric::EarthMover,
        ] {
            let outcome = expected_distribution("[50, 50]", &args(&[50.0, 50.0], metric));
            assert!(
                (scored(&outcome) - 1.0).abs() < SIMILARITY_EPSILON,
                "metric {metric:?} returned {}",
                scored(&outcome)
            );
        }
    }

    #[test]
    fn identical_after_normalisation_scores_one() {
        // [1, 1] and [50, 50] normalise to the same distribution.
        let outcome =
            expected_distribution("[1, 1]", &args(&[50.0, 50.0], DistributionMetric::JsDivergence));
        assert!((scored(&outcome) - 1.0).abs() < SIMILARITY_EPSILON);
    }

    #[test]
    fn disjoint_distributions_score_zero_under_jsd() {
        let outcome = expected_distribution(
            "[0, 100]",
            &args(&[100.0, 0.0], DistributionMetric::JsDivergence),
        );
        assert!(scored(&outcome).abs() < SIMILARITY_EPSILON);
    }

    #[test]
    fn concentrated_miss_is_heavily_penalised_under_jsd() {
        // JSD([1,0], [0.5,0.5]) with log base 2 is ~0.3113.
        let outcome = expected_distribution(
            "[100, 0]",
            &args(&[50.0, 50.0], DistributionMetric::JsDivergence),
        );
        assert!((scored(&outcome) - (1.0 - 0.311_278)).abs() < 1e-4);
    }

    #[test]
    fn earth_mover_on_concentrated_miss() {
        // cumulative diff = |0.5| + |0| = 0.5
        let outcome = expected_distribution(
            "[100, 0]",
            &args(&[50.0, 50.0], DistributionMetric::EarthMover),
        );
        assert!((scored(&outcome) - 0.5).abs() < SIMILARITY_EPSILON);
    }

    #[test]
    fn cosine_on_orthogonal_vectors_is_zero() {
        let outcome =
            expected_distribution("[0, 100]", &args(&[100.0, 0.0], DistributionMetric::Cosine));
        assert!(scored(&outcome).abs() < SIMILARITY_EPSILON);
    }

    #[test]
    fn per_option_accuracy_matches_contract() {
        // expected[0] = 45.2, predicted 40 → error 5.2, tolerance 13.56
        let outcome = per_option_accuracy(
            "[40, 30, 20, 10]",
            &PerOptionArgs {
                expected: vec![45.2, 30.1, 15.5, 9.2],
                option_index: 0,
            },
        );
        let expected_score = 1.0 - 5.2 / 13.56;
        assert!((scored(&outcome) - expected_score).abs() < 1e-6);
    }

    #[test]
    fn per_option_small_expected_uses_floor_tolerance() {
        // expected 2.0 → tolerance floor of 5 points applies
        let outcome = per_option_accuracy(
            "[4, 96]",
            &PerOptionArgs {
                expected: vec![2.0, 98.0],
                option_index: 0,
            },
        );
        assert!((scored(&outcome) - (1.0 - 2.0 / 5.0)).abs() < 1e-9);
    }

    #[test]
    fn per_option_way_off_clamps_to_zero() {
        let outcome = per_option_accuracy(
            "[90, 10]",
            &PerOptionArgs {
                expected: vec![10.0, 90.0],
                option_index: 0,
            },
        );
        assert_eq!(scored(&outcome), 0.0);
    }

    #[test]
    fn metric_selector_deserializes_from_wire_names() {
        let parsed: DistributionMetric = serde_json::from_str("\"earth-mover\"").unwrap();
        assert_eq!(parsed, DistributionMetric::EarthMover);
    }
}
