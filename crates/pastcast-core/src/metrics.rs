//! Scoring functions for probability forecasts against binary outcomes.
//!
//! All metrics reject empty input and length-mismatched input with a
//! validation error; there is no well-defined mean of nothing.

use std::sync::Arc;

use crate::error::{PastcastError, Result};
use crate::registry::MetricRegistry;

/// Threshold used by the registered `accuracy` metric.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

pub const BRIER_SCORE: &str = "brier_score";
pub const ACCURACY: &str = "accuracy";

fn check_inputs(predictions: &[f64], outcomes: &[f64]) -> Result<()> {
    if predictions.len() != outcomes.len() {
        return Err(PastcastError::Validation(format!(
            "predictions and outcomes must have the same length ({} vs {})",
            predictions.len(),
            outcomes.len()
        )));
    }
    if predictions.is_empty() {
        return Err(PastcastError::Validation(
            "cannot score an empty set of predictions".into(),
        ));
    }
    Ok(())
}

/// Mean squared error between predictions and outcomes.
///
/// 0 is perfect, 1 is worst.
pub fn brier_score(predictions: &[f64], outcomes: &[f64]) -> Result<f64> {
    check_inputs(predictions, outcomes)?;
    let total: f64 = predictions
        .iter()
        .zip(outcomes)
        .map(|(p, o)| (p - o).powi(2))
        .sum();
    Ok(total / predictions.len() as f64)
}

/// Fraction of predictions whose thresholded label matches the outcome.
///
/// A prediction `p` is labelled 1 when `p >= threshold`.
pub fn accuracy(predictions: &[f64], outcomes: &[f64], threshold: f64) -> Result<f64> {
    check_inputs(predictions, outcomes)?;
    let correct = predictions
        .iter()
        .zip(outcomes)
        .filter(|(p, o)| {
            let label = if **p >= threshold { 1.0 } else { 0.0 };
            label == **o
        })
        .count();
    Ok(correct as f64 / predictions.len() as f64)
}

/// Register `brier_score` and `accuracy` (threshold 0.5).
pub fn register_builtin(registry: &MetricRegistry) -> Result<()> {
    registry.register(BRIER_SCORE, Arc::new(brier_score))?;
    registry.register(
        ACCURACY,
        Arc::new(|p: &[f64], o: &[f64]| accuracy(p, o, DEFAULT_THRESHOLD)),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn brier_perfect_and_worst() {
        assert_eq!(brier_score(&[1.0], &[1.0]).unwrap(), 0.0);
        assert_eq!(brier_score(&[1.0], &[0.0]).unwrap(), 1.0);
    }

    #[test]
    fn brier_coin_flip() {
        assert_eq!(brier_score(&[0.5, 0.5], &[1.0, 0.0]).unwrap(), 0.25);
    }

    #[test]
    fn brier_mixed() {
        let score = brier_score(&[0.8, 0.2, 0.5], &[1.0, 0.0, 1.0]).unwrap();
        assert!((score - 0.11).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn accuracy_threshold() {
        assert_eq!(accuracy(&[0.6, 0.4], &[1.0, 0.0], 0.5).unwrap(), 1.0);
        // 0.5 sits on the threshold and counts as a "yes".
        assert_eq!(accuracy(&[0.5], &[1.0], 0.5).unwrap(), 1.0);
        assert_eq!(accuracy(&[0.6, 0.4], &[1.0, 0.0], 0.7).unwrap(), 0.5);
    }

    #[test]
    fn length_mismatch_is_validation_error() {
        assert!(brier_score(&[0.1, 0.2], &[1.0]).unwrap_err().is_validation());
        assert!(accuracy(&[0.1], &[], 0.5).unwrap_err().is_validation());
    }

    #[test]
    fn empty_input_is_validation_error() {
        assert!(brier_score(&[], &[]).unwrap_err().is_validation());
        assert!(accuracy(&[], &[], 0.5).unwrap_err().is_validation());
    }

    #[test]
    fn registered_metrics_score_by_name() {
        let registry: MetricRegistry = Registry::new("metric");
        register_builtin(&registry).unwrap();
        assert_eq!(registry.names(), vec![ACCURACY, BRIER_SCORE]);
        let acc = registry.get(ACCURACY).unwrap();
        assert_eq!(acc.score(&[0.6, 0.4], &[1.0, 0.0]).unwrap(), 1.0);
        assert!(register_builtin(&registry).is_err());
    }
}
