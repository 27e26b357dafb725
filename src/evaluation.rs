//! Scoring a predicted IC50 against the measured one.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Overestimate,
    Underestimate,
    Exact,
}

/// Fold-error metrics for one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// max(pred/true, true/pred), always >= 1
    pub fold_error: f64,
    pub log10_ratio: f64,
    pub within_2_fold: bool,
    pub within_3_fold: bool,
    pub direction: Direction,
}

/// Compare `pred` with `truth`; both must be strictly positive.
pub fn evaluate(pred: f64, truth: f64) -> Result<Evaluation> {
    if !(pred > 0.0 && pred.is_finite()) {
        return Err(Error::InvalidArgument(format!(
            "predicted IC50 must be positive, got {}",
            pred
        )));
    }
    if !(truth > 0.0 && truth.is_finite()) {
        return Err(Error::InvalidArgument(format!(
            "true IC50 must be positive, got {}",
            truth
        )));
    }

    let ratio = pred / truth;
    let fold_error = ratio.max(1.0 / ratio);
    let direction = if pred > truth {
        Direction::Overestimate
    } else if pred < truth {
        Direction::Underestimate
    } else {
        Direction::Exact
    };

    Ok(Evaluation {
        fold_error,
        log10_ratio: ratio.log10(),
        within_2_fold: fold_error <= 2.0,
        within_3_fold: fold_error <= 3.0,
        direction,
    })
}
