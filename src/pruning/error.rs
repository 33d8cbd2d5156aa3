//! Pruning-specific error types.
//!
//! Every fault surfaces synchronously from the call that detected it.
//! Nothing is retried: squeezing is irreversible, so a blind retry of
//! `prune()` would compound the damage.

use thiserror::Error;

/// Pruning operation errors with enough context to diagnose the caller.
#[derive(Debug, Error)]
pub enum PruningError {
    /// Sparsity target outside the closed interval [0, 1], or NaN.
    #[error("Invalid sparsity value {value}: {constraint}")]
    InvalidSparsity {
        /// Provided value
        value: f64,
        /// Constraint description
        constraint: String,
    },

    /// A scorer needs calibration data (inputs, targets, or a loss) that
    /// was not supplied. Raised before any layer is touched.
    #[error("Method '{method}' requires calibration data but none was provided: {requirement}")]
    CalibrationRequired {
        /// Scoring method
        method: String,
        /// What is missing
        requirement: String,
    },

    /// A strategy produced a different number of masks than there are
    /// low-rank layers.
    #[error("Mask count mismatch: expected {expected} masks (one per low-rank layer), got {got}")]
    MaskCountMismatch { expected: usize, got: usize },

    /// A mask's length differs from its layer's rank capacity.
    #[error("Mask length mismatch for low-rank layer {layer}: rank capacity is {expected}, mask has {got} entries")]
    MaskLengthMismatch {
        /// Position among the low-rank layers
        layer: usize,
        expected: usize,
        got: usize,
    },

    /// A mask handed directly to a layer does not fit it.
    #[error("Invalid mask: layer holds {expected} components, mask has {got} entries")]
    InvalidMask { expected: usize, got: usize },

    /// A model layer recorded as low-rank no longer exposes the capability.
    #[error("Model layer {index} is not a low-rank layer")]
    MissingLayer { index: usize },

    /// Requested rank capacity exceeds the components the layer stores.
    #[error("Invalid rank capacity {requested}: layer stores only {available} components")]
    InvalidRank { requested: usize, available: usize },

    /// NaN/Inf in computed scores.
    #[error("Numerical instability in {method}: {details}")]
    NumericalInstability {
        /// Method that detected the instability
        method: String,
        /// What was detected
        details: String,
    },

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration document could not be parsed.
    #[error("Invalid pruning configuration: {0}")]
    Config(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // FALSIFICATION: messages carry the context needed to act on them
    // ==========================================================================
    #[test]
    fn test_invalid_sparsity_shows_value_and_constraint() {
        let err = PruningError::InvalidSparsity {
            value: 1.5,
            constraint: "must be between 0.0 and 1.0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1.5"), "FALSIFIED: must show value");
        assert!(
            msg.contains("0.0") && msg.contains("1.0"),
            "FALSIFIED: must show constraint"
        );
    }

    #[test]
    fn test_calibration_required_names_method() {
        let err = PruningError::CalibrationRequired {
            method: "alignment".to_string(),
            requirement: "reference input batch".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alignment"));
        assert!(msg.to_lowercase().contains("calibration"));
        assert!(msg.contains("reference input batch"));
    }

    #[test]
    fn test_mask_mismatch_messages() {
        let count = PruningError::MaskCountMismatch {
            expected: 3,
            got: 2,
        };
        assert!(count.to_string().contains("expected 3"));

        let length = PruningError::MaskLengthMismatch {
            layer: 1,
            expected: 8,
            got: 4,
        };
        let msg = length.to_string();
        assert!(msg.contains("layer 1") && msg.contains('8') && msg.contains('4'));
    }

    #[test]
    fn test_invalid_rank_message() {
        let err = PruningError::InvalidRank {
            requested: 9,
            available: 4,
        };
        assert!(err.to_string().contains("only 4"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
        let err: PruningError = io.into();
        assert!(matches!(err, PruningError::Io(_)));
        assert!(err.to_string().contains("missing.json"));
    }

    #[test]
    fn test_error_implements_std_error() {
        fn assert_error<T: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<PruningError>();
    }
}
