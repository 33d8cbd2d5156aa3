//! Serializable pruning configuration.
//!
//! A run is fully described by method, scope and sparsity. Unknown method
//! or scope names are rejected at parse time; every field falls back to its
//! default when omitted.
//!
//! ```json
//! { "method": "alignment_gradient", "scope": "local", "sparsity": 0.3 }
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::alignment::AlignmentPruner;
use super::alignment_gradient::GradientAlignmentPruner;
use super::alignment_loss::LossAlignmentPruner;
use super::error::PruningError;
use super::magnitude::MagnitudePruner;
use super::pruner::{validate_sparsity, Batch, Pruner, PrunerBase, PruningScope};
use crate::nn::{Loss, Model};

/// Scoring strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningMethod {
    /// Frobenius norm of each component. Data-free.
    Magnitude,
    /// Output perturbation on an all-ones input.
    #[default]
    Alignment,
    /// Loss change on a calibration batch.
    AlignmentLoss,
    /// Mask-gate gradient magnitude on a calibration batch.
    AlignmentGradient,
}

impl PruningMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Magnitude => "magnitude",
            Self::Alignment => "alignment",
            Self::AlignmentLoss => "alignment_loss",
            Self::AlignmentGradient => "alignment_gradient",
        }
    }

    /// Whether the method needs targets and a loss in addition to inputs.
    #[must_use]
    pub fn needs_loss(self) -> bool {
        matches!(self, Self::AlignmentLoss | Self::AlignmentGradient)
    }
}

impl fmt::Display for PruningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method, scope and sparsity for one pruning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruningConfig {
    pub method: PruningMethod,
    pub scope: PruningScope,
    pub sparsity: f64,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            method: PruningMethod::default(),
            scope: PruningScope::default(),
            sparsity: 0.5,
        }
    }
}

impl PruningConfig {
    #[must_use]
    pub fn new(method: PruningMethod, scope: PruningScope, sparsity: f64) -> Self {
        Self {
            method,
            scope,
            sparsity,
        }
    }

    /// # Errors
    ///
    /// `InvalidSparsity` if the sparsity lies outside [0, 1].
    pub fn validate(&self) -> Result<(), PruningError> {
        validate_sparsity(self.sparsity)
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// `Config` for malformed JSON or unknown names, `InvalidSparsity` for
    /// an out-of-range target.
    pub fn from_json_str(json: &str) -> Result<Self, PruningError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as
    /// [`PruningConfig::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PruningError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        debug!(path = %path.display(), method = %config.method, "loaded pruning config");
        Ok(config)
    }

    /// # Errors
    ///
    /// `Config` if serialization fails.
    pub fn to_json(&self) -> Result<String, PruningError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build the configured pruner over `model`.
    ///
    /// Calibration requirements are checked when the pruner runs, not here.
    ///
    /// # Errors
    ///
    /// `InvalidSparsity` if the sparsity lies outside [0, 1].
    pub fn build<'a>(
        &self,
        model: &'a mut dyn Model,
        data: Option<Batch>,
        loss: Option<Arc<dyn Loss>>,
    ) -> Result<Box<dyn Pruner<'a> + 'a>, PruningError> {
        let mut base = PrunerBase::new(model, self.scope, self.sparsity)?;
        if let Some(batch) = data {
            base = base.with_data(batch);
        }
        if let Some(loss) = loss {
            base = base.with_shared_loss(loss);
        }

        Ok(match self.method {
            PruningMethod::Magnitude => Box::new(MagnitudePruner::new(base)),
            PruningMethod::Alignment => Box::new(AlignmentPruner::new(base)),
            PruningMethod::AlignmentLoss => Box::new(LossAlignmentPruner::new(base)),
            PruningMethod::AlignmentGradient => Box::new(GradientAlignmentPruner::new(base)),
        })
    }
}
