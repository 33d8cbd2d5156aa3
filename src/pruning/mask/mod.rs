//! Rank masks and the threshold policy that produces them.
//!
//! A [`RankMask`] holds one flag per singular-value component of a
//! low-rank layer: `true` keeps the component, `false` drops it.
//! [`select_masks`] turns per-layer importance scores into masks under
//! either scope.
//!
//! # References
//! - Idelbayev, Y., & Carreira-Perpiñán, M. Á. (2020). Low-rank compression
//!   of neural nets: learning the rank of each layer. CVPR.

mod select;

pub use select::{check_finite, drop_count, select_masks, RankScores};

/// Ordered keep/drop flags, one per rank component.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RankMask {
    keep: Vec<bool>,
}

impl RankMask {
    /// All `len` components kept.
    #[must_use]
    pub fn full(len: usize) -> Self {
        Self {
            keep: vec![true; len],
        }
    }

    /// All components kept except `index`.
    ///
    /// Used for single-component ablation.
    #[must_use]
    pub fn without(len: usize, index: usize) -> Self {
        let mut mask = Self::full(len);
        if let Some(slot) = mask.keep.get_mut(index) {
            *slot = false;
        }
        mask
    }

    /// All components kept except those listed in `dropped`.
    ///
    /// Out-of-range indices are ignored.
    #[must_use]
    pub fn from_dropped(len: usize, dropped: &[usize]) -> Self {
        let mut mask = Self::full(len);
        for &i in dropped {
            if let Some(slot) = mask.keep.get_mut(i) {
                *slot = false;
            }
        }
        mask
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keep.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    /// Whether component `index` is kept. Out of range reads as dropped.
    #[must_use]
    pub fn is_kept(&self, index: usize) -> bool {
        self.keep.get(index).copied().unwrap_or(false)
    }

    /// Number of kept components.
    #[must_use]
    pub fn kept(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        self.len() - self.kept()
    }

    /// Indices of kept components, ascending.
    #[must_use]
    pub fn kept_indices(&self) -> Vec<usize> {
        self.keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect()
    }

    /// The mask truncated to its first `len` entries.
    #[must_use]
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            keep: self.keep.iter().copied().take(len).collect(),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.keep
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.keep.iter().copied()
    }

    /// The mask as a 0/1 gate vector for the forward pass.
    #[must_use]
    pub fn to_gate(&self) -> Vec<f32> {
        self.keep
            .iter()
            .map(|&k| if k { 1.0 } else { 0.0 })
            .collect()
    }
}

impl From<Vec<bool>> for RankMask {
    fn from(keep: Vec<bool>) -> Self {
        Self { keep }
    }
}

impl From<&[bool]> for RankMask {
    fn from(keep: &[bool]) -> Self {
        Self {
            keep: keep.to_vec(),
        }
    }
}
