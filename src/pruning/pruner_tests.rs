use super::*;
use crate::nn::{LowRankLinear, Module, ReLU, Sequential};
use crate::pruning::select_masks;

/// Strategy with preset scores, to exercise the lifecycle alone.
struct FixedScores<'a> {
    base: PrunerBase<'a>,
    scores: RankScores,
}

impl<'a> Pruner<'a> for FixedScores<'a> {
    fn base(&self) -> &PrunerBase<'a> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PrunerBase<'a> {
        &mut self.base
    }

    fn method(&self) -> &'static str {
        "fixed"
    }

    fn compute_masks(&mut self) -> Result<Vec<RankMask>, PruningError> {
        select_masks(&self.scores, self.base.sparsity(), self.base.scope())
    }
}

/// Strategy returning whatever masks it was given.
struct Canned<'a> {
    base: PrunerBase<'a>,
    masks: Vec<RankMask>,
}

impl<'a> Pruner<'a> for Canned<'a> {
    fn base(&self) -> &PrunerBase<'a> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PrunerBase<'a> {
        &mut self.base
    }

    fn method(&self) -> &'static str {
        "canned"
    }

    fn compute_masks(&mut self) -> Result<Vec<RankMask>, PruningError> {
        Ok(self.masks.clone())
    }
}

fn two_layer_model() -> Sequential {
    Sequential::new()
        .add(LowRankLinear::with_seed(6, 5, 4, Some(1)))
        .add(ReLU::new())
        .add(LowRankLinear::with_seed(5, 3, 4, Some(2)))
}

fn capacities(model: &Sequential) -> Vec<Option<usize>> {
    model
        .layers()
        .iter()
        .filter_map(|l| l.as_low_rank().map(|lr| lr.rank_capacity()))
        .collect()
}

// ==========================================================================
// FALSIFICATION: construction validation
// ==========================================================================
#[test]
fn test_sparsity_bounds() {
    let mut model = two_layer_model();
    for bad in [-0.1, 1.1, f64::NAN] {
        let err = PrunerBase::new(&mut model, PruningScope::Local, bad).unwrap_err();
        assert!(matches!(err, PruningError::InvalidSparsity { .. }));
    }
    for good in [0.0, 1.0, 0.5] {
        assert!(PrunerBase::new(&mut model, PruningScope::Global, good).is_ok());
    }
}

#[test]
fn test_discovers_low_rank_layers_in_order() {
    let mut model = two_layer_model();
    let base = PrunerBase::new(&mut model, PruningScope::Global, 0.5).expect("valid");
    assert_eq!(base.low_rank_layers(), &[0, 2]);
    assert_eq!(base.num_layers(), 2);
}

#[test]
fn test_scope_default_and_serde() {
    assert_eq!(PruningScope::default(), PruningScope::Global);
    let json = serde_json::to_string(&PruningScope::Local).expect("serialize");
    assert_eq!(json, "\"local\"");
}

// ==========================================================================
// FALSIFICATION: prune lifecycle
// ==========================================================================
#[test]
fn test_prune_local_scenario() {
    let mut model = Sequential::new().add(LowRankLinear::with_seed(4, 4, 4, Some(0)));
    model.compile();
    let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5).expect("valid");
    let mut pruner = FixedScores {
        base,
        scores: vec![vec![0.1, 0.9, 0.05, 0.5]],
    };
    let result = pruner.prune().expect("prune succeeds");

    assert_eq!(result.layers[0].rank_before, 4);
    assert_eq!(result.layers[0].rank_after, 2);
    assert!((result.rank_sparsity() - 0.5).abs() < 1e-12);
    assert!(!model.is_compiled(), "plan must be invalidated");
    assert_eq!(capacities(&model), vec![Some(2)]);
}

#[test]
fn test_prune_keeps_surviving_components() {
    // σ = [1, 2, 3, 4] with identity factors; scores favour indices 1 and 3.
    let eye: Vec<f32> = (0..16).map(|i| if i % 5 == 0 { 1.0 } else { 0.0 }).collect();
    let mut model = Sequential::new().add(LowRankLinear::from_factors(
        Tensor::new(&eye, &[4, 4]),
        Tensor::from_slice(&[1.0, 2.0, 3.0, 4.0]),
        Tensor::new(&eye, &[4, 4]),
        None,
    ));
    let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5).expect("valid");
    FixedScores {
        base,
        scores: vec![vec![0.1, 0.9, 0.05, 0.5]],
    }
    .prune()
    .expect("prune succeeds");

    let layer = model.layers()[0].as_low_rank().expect("low-rank");
    assert_eq!(layer.factors().1.data(), &[2.0, 4.0]);
    let out = model.forward(&Tensor::ones(&[1, 4]));
    assert_eq!(out.data(), &[0.0, 2.0, 0.0, 4.0]);
}

#[test]
fn test_prune_global_scenario() {
    let mut model = two_layer_model();
    let base = PrunerBase::new(&mut model, PruningScope::Global, 0.25).expect("valid");
    let result = FixedScores {
        base,
        scores: vec![vec![0.1, 0.9, 0.05, 0.5], vec![0.8, 0.2, 0.3, 0.05]],
    }
    .prune()
    .expect("prune succeeds");

    assert_eq!(result.rank_before(), 8);
    assert_eq!(result.rank_after(), 6);
    assert_eq!(
        result
            .layers
            .iter()
            .map(|l| l.model_index)
            .collect::<Vec<_>>(),
        vec![0, 2]
    );
    assert_eq!(capacities(&model), vec![Some(3), Some(3)]);
}

#[test]
fn test_full_sparsity_leaves_zero_rank_layers() {
    let mut model = two_layer_model();
    let base = PrunerBase::new(&mut model, PruningScope::Global, 1.0).expect("valid");
    let result = FixedScores {
        base,
        scores: vec![vec![1.0; 4], vec![1.0; 4]],
    }
    .prune()
    .expect("prune succeeds");

    assert_eq!(result.rank_after(), 0);
    assert!(result.compression_ratio().is_infinite());
    assert!((result.effective_sparsity() - 1.0).abs() < 1e-12);
    assert_eq!(model.forward(&Tensor::ones(&[2, 6])).shape(), &[2, 3]);
}

// ==========================================================================
// FALSIFICATION: structural faults abort before any mutation
// ==========================================================================
#[test]
fn test_mask_count_mismatch() {
    let mut model = two_layer_model();
    let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5).expect("valid");
    let err = Canned {
        base,
        masks: vec![RankMask::from(vec![false, true, true, true])],
    }
    .prune()
    .unwrap_err();

    assert!(matches!(
        err,
        PruningError::MaskCountMismatch {
            expected: 2,
            got: 1
        }
    ));
    for layer in model.layers().iter().filter_map(|l| l.as_low_rank()) {
        assert_eq!(layer.factors().1.numel(), 4);
        assert_eq!(layer.mask().kept(), 4);
    }
}

#[test]
fn test_mask_length_mismatch_in_later_layer_touches_nothing() {
    let mut model = two_layer_model();
    let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5).expect("valid");
    let err = Canned {
        base,
        masks: vec![
            RankMask::from(vec![false, false, true, true]),
            RankMask::full(3),
        ],
    }
    .prune()
    .unwrap_err();

    assert!(matches!(
        err,
        PruningError::MaskLengthMismatch {
            layer: 1,
            expected: 4,
            got: 3
        }
    ));
    // first layer must not have been squeezed
    let first = model.layers()[0].as_low_rank().expect("low-rank");
    assert_eq!(first.factors().1.numel(), 4);
    assert_eq!(first.mask().kept(), 4);
}

// ==========================================================================
// FALSIFICATION: squeeze persists across pruners
// ==========================================================================
#[test]
fn test_second_prune_uses_squeezed_capacity() {
    let mut model = two_layer_model();
    {
        let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5).expect("valid");
        FixedScores {
            base,
            scores: vec![vec![1.0, 2.0, 3.0, 4.0], vec![4.0, 3.0, 2.0, 1.0]],
        }
        .prune()
        .expect("first prune");
    }

    let base = PrunerBase::new(&mut model, PruningScope::Local, 0.5).expect("valid");
    let result = FixedScores {
        base,
        scores: vec![vec![1.0, 2.0], vec![2.0, 1.0]],
    }
    .prune()
    .expect("second prune");

    assert_eq!(result.layers[0].rank_before, 2);
    assert_eq!(result.layers[1].rank_before, 2);
    assert_eq!(result.rank_after(), 2);
}

#[test]
fn test_ablation_scores_restore_full_masks() {
    let mut model = two_layer_model();
    let mut base = PrunerBase::new(&mut model, PruningScope::Local, 0.5).expect("valid");
    base.init_rank_capacities().expect("init");
    let input = Tensor::ones(&[1, 6]);
    let scores = base
        .ablation_scores(|m| m.forward(&input), |a, b| a.l2_distance(b))
        .expect("scores");

    assert_eq!(scores.len(), 2);
    assert!(scores.iter().all(|s| s.len() == 4));
    for k in 0..2 {
        assert_eq!(base.layer(k).expect("layer").mask().kept(), 4);
    }
}

#[test]
fn test_result_json() {
    let result = PruningResult {
        method: "magnitude".to_string(),
        scope: PruningScope::Local,
        sparsity: 0.5,
        layers: vec![LayerReport {
            model_index: 0,
            rank_before: 4,
            rank_after: 2,
            dense_parameters: 100,
            factor_parameters: 42,
        }],
    };
    let json = result.to_json().expect("serialize");
    assert!(json.contains("\"scope\": \"local\""));
    assert!(json.contains("\"rank_after\": 2"));
    assert!((result.effective_sparsity() - 0.58).abs() < 1e-12);
}
