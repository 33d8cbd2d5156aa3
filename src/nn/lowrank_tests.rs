use super::*;
use crate::autograd::{clear_graph, get_grad, no_grad};

fn diagonal_layer(sigmas: &[f32]) -> LowRankLinear {
    // U = I, V = I, so y = x * diag(σ ⊙ g)
    let r = sigmas.len();
    let mut eye = vec![0.0; r * r];
    for i in 0..r {
        eye[i * r + i] = 1.0;
    }
    LowRankLinear::from_factors(
        Tensor::new(&eye, &[r, r]),
        Tensor::from_slice(sigmas),
        Tensor::new(&eye, &[r, r]),
        None,
    )
}

// ==========================================================================
// FALSIFICATION: rank bookkeeping
// ==========================================================================
#[test]
fn test_capacity_starts_unset() {
    let layer = LowRankLinear::with_seed(6, 4, 3, Some(1));
    assert_eq!(layer.max_rank(), 3);
    assert_eq!(layer.rank_capacity(), None);
    assert_eq!(layer.working_rank(), 3);
    assert_eq!(layer.mask().len(), 3);
}

#[test]
fn test_set_rank_capacity_to_max_keeps_factors() {
    let mut layer = diagonal_layer(&[3.0, 2.0, 1.0]);
    layer.set_rank_capacity(3).expect("capacity within storage");
    assert_eq!(layer.rank_capacity(), Some(3));
    assert_eq!(layer.factors().1.data(), &[3.0, 2.0, 1.0]);
}

#[test]
fn test_set_rank_capacity_truncates_leading() {
    let mut layer = diagonal_layer(&[3.0, 2.0, 1.0]);
    layer.set_rank_capacity(2).expect("capacity within storage");
    assert_eq!(layer.working_rank(), 2);
    assert_eq!(layer.factors().1.data(), &[3.0, 2.0]);
    assert_eq!(layer.mask().len(), 2);
    assert_eq!(layer.max_rank(), 3);
}

#[test]
fn test_set_rank_capacity_beyond_storage_fails() {
    let mut layer = diagonal_layer(&[1.0, 1.0]);
    let err = layer.set_rank_capacity(5).unwrap_err();
    assert!(matches!(
        err,
        PruningError::InvalidRank {
            requested: 5,
            available: 2
        }
    ));
    assert_eq!(layer.rank_capacity(), None);
}

// ==========================================================================
// FALSIFICATION: masking takes effect on the next forward pass
// ==========================================================================
#[test]
fn test_mask_zeroes_component_contribution() {
    let mut layer = diagonal_layer(&[2.0, 3.0]);
    let x = Tensor::new(&[1.0, 1.0], &[1, 2]);
    assert_eq!(layer.forward(&x).data(), &[2.0, 3.0]);

    layer
        .set_mask(RankMask::from(vec![true, false]))
        .expect("mask fits");
    assert_eq!(layer.forward(&x).data(), &[2.0, 0.0]);
    assert_eq!(layer.mask_gate().data(), &[1.0, 0.0]);
    // storage untouched until squeeze
    assert_eq!(layer.factors().1.numel(), 2);
}

#[test]
fn test_set_mask_wrong_length_fails() {
    let mut layer = diagonal_layer(&[2.0, 3.0]);
    let err = layer.set_mask(RankMask::full(3)).unwrap_err();
    assert!(matches!(
        err,
        PruningError::InvalidMask {
            expected: 2,
            got: 3
        }
    ));
    assert_eq!(layer.mask().kept(), 2);
}

// ==========================================================================
// FALSIFICATION: squeeze
// ==========================================================================
#[test]
fn test_squeeze_drops_masked_components() {
    let mut layer = diagonal_layer(&[5.0, 6.0, 7.0]);
    let x = Tensor::new(&[1.0, 1.0, 1.0], &[1, 3]);
    layer
        .set_mask(RankMask::from(vec![false, true, true]))
        .expect("mask fits");
    let masked = layer.forward(&x);

    layer.squeeze_rank_capacity();
    assert_eq!(layer.rank_capacity(), Some(2));
    assert_eq!(layer.factors().1.data(), &[6.0, 7.0]);
    assert_eq!(layer.factors().0.shape(), &[3, 2]);
    assert_eq!(layer.factors().2.shape(), &[2, 3]);
    assert_eq!(layer.mask(), &RankMask::full(2));
    assert!(layer.forward(&x).l2_distance(&masked) < 1e-6);
}

#[test]
fn test_squeeze_to_zero_rank_outputs_bias() {
    let mut layer = LowRankLinear::from_factors(
        Tensor::ones(&[2, 1]),
        Tensor::from_slice(&[4.0]),
        Tensor::ones(&[1, 3]),
        Some(Tensor::from_slice(&[0.5, 1.5, -1.0])),
    );
    layer.set_mask(RankMask::from(vec![false])).expect("mask fits");
    layer.squeeze_rank_capacity();

    assert_eq!(layer.rank_capacity(), Some(0));
    assert_eq!(layer.factor_parameter_count(), 0);
    let out = layer.forward(&Tensor::new(&[9.0, 9.0, 1.0, 1.0], &[2, 2]));
    assert_eq!(out.shape(), &[2, 3]);
    assert_eq!(out.data(), &[0.5, 1.5, -1.0, 0.5, 1.5, -1.0]);
    assert!(layer.component_norms().is_empty());

    let wide = layer.forward_f64(&nalgebra::DMatrix::from_element(2, 2, 9.0));
    assert_eq!((wide.nrows(), wide.ncols()), (2, 3));
    assert_eq!(wide[(1, 1)], 1.5);
}

// ==========================================================================
// FALSIFICATION: the f64 path keeps small components visible
// ==========================================================================
#[test]
fn test_forward_f64_honors_mask() {
    let mut layer = diagonal_layer(&[2.0, 3.0]);
    layer
        .set_mask(RankMask::from(vec![false, true]))
        .expect("mask fits");
    let out = layer.forward_f64(&nalgebra::DMatrix::from_element(1, 2, 1.0));
    assert_eq!((out[(0, 0)], out[(0, 1)]), (0.0, 3.0));
}

#[test]
fn test_forward_f64_resolves_unit_change_under_large_bias() {
    let layer = |sigmas: &[f32]| {
        LowRankLinear::from_factors(
            Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]),
            Tensor::from_slice(sigmas),
            Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]),
            Some(Tensor::from_slice(&[1e8, 1e8])),
        )
    };
    let x = nalgebra::DMatrix::from_element(1, 2, 1.0);
    let full = layer(&[1.0, 3.0]).forward_f64(&x);
    let reduced = layer(&[0.0, 3.0]).forward_f64(&x);
    assert_eq!((&full - &reduced).norm(), 1.0);
}

#[test]
fn test_squeeze_is_persistent_across_masks() {
    let mut layer = diagonal_layer(&[1.0, 2.0, 3.0, 4.0]);
    layer
        .set_mask(RankMask::from(vec![true, false, true, true]))
        .expect("mask fits");
    layer.squeeze_rank_capacity();
    // a full mask of the original length no longer fits
    assert!(layer.set_mask(RankMask::full(4)).is_err());
    assert!(layer.set_mask(RankMask::full(3)).is_ok());
}

// ==========================================================================
// FALSIFICATION: scoring helpers
// ==========================================================================
#[test]
fn test_component_norms() {
    // U[:,0] = (3, 4) → 5, V[0,:] = (1, 0) → 1, σ = 2
    let layer = LowRankLinear::from_factors(
        Tensor::new(&[3.0, 4.0], &[2, 1]),
        Tensor::from_slice(&[2.0]),
        Tensor::new(&[1.0, 0.0], &[1, 2]),
        None,
    );
    assert!((layer.component_norms()[0] - 10.0).abs() < 1e-9);
}

#[test]
fn test_parameter_counts() {
    let layer = LowRankLinear::with_seed(10, 6, 4, Some(3));
    assert_eq!(layer.dense_parameter_count(), 60);
    assert_eq!(layer.factor_parameter_count(), 4 * 17);
    assert_eq!(layer.num_parameters(), 10 * 4 + 4 + 4 * 6 + 6);
}

#[test]
fn test_gate_gradient() {
    clear_graph();
    let mut layer = diagonal_layer(&[2.0, 3.0]);
    layer.track_mask_gradients(true);
    let y = layer.forward(&Tensor::new(&[1.0, 1.0], &[1, 2])).sum();
    y.backward();

    let grad = get_grad(layer.mask_gate().id()).expect("gate gradient");
    assert_eq!(grad.data(), &[2.0, 3.0]);
    layer.track_mask_gradients(false);
    assert!(!layer.mask_gate().requires_grad_enabled());
    clear_graph();
}

#[test]
fn test_capability_discovery() {
    let mut layer = LowRankLinear::with_seed(2, 2, 2, Some(0));
    assert!(layer.as_low_rank().is_some());
    assert!(layer.as_low_rank_mut().is_some());
    let out = no_grad(|| layer.forward(&Tensor::ones(&[1, 2])));
    assert!(!out.requires_grad_enabled());
}
