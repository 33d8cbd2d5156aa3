//! Double-precision forward helpers.
//!
//! Output-perturbation scoring subtracts two nearly equal model outputs.
//! In f32 a large activation (a big bias, say) absorbs a small component's
//! contribution before the subtraction happens, so those passes run on
//! `DMatrix<f64>` instead. Rows are examples, columns are features.

use nalgebra::DMatrix;

use crate::autograd::Tensor;

/// Row-major copy of a matrix.
pub(crate) fn row_major(x: &DMatrix<f64>) -> Vec<f64> {
    x.transpose().iter().copied().collect()
}

/// Widen a row-major tensor into a `rows × cols` matrix.
///
/// # Panics
///
/// Panics if the tensor does not hold `rows × cols` elements.
pub(crate) fn widen(tensor: &Tensor, rows: usize, cols: usize) -> DMatrix<f64> {
    assert_eq!(
        tensor.numel(),
        rows * cols,
        "cannot view {:?} as [{rows}, {cols}]",
        tensor.shape()
    );
    let data: Vec<f64> = tensor.data().iter().map(|&v| f64::from(v)).collect();
    DMatrix::from_row_slice(rows, cols, &data)
}

/// Widen a tensor of any shape, keeping its first dimension as rows.
pub(crate) fn widen_batch(tensor: &Tensor) -> DMatrix<f64> {
    let rows = tensor.shape().first().copied().unwrap_or(1).max(1);
    widen(tensor, rows, tensor.numel() / rows)
}

/// Regroup `x` into rows of `features` columns, like `flatten_batch`.
pub(crate) fn flatten_rows(x: &DMatrix<f64>, features: usize) -> DMatrix<f64> {
    if x.ncols() == features {
        return x.clone();
    }
    if features == 0 {
        return DMatrix::zeros(x.nrows(), 0);
    }
    DMatrix::from_row_slice(x.len() / features, features, &row_major(x))
}

/// Add a per-column bias to every row.
pub(crate) fn add_bias(out: &mut DMatrix<f64>, bias: Option<&Tensor>) {
    if let Some(b) = bias {
        for mut row in out.row_iter_mut() {
            for (o, &v) in row.iter_mut().zip(b.data()) {
                *o += f64::from(v);
            }
        }
    }
}
