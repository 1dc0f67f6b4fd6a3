//! The operator implementations behind every supported [LayerType](crate::param::LayerType).

use ndarray::{ArrayView2, ArrayViewMut2};

macro_rules! layer_base {
    () => {
        fn base(&self) -> &crate::layer::LayerBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut crate::layer::LayerBase {
            &mut self.base
        }
    };
}

pub mod activation;
pub mod affine;
pub mod combine;
pub mod conv;
pub mod convert;
pub mod dense;
pub mod detection_output;
pub mod input;
pub mod meta;
pub mod pooling;
pub mod prior_box;
pub mod region;
pub mod softmax;
pub mod spatial;
pub mod view;
pub mod yolo;

/// Split a shape around `axis` into `(outer, axis size, inner)` element counts.
pub(crate) fn split_shape(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer = shape[..axis].iter().product();
    let inner = shape[axis + 1..].iter().product();
    (outer, shape[axis], inner)
}

/// A row-major matrix view over a flat buffer, the buffer length is checked at reshape time.
pub(crate) fn matrix(data: &[f32], rows: usize, cols: usize) -> ArrayView2<f32> {
    ArrayView2::from_shape((rows, cols), &data[..rows * cols]).expect("matrix size checked at reshape")
}

pub(crate) fn matrix_mut(data: &mut [f32], rows: usize, cols: usize) -> ArrayViewMut2<f32> {
    ArrayViewMut2::from_shape((rows, cols), &mut data[..rows * cols]).expect("matrix size checked at reshape")
}

/// Expand a `[v]`, `[y, x]` or `[top, left, bottom, right]` list into `[top, left, bottom, right]`.
pub(crate) fn expand_pads(pads: &[usize]) -> Option<[usize; 4]> {
    match *pads {
        [] => Some([0; 4]),
        [p] => Some([p; 4]),
        [y, x] => Some([y, x, y, x]),
        [t, l, b, r] => Some([t, l, b, r]),
        _ => None,
    }
}

/// Expand a `[v]` or `[y, x]` list into `(y, x)`, using `default` if empty.
pub(crate) fn expand_pair(values: &[usize], default: usize) -> Option<(usize, usize)> {
    match *values {
        [] => Some((default, default)),
        [v] => Some((v, v)),
        [y, x] => Some((y, x)),
        _ => None,
    }
}
