use std::fmt::{Debug, Formatter};
use std::io::Write;

use itertools::Itertools;
use ndarray::{ArrayD, ErrorKind, IxDyn, ShapeError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    F32,
    I32,
}

/// A multi-dimensional buffer owned by the tensor table.
///
/// The arrays are always kept in standard (row-major, contiguous) layout,
/// so layers can work on the flat data directly.
#[derive(Clone, PartialEq)]
pub enum Tensor {
    F32(ArrayD<f32>),
    I32(ArrayD<i32>),
}

impl Tensor {
    /// A rank-1 f32 tensor without elements, the state of every tensor right after linking.
    pub fn empty() -> Tensor {
        Tensor::F32(ArrayD::zeros(IxDyn(&[0])))
    }

    pub fn zeros(dtype: DType, shape: &[usize]) -> Tensor {
        match dtype {
            DType::F32 => Tensor::F32(ArrayD::zeros(IxDyn(shape))),
            DType::I32 => Tensor::I32(ArrayD::zeros(IxDyn(shape))),
        }
    }

    pub fn from_f32(shape: &[usize], data: Vec<f32>) -> Result<Tensor, ShapeError> {
        Ok(Tensor::F32(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    pub fn from_i32(shape: &[usize], data: Vec<i32>) -> Result<Tensor, ShapeError> {
        Ok(Tensor::I32(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    /// A rank-1 i32 tensor holding the given values, used for shape vectors.
    pub fn i32_vector(values: &[i32]) -> Tensor {
        Tensor::I32(ArrayD::from_shape_fn(IxDyn(&[values.len()]), |i| values[i[0]]))
    }

    pub fn dtype(&self) -> DType {
        match self {
            Tensor::F32(_) => DType::F32,
            Tensor::I32(_) => DType::I32,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::F32(array) => array.shape(),
            Tensor::I32(array) => array.shape(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    /// The size of the given axis, negative axes count from the back.
    pub fn axis(&self, axis: isize) -> Option<usize> {
        let index = resolve_axis(axis, self.rank())?;
        Some(self.shape()[index])
    }

    /// Change the shape, keeping the element type.
    /// The payload is kept if the element count stays the same, otherwise it is truncated or zero-extended.
    ///
    /// Fails without touching the tensor if the element count does not fit in memory.
    pub fn reshape(&mut self, shape: &[usize]) -> Result<(), ShapeError> {
        checked_size(shape)?;
        match self {
            Tensor::F32(array) => resize(array, shape),
            Tensor::I32(array) => resize(array, shape),
        }
        Ok(())
    }

    /// Change the shape and element type, the payload is only kept if the element type does not change.
    pub fn reshape_as(&mut self, dtype: DType, shape: &[usize]) -> Result<(), ShapeError> {
        if self.dtype() == dtype {
            self.reshape(shape)
        } else {
            checked_size(shape)?;
            *self = Tensor::zeros(dtype, shape);
            Ok(())
        }
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Tensor::F32(array) => Some(array),
            Tensor::I32(_) => None,
        }
    }

    pub fn as_i32(&self) -> Option<&ArrayD<i32>> {
        match self {
            Tensor::F32(_) => None,
            Tensor::I32(array) => Some(array),
        }
    }

    /// The f32 payload, the element type must have been checked at reshape time.
    pub fn f32(&self) -> &ArrayD<f32> {
        match self {
            Tensor::F32(array) => array,
            Tensor::I32(_) => panic!("Expected f32 tensor, got {:?}", self),
        }
    }

    pub fn f32_mut(&mut self) -> &mut ArrayD<f32> {
        match self {
            Tensor::F32(array) => array,
            Tensor::I32(array) => panic!("Expected f32 tensor, got i32 tensor of shape {:?}", array.shape()),
        }
    }

    pub fn i32(&self) -> &ArrayD<i32> {
        match self {
            Tensor::F32(_) => panic!("Expected i32 tensor, got {:?}", self),
            Tensor::I32(array) => array,
        }
    }

    pub fn f32_data(&self) -> &[f32] {
        contiguous(self.f32())
    }

    pub fn f32_data_mut(&mut self) -> &mut [f32] {
        contiguous_mut(self.f32_mut())
    }

    pub fn i32_data(&self) -> &[i32] {
        contiguous(self.i32())
    }

    /// Copy shape, element type and payload from `other`, reusing the existing allocation where possible.
    pub fn copy_from(&mut self, other: &Tensor) {
        match (self, other) {
            (Tensor::F32(dst), Tensor::F32(src)) => dst.clone_from(src),
            (Tensor::I32(dst), Tensor::I32(src)) => dst.clone_from(src),
            (dst, src) => *dst = src.clone(),
        }
    }

    /// Copy the flat payload of `other`, keeping the current shape.
    /// Both tensors must have the same element type and element count.
    pub fn copy_data_from(&mut self, other: &Tensor) {
        match (self, other) {
            (Tensor::F32(dst), Tensor::F32(src)) => contiguous_mut(dst).copy_from_slice(contiguous(src)),
            (Tensor::I32(dst), Tensor::I32(src)) => contiguous_mut(dst).copy_from_slice(contiguous(src)),
            (dst, src) => panic!("Cannot copy data from {:?} into {:?}", src, dst),
        }
    }

    /// Replace the payload with `array`, reusing the existing allocation if the shape already matches.
    pub fn set_f32(&mut self, array: ArrayD<f32>) {
        match self {
            Tensor::F32(dst) if dst.shape() == array.shape() => dst.assign(&array),
            _ => *self = Tensor::F32(array),
        }
    }

    /// Write a human readable dump of this tensor, printing at most `limit` values.
    pub fn debug_print(&self, f: &mut dyn Write, name: &str, limit: usize) -> std::io::Result<()> {
        let values = match self {
            Tensor::F32(array) => array.iter().take(limit).map(|x| format!("{:.4}", x)).collect_vec(),
            Tensor::I32(array) => array.iter().take(limit).map(|x| x.to_string()).collect_vec(),
        };
        let ellipsis = if self.size() > limit { " ..." } else { "" };
        writeln!(
            f,
            "{} {:?} {:?}: {}{}",
            name,
            self.dtype(),
            self.shape(),
            values.join(" "),
            ellipsis
        )
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor::empty()
    }
}

impl Debug for Tensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tensor({:?}, {:?})", self.dtype(), self.shape())
    }
}

/// Map a possibly negative axis to an index, `None` if out of bounds.
pub fn resolve_axis(axis: isize, rank: usize) -> Option<usize> {
    let rank = rank as isize;
    let index = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&index).then_some(index as usize)
}

/// The largest element count a tensor may have, both element types are 4 bytes wide.
pub const MAX_ELEMENTS: usize = isize::MAX as usize / 4;

/// The element count of `shape`, or an overflow error if it exceeds [MAX_ELEMENTS].
pub fn checked_size(shape: &[usize]) -> Result<usize, ShapeError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .filter(|&size| size <= MAX_ELEMENTS)
        .ok_or_else(|| ShapeError::from_kind(ErrorKind::Overflow))
}

fn resize<T: Clone + Default>(array: &mut ArrayD<T>, shape: &[usize]) {
    if array.shape() == shape {
        return;
    }

    let old = std::mem::replace(array, ArrayD::from_elem(IxDyn(&[0]), T::default()));
    let mut data = old.into_raw_vec();
    data.resize(shape.iter().product(), T::default());

    *array = ArrayD::from_shape_vec(IxDyn(shape), data).unwrap_or_else(|_| ArrayD::from_elem(IxDyn(shape), T::default()));
}

fn contiguous<T>(array: &ArrayD<T>) -> &[T] {
    array
        .as_slice_memory_order()
        .unwrap_or_else(|| panic!("Tensor storage must be contiguous"))
}

fn contiguous_mut<T>(array: &mut ArrayD<T>) -> &mut [T] {
    array
        .as_slice_memory_order_mut()
        .unwrap_or_else(|| panic!("Tensor storage must be contiguous"))
}
