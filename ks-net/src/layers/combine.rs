use itertools::Itertools;

use crate::layer::{Layer, LayerBase};
use crate::layers::split_shape;
use crate::param::{EltwiseOperation, LayerType};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::DType;

/// Combines equally shaped sources elementwise. `Shortcut` is a plain two-way sum.
#[derive(Debug)]
pub struct EltwiseLayer {
    base: LayerBase,
    operation: EltwiseOperation,
    coefficients: Vec<f32>,
}

impl EltwiseLayer {
    pub fn new(base: LayerBase, ty: LayerType) -> Self {
        let (operation, coefficients) = match ty {
            LayerType::Shortcut => (EltwiseOperation::Sum, vec![]),
            _ => (base.param.eltwise.operation, base.param.eltwise.coefficients.clone()),
        };
        EltwiseLayer {
            base,
            operation,
            coefficients,
        }
    }
}

impl Layer for EltwiseLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, None, Some(1))?;
        if io.src_len() < 2 {
            return Err(self.base.error("expected at least two sources"));
        }
        if !self.coefficients.is_empty() {
            if self.operation != EltwiseOperation::Sum {
                return Err(self.base.error("coefficients are only supported for sums"));
            }
            if self.coefficients.len() != io.src_len() {
                return Err(self.base.error(format!(
                    "got {} coefficients for {} sources",
                    self.coefficients.len(),
                    io.src_len()
                )));
            }
        }
        if self.coefficients.is_empty() {
            self.coefficients = vec![1.0; io.src_len()];
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let shape = io.src(0).shape().to_vec();
        for (i, src) in io.srcs().into_iter().enumerate() {
            self.base.require_dtype(src, DType::F32, "input")?;
            if src.shape() != shape {
                return Err(self.base.shape_error(format!("source {} is {:?}, expected shape {:?}", i, src, shape)));
            }
        }
        if !io.is_in_place(0) {
            self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        }
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let operation = self.operation;
        let coefficients = &self.coefficients;

        io.compute(0, |srcs, out| {
            let out = out.f32_data_mut();
            let first = srcs[0].f32_data();
            match operation {
                EltwiseOperation::Sum => out.iter_mut().zip(first).for_each(|(y, &x)| *y = coefficients[0] * x),
                _ => out.copy_from_slice(first),
            }

            for (src, &coefficient) in srcs[1..].iter().zip(&coefficients[1..]) {
                let data = src.f32_data();
                for (y, &x) in out.iter_mut().zip(data) {
                    *y = match operation {
                        EltwiseOperation::Sum => *y + coefficient * x,
                        EltwiseOperation::Product => *y * x,
                        EltwiseOperation::Max => y.max(x),
                    };
                }
            }
        });
    }
}

/// Concatenation along an axis.
#[derive(Debug)]
pub struct ConcatLayer {
    base: LayerBase,
    axis: usize,
}

impl ConcatLayer {
    pub fn new(base: LayerBase) -> Self {
        let axis = base.param.concat.axis;
        ConcatLayer { base, axis }
    }
}

impl Layer for ConcatLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, None, Some(1))?;
        self.base.forbid_in_place(io)
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let first = io.src(0);
        self.base.require_dtype(first, DType::F32, "input")?;
        let dtype = first.dtype();
        let mut shape = first.shape().to_vec();
        if self.axis >= shape.len() {
            return Err(self.base.shape_error(format!("axis {} out of range for {:?}", self.axis, first)));
        }

        shape[self.axis] = 0;
        for src in io.srcs() {
            self.base.require_dtype(src, dtype, "input")?;
            let matches = src.rank() == shape.len()
                && (0..shape.len()).all(|a| a == self.axis || src.shape()[a] == shape[a]);
            if !matches {
                return Err(self.base.shape_error(format!("cannot concatenate {:?} along axis {}", src, self.axis)));
            }
            shape[self.axis] += src.shape()[self.axis];
        }

        self.base.reshape_dst(io, 0, dtype, &shape)?;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let axis = self.axis;
        io.compute(0, |srcs, out| {
            let (outer, _, inner) = split_shape(out.shape(), axis);
            let sizes = srcs.iter().map(|s| s.shape()[axis] * inner).collect_vec();
            let row = sizes.iter().sum::<usize>();

            let out = out.f32_data_mut();
            for o in 0..outer {
                let mut offset = o * row;
                for (src, &size) in srcs.iter().zip(&sizes) {
                    out[offset..offset + size].copy_from_slice(&src.f32_data()[o * size..(o + 1) * size]);
                    offset += size;
                }
            }
        });
    }
}

/// Splits a tensor along an axis into one destination per part.
#[derive(Debug)]
pub struct SliceLayer {
    base: LayerBase,
    bounds: Vec<(usize, usize)>,
}

impl SliceLayer {
    pub fn new(base: LayerBase) -> Self {
        SliceLayer { base, bounds: vec![] }
    }
}

impl Layer for SliceLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), None)?;
        self.base.forbid_in_place(io)?;

        let points = &self.base.param.slice.slice_point;
        if !points.is_empty() && points.len() + 1 != io.dst_len() {
            return Err(self.base.error(format!(
                "{} slice points for {} destinations",
                points.len(),
                io.dst_len()
            )));
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        let axis = self.base.param.slice.axis;
        if axis >= src.rank() {
            return Err(self.base.shape_error(format!("axis {} out of range for {:?}", axis, src)));
        }

        let size = src.shape()[axis];
        let count = io.dst_len();
        let points = &self.base.param.slice.slice_point;
        let points = if points.is_empty() {
            if size % count != 0 {
                return Err(self.base.shape_error(format!("cannot split {} evenly into {} parts", size, count)));
            }
            (1..count).map(|i| i * size / count).collect_vec()
        } else {
            points.clone()
        };

        let bounds = std::iter::once(0)
            .chain(points)
            .chain(std::iter::once(size))
            .tuple_windows()
            .collect_vec();
        if bounds.iter().any(|&(start, end)| start > end) {
            return Err(self.base.shape_error(format!("slice points out of order for axis size {}", size)));
        }

        let shape = src.shape().to_vec();
        for (i, &(start, end)) in bounds.iter().enumerate() {
            let mut dst_shape = shape.clone();
            dst_shape[axis] = end - start;
            self.base.reshape_dst(io, i, DType::F32, &dst_shape)?;
        }
        self.bounds = bounds;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let axis = self.base.param.slice.axis;
        for (i, &(start, end)) in self.bounds.iter().enumerate() {
            io.compute(i, |srcs, out| {
                let (outer, size, inner) = split_shape(srcs[0].shape(), axis);
                let data = srcs[0].f32_data();
                let out = out.f32_data_mut();
                let part = (end - start) * inner;
                for o in 0..outer {
                    let from = (o * size + start) * inner;
                    out[o * part..(o + 1) * part].copy_from_slice(&data[from..from + part]);
                }
            });
        }
    }
}
