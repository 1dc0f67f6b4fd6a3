use itertools::Itertools;
use ndarray::IxDyn;

use crate::layer::{Layer, LayerBase};
use crate::param::LayerType;
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::{checked_size, DType, Tensor};

/// Layers that only change the shape: `Flatten`, `Reshape`, `Squeeze` and `ExpandDims`.
///
/// The payload is copied unchanged unless the layer runs in place.
#[derive(Debug)]
pub struct ViewLayer {
    base: LayerBase,
    ty: LayerType,
}

impl ViewLayer {
    pub fn new(base: LayerBase, ty: LayerType) -> Self {
        ViewLayer { base, ty }
    }

    fn flatten(&self, shape: &[usize]) -> NetworkResult<Vec<usize>> {
        let param = &self.base.param.flatten;
        let start = self.base.axis(param.axis, shape.len())?;
        let end = self.base.axis(param.end_axis, shape.len())?;
        if start > end {
            return Err(self.base.shape_error(format!("flatten axes {}..={} are reversed", start, end)));
        }

        let mut result = shape[..start].to_vec();
        result.push(shape[start..=end].iter().product());
        result.extend_from_slice(&shape[end + 1..]);
        Ok(result)
    }

    fn reshape_to(&self, shape: &[usize], target: &[i64]) -> NetworkResult<Vec<usize>> {
        let size: usize = shape.iter().product();
        let mut inferred = None;
        let mut result = Vec::with_capacity(target.len());

        for (i, &d) in target.iter().enumerate() {
            let dim = match d {
                0 => *shape
                    .get(i)
                    .ok_or_else(|| self.base.shape_error(format!("cannot copy axis {} of {:?}", i, shape)))?,
                -1 => {
                    if inferred.replace(i).is_some() {
                        return Err(self.base.error("more than one inferred axis"));
                    }
                    1
                }
                d if d > 0 => d as usize,
                d => return Err(self.base.error(format!("invalid target dimension {}", d))),
            };
            result.push(dim);
        }

        let known = checked_size(&result)
            .map_err(|_| self.base.shape_error(format!("target shape {:?} is too large", target)))?;
        if let Some(i) = inferred {
            if known == 0 || size % known != 0 {
                return Err(self.base.shape_error(format!("cannot reshape {:?} into {:?}", shape, target)));
            }
            result[i] = size / known;
        } else if known != size {
            return Err(self.base.shape_error(format!("cannot reshape {:?} into {:?}", shape, target)));
        }
        Ok(result)
    }

    fn squeeze(&self, shape: &[usize]) -> NetworkResult<Vec<usize>> {
        let axes = &self.base.param.squeeze.axis;
        if axes.is_empty() {
            return Ok(shape.iter().copied().filter(|&d| d != 1).collect());
        }

        let axes = axes
            .iter()
            .map(|&a| self.base.axis(a, shape.len()))
            .collect::<NetworkResult<Vec<_>>>()?;
        if let Some(&a) = axes.iter().find(|&&a| shape[a] != 1) {
            return Err(self.base.shape_error(format!("cannot squeeze axis {} of {:?}", a, shape)));
        }

        Ok((0..shape.len()).filter(|a| !axes.contains(a)).map(|a| shape[a]).collect())
    }

    fn expand_dims(&self, shape: &[usize]) -> NetworkResult<Vec<usize>> {
        let axis = self.base.axis(self.base.param.expand_dims.axis, shape.len() + 1)?;
        let mut result = shape.to_vec();
        result.insert(axis, 1);
        Ok(result)
    }

    fn target_shape(&self, io: &StageIo) -> NetworkResult<Vec<usize>> {
        let shape = io.src(0).shape();
        match self.ty {
            LayerType::Flatten => self.flatten(shape),
            LayerType::Reshape => {
                if io.src_len() > 1 {
                    let target = io.src(1);
                    self.base.require_dtype(target, DType::I32, "target shape")?;
                    let target = target.i32_data().iter().map(|&d| d as i64).collect_vec();
                    self.reshape_to(shape, &target)
                } else {
                    self.reshape_to(shape, &self.base.param.reshape.shape)
                }
            }
            LayerType::Squeeze => self.squeeze(shape),
            LayerType::ExpandDims => self.expand_dims(shape),
            _ => unreachable!(),
        }
    }
}

impl Layer for ViewLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let max_src = if self.ty == LayerType::Reshape { 2 } else { 1 };
        self.base.require_io(io, None, Some(1))?;
        if io.src_len() > max_src {
            return Err(self.base.error(format!("expected at most {} sources", max_src)));
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let shape = self.target_shape(io)?;
        // in place the destination is the source, so this only changes the shape
        let dtype = io.src(0).dtype();
        self.base.reshape_dst(io, 0, dtype, &shape)
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        if !io.is_in_place(0) {
            io.compute(0, |srcs, out| out.copy_data_from(srcs[0]));
        }
    }
}

/// Axis permutation, `order` lists the source axis for every destination axis.
#[derive(Debug)]
pub struct PermuteLayer {
    base: LayerBase,
    order: Vec<usize>,
}

impl PermuteLayer {
    pub fn new(base: LayerBase) -> Self {
        PermuteLayer { base, order: vec![] }
    }
}

impl Layer for PermuteLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        self.base.forbid_in_place(io)
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        let rank = src.rank();
        let dtype = src.dtype();

        // a partial order leaves the trailing axes in place
        let mut order = self.base.param.permute.order.clone();
        order.extend((0..rank).filter(|a| !self.base.param.permute.order.contains(a)));
        if order.len() != rank || !order.iter().all_unique() || order.iter().any(|&a| a >= rank) {
            return Err(self.base.error(format!("invalid permutation {:?} for {:?}", order, src)));
        }

        let shape = order.iter().map(|&a| src.shape()[a]).collect_vec();
        self.base.reshape_dst(io, 0, dtype, &shape)?;
        self.order = order;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let order = IxDyn(&self.order);
        io.compute(0, |srcs, out| match (srcs[0], out) {
            (Tensor::F32(src), Tensor::F32(dst)) => dst.assign(&src.view().permuted_axes(order)),
            (Tensor::I32(src), Tensor::I32(dst)) => dst.assign(&src.view().permuted_axes(order)),
            _ => {}
        });
    }
}
