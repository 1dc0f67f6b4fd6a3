use crate::layer::{Layer, LayerBase};
use crate::layers::split_shape;
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::DType;

#[derive(Debug)]
pub struct SoftmaxLayer {
    base: LayerBase,
    split: (usize, usize, usize),
}

impl SoftmaxLayer {
    pub fn new(base: LayerBase) -> Self {
        SoftmaxLayer { base, split: (0, 0, 0) }
    }
}

/// Softmax over `count` values spaced `stride` apart.
pub(crate) fn softmax_strided(data: &mut [f32], count: usize, stride: usize) {
    let max = (0..count).map(|i| data[i * stride]).fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for i in 0..count {
        let e = (data[i * stride] - max).exp();
        data[i * stride] = e;
        sum += e;
    }
    for i in 0..count {
        data[i * stride] /= sum;
    }
}

impl Layer for SoftmaxLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        let axis = self.base.param.softmax.axis;
        if axis >= src.rank() {
            return Err(self.base.shape_error(format!("axis {} out of range for {:?}", axis, src)));
        }

        let shape = src.shape().to_vec();
        self.split = split_shape(&shape, axis);
        if !io.is_in_place(0) {
            self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        }
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let (outer, count, inner) = self.split;
        let data = io.in_place(0).f32_data_mut();
        for o in 0..outer {
            for i in 0..inner {
                softmax_strided(&mut data[o * count * inner + i..], count, inner);
            }
        }
    }
}
