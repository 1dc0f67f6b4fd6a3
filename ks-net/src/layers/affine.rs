use itertools::izip;

use crate::layer::{Layer, LayerBase};
use crate::layers::split_shape;
use crate::param::LayerType;
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::DType;

/// `y = x * scale[c] + shift[c]` along a channel axis, covering `Bias`, `Scale` and `BatchNorm`.
///
/// The per-channel factors are folded together once in setup.
#[derive(Debug)]
pub struct ChannelAffineLayer {
    base: LayerBase,
    ty: LayerType,
    axis: usize,
    scale: Vec<f32>,
    shift: Vec<f32>,
    split: (usize, usize, usize),
}

impl ChannelAffineLayer {
    pub fn new(base: LayerBase, ty: LayerType) -> Self {
        let axis = match ty {
            LayerType::Bias => base.param.bias.axis,
            LayerType::Scale => base.param.scale.axis,
            _ => 1,
        };
        ChannelAffineLayer {
            base,
            ty,
            axis,
            scale: vec![],
            shift: vec![],
            split: (0, 0, 0),
        }
    }

    fn weight_vec(&self, index: usize) -> NetworkResult<Vec<f32>> {
        Ok(self.base.weight(index)?.iter().copied().collect())
    }

    fn fold(&self) -> NetworkResult<(Vec<f32>, Vec<f32>)> {
        match self.ty {
            LayerType::Bias => {
                let shift = self.weight_vec(0)?;
                Ok((vec![1.0; shift.len()], shift))
            }
            LayerType::Scale => {
                let scale = self.weight_vec(0)?;
                let shift = if self.base.param.scale.bias_term {
                    self.weight_vec(1)?
                } else {
                    vec![0.0; scale.len()]
                };
                Ok((scale, shift))
            }
            LayerType::BatchNorm => {
                let mean = self.weight_vec(0)?;
                let variance = self.weight_vec(1)?;
                // optional moving average factor
                let factor = match self.base.weights.get(2).and_then(|w| w.iter().next().copied()) {
                    Some(s) if s == 0.0 => 0.0,
                    Some(s) => 1.0 / s,
                    None => 1.0,
                };
                let eps = self.base.param.batch_norm.eps;

                let scale: Vec<f32> = variance.iter().map(|&v| 1.0 / (v * factor + eps).sqrt()).collect();
                let shift = izip!(&mean, &scale).map(|(&m, &s)| -m * factor * s).collect();
                Ok((scale, shift))
            }
            _ => unreachable!(),
        }
    }
}

impl Layer for ChannelAffineLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        let (scale, shift) = self.fold()?;
        if scale.len() != shift.len() {
            return Err(self.base.error(format!(
                "scale and shift sizes differ: {} vs {}",
                scale.len(),
                shift.len()
            )));
        }
        self.scale = scale;
        self.shift = shift;
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        if self.axis >= src.rank() {
            return Err(self.base.shape_error(format!("axis {} out of range for {:?}", self.axis, src)));
        }

        let shape = src.shape().to_vec();
        self.split = split_shape(&shape, self.axis);
        if self.split.1 != self.scale.len() {
            return Err(self.base.shape_error(format!(
                "{} channels but {} weights",
                self.split.1,
                self.scale.len()
            )));
        }

        if !io.is_in_place(0) {
            self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        }
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let (_, channels, inner) = self.split;
        let data = io.in_place(0).f32_data_mut();

        for (i, chunk) in data.chunks_exact_mut(inner.max(1)).enumerate() {
            let c = i % channels;
            let (scale, shift) = (self.scale[c], self.shift[c]);
            for x in chunk {
                *x = *x * scale + shift;
            }
        }
    }
}

/// SSD style L2 normalization, per spatial position across channels or across the whole sample.
#[derive(Debug)]
pub struct NormalizeLayer {
    base: LayerBase,
}

impl NormalizeLayer {
    pub fn new(base: LayerBase) -> Self {
        NormalizeLayer { base }
    }
}

impl Layer for NormalizeLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        self.base.weight(0)?;
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        self.base.require_rank(src, 4, "input")?;

        let shape = src.shape().to_vec();
        let scale = self.base.weight(0)?.len();
        let expected = if self.base.param.normalize.channel_shared { 1 } else { shape[1] };
        if scale != expected {
            return Err(self.base.shape_error(format!("expected {} scale values, got {}", expected, scale)));
        }

        if !io.is_in_place(0) {
            self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        }
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let param = &self.base.param.normalize;
        let scale = match self.base.weights.first() {
            Some(w) => w.iter().copied().collect::<Vec<_>>(),
            None => return,
        };
        let scale_at = |c: usize| if param.channel_shared { scale[0] } else { scale[c] };

        let dst = io.in_place(0);
        let shape = dst.shape().to_vec();
        let (channels, spatial) = (shape[1], shape[2] * shape[3]);
        let data = dst.f32_data_mut();

        for sample in data.chunks_exact_mut((channels * spatial).max(1)) {
            if param.across_spatial {
                let norm = (sample.iter().map(|x| x * x).sum::<f32>() + param.eps).sqrt();
                for (c, plane) in sample.chunks_exact_mut(spatial.max(1)).enumerate() {
                    let factor = scale_at(c) / norm;
                    plane.iter_mut().for_each(|x| *x *= factor);
                }
            } else {
                for s in 0..spatial {
                    let sum = (0..channels).map(|c| sample[c * spatial + s].powi(2)).sum::<f32>();
                    let norm = (sum + param.eps).sqrt();
                    for c in 0..channels {
                        sample[c * spatial + s] *= scale_at(c) / norm;
                    }
                }
            }
        }
    }
}
