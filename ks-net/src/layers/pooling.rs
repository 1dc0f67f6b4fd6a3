use crate::layer::{Layer, LayerBase};
use crate::layers::{expand_pads, expand_pair};
use crate::param::{PoolingMethod, RoundingType};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::DType;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
struct PoolGeometry {
    kernel: (usize, usize),
    stride: (usize, usize),
    /// `[top, left, bottom, right]`
    pad: [usize; 4],
    input: (usize, usize),
    output: (usize, usize),
}

/// Max or average pooling over NCHW tensors.
#[derive(Debug)]
pub struct PoolingLayer {
    base: LayerBase,
    geometry: PoolGeometry,
}

impl PoolingLayer {
    pub fn new(base: LayerBase) -> Self {
        PoolingLayer {
            base,
            geometry: PoolGeometry::default(),
        }
    }
}

/// The pooled size along one axis, following the Caffe rounding rules.
pub fn pooled_size(size: usize, kernel: usize, stride: usize, pad_before: usize, pad_after: usize, rounding: RoundingType) -> usize {
    let span = (size + pad_before + pad_after).saturating_sub(kernel);
    let steps = match rounding {
        RoundingType::Ceil => (span + stride - 1) / stride,
        RoundingType::Floor => span / stride,
    };
    let mut pooled = steps + 1;
    // the last window must start inside the image or the leading padding
    if pad_before > 0 && (pooled - 1) * stride >= size + pad_before {
        pooled -= 1;
    }
    pooled
}

impl Layer for PoolingLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        self.base.forbid_in_place(io)?;

        let param = &self.base.param.pooling;
        if !param.global_pooling && param.kernel.is_empty() {
            return Err(self.base.error("missing kernel size"));
        }
        let stride = expand_pair(&param.stride, 1).ok_or_else(|| self.base.error("invalid stride"))?;
        if stride.0 == 0 || stride.1 == 0 {
            return Err(self.base.error("stride must be positive"));
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        self.base.require_rank(src, 4, "input")?;
        let shape = src.shape().to_vec();
        let (height, width) = (shape[2], shape[3]);

        let param = &self.base.param.pooling;
        let geometry = if param.global_pooling {
            PoolGeometry {
                kernel: (height, width),
                stride: (1, 1),
                pad: [0; 4],
                input: (height, width),
                output: (1, 1),
            }
        } else {
            let kernel = expand_pair(&param.kernel, 0).ok_or_else(|| self.base.error("invalid kernel"))?;
            let stride = expand_pair(&param.stride, 1).ok_or_else(|| self.base.error("invalid stride"))?;
            let pad = expand_pads(&param.pad).ok_or_else(|| self.base.error("invalid padding"))?;
            if kernel.0 == 0 || kernel.1 == 0 || kernel.0 > height + pad[0] + pad[2] || kernel.1 > width + pad[1] + pad[3] {
                return Err(self.base.shape_error(format!("kernel {:?} does not fit into {:?}", kernel, shape)));
            }
            let output = (
                pooled_size(height, kernel.0, stride.0, pad[0], pad[2], param.rounding_type),
                pooled_size(width, kernel.1, stride.1, pad[1], pad[3], param.rounding_type),
            );
            PoolGeometry {
                kernel,
                stride,
                pad,
                input: (height, width),
                output,
            }
        };

        self.geometry = geometry;
        self.base.reshape_dst(io, 0, DType::F32, &[shape[0], shape[1], geometry.output.0, geometry.output.1])?;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let g = self.geometry;
        let method = self.base.param.pooling.method;
        let exclude_pad = self.base.param.pooling.exclude_pad;
        let (height, width) = g.input;
        let (out_h, out_w) = g.output;

        io.compute(0, |srcs, out| {
            let input = srcs[0].f32_data();
            let output = out.f32_data_mut();

            for (plane, result) in input
                .chunks_exact((height * width).max(1))
                .zip(output.chunks_exact_mut((out_h * out_w).max(1)))
            {
                for oy in 0..out_h {
                    let start_y = (oy * g.stride.0) as isize - g.pad[0] as isize;
                    let end_y = (start_y + g.kernel.0 as isize).min((height + g.pad[2]) as isize);
                    let y0 = start_y.clamp(0, height as isize) as usize;
                    let y1 = (end_y.clamp(0, height as isize) as usize).max(y0);

                    for ox in 0..out_w {
                        let start_x = (ox * g.stride.1) as isize - g.pad[1] as isize;
                        let end_x = (start_x + g.kernel.1 as isize).min((width + g.pad[3]) as isize);
                        let x0 = start_x.clamp(0, width as isize) as usize;
                        let x1 = (end_x.clamp(0, width as isize) as usize).max(x0);

                        let window = (y0..y1).flat_map(|y| plane[y * width + x0..y * width + x1].iter().copied());
                        result[oy * out_w + ox] = match method {
                            PoolingMethod::Max => window.fold(f32::NEG_INFINITY, f32::max),
                            PoolingMethod::Average => {
                                let count = if exclude_pad {
                                    (y1 - y0) * (x1 - x0)
                                } else {
                                    ((end_y - start_y) * (end_x - start_x)) as usize
                                };
                                window.sum::<f32>() / count.max(1) as f32
                            }
                        };
                    }
                }
            }
        });
    }
}
