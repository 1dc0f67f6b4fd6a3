use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, Ix4};

use crate::layer::{Layer, LayerBase};
use crate::layers::{expand_pads, expand_pair, matrix, matrix_mut};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::DType;

/// Static geometry of a 2D convolution over NCHW tensors.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ConvGeometry {
    pub channels: usize,
    pub outputs: usize,
    pub group: usize,
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub dilation: (usize, usize),
    /// `[top, left, bottom, right]`
    pub pad: [usize; 4],
}

impl ConvGeometry {
    /// The output size for the given input size, `None` if the dilated kernel does not fit or the size overflows.
    pub fn output_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let extent_y = self.dilation.0.checked_mul(self.kernel.0 - 1)?.checked_add(1)?;
        let extent_x = self.dilation.1.checked_mul(self.kernel.1 - 1)?.checked_add(1)?;
        let padded_y = height.checked_add(self.pad[0])?.checked_add(self.pad[2])?;
        let padded_x = width.checked_add(self.pad[1])?.checked_add(self.pad[3])?;
        if padded_y < extent_y || padded_x < extent_x {
            return None;
        }
        Some(((padded_y - extent_y) / self.stride.0 + 1, (padded_x - extent_x) / self.stride.1 + 1))
    }

    /// The number of rows of the im2col matrix of a single group.
    pub fn patch_size(&self) -> usize {
        self.channels / self.group * self.kernel.0 * self.kernel.1
    }
}

/// Grouped, strided and dilated convolution implemented as im2col followed by a matrix multiplication.
///
/// The im2col matrix lives in scratch buffer 0.
#[derive(Debug)]
pub struct ConvolutionLayer {
    base: LayerBase,
    geometry: ConvGeometry,
    /// `[outputs, channels / group * kh * kw]`
    weight: Array2<f32>,
    bias: Option<Vec<f32>>,
    input: (usize, usize, usize),
    output: (usize, usize),
}

impl ConvolutionLayer {
    pub fn new(base: LayerBase) -> Self {
        ConvolutionLayer {
            base,
            geometry: ConvGeometry::default(),
            weight: Array2::zeros((0, 0)),
            bias: None,
            input: (0, 0, 0),
            output: (0, 0),
        }
    }

    pub fn geometry(&self) -> ConvGeometry {
        self.geometry
    }
}

impl Layer for ConvolutionLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        self.base.forbid_in_place(io)?;

        let param = &self.base.param.convolution;
        let weight = self
            .base
            .weight(0)?
            .clone()
            .into_dimensionality::<Ix4>()
            .map_err(|e| self.base.error(format!("weight must have rank 4: {}", e)))?;
        let (outputs, group_channels, kh, kw) = weight.dim();

        let kernel = expand_pair(&param.kernel, 0).ok_or_else(|| self.base.error("invalid kernel"))?;
        let kernel = if param.kernel.is_empty() { (kh, kw) } else { kernel };
        if kernel != (kh, kw) {
            return Err(self.base.error(format!("kernel {:?} does not match weight {:?}", kernel, weight.shape())));
        }

        let group = param.group;
        if group == 0 || outputs % group != 0 {
            return Err(self.base.error(format!("invalid group count {} for {} outputs", group, outputs)));
        }
        if param.output_num != 0 && param.output_num != outputs {
            return Err(self.base.error(format!("output_num {} does not match weight", param.output_num)));
        }

        let geometry = ConvGeometry {
            channels: group_channels * group,
            outputs,
            group,
            kernel,
            stride: expand_pair(&param.stride, 1).ok_or_else(|| self.base.error("invalid stride"))?,
            dilation: expand_pair(&param.dilation, 1).ok_or_else(|| self.base.error("invalid dilation"))?,
            pad: expand_pads(&param.pad).ok_or_else(|| self.base.error("invalid padding"))?,
        };
        if geometry.stride.0 == 0 || geometry.stride.1 == 0 || geometry.dilation.0 == 0 || geometry.dilation.1 == 0 {
            return Err(self.base.error("stride and dilation must be positive"));
        }
        if kh == 0 || kw == 0 || outputs == 0 || group_channels == 0 {
            return Err(self.base.error(format!("empty weight {:?}", weight.shape())));
        }

        self.bias = if param.bias_term {
            let bias = self.base.weight(1)?;
            if bias.len() != outputs {
                return Err(self.base.error(format!("expected {} bias values, got {}", outputs, bias.len())));
            }
            Some(bias.iter().copied().collect())
        } else {
            None
        };

        let patch = geometry.patch_size();
        self.weight = weight
            .as_standard_layout()
            .into_owned()
            .into_shape((outputs, patch))
            .map_err(|e| self.base.error(e.to_string()))?;
        self.geometry = geometry;
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        self.base.require_rank(src, 4, "input")?;

        let shape = src.shape().to_vec();
        let (batch, channels, height, width) = (shape[0], shape[1], shape[2], shape[3]);
        if channels != self.geometry.channels {
            return Err(self.base.shape_error(format!(
                "expected {} channels, got {:?}",
                self.geometry.channels, src
            )));
        }
        if height == 0 || width == 0 {
            return Err(self.base.shape_error(format!("cannot convolve the empty input {:?}", src)));
        }
        let (out_h, out_w) = self
            .geometry
            .output_size(height, width)
            .ok_or_else(|| self.base.shape_error(format!("kernel does not fit into {:?}", shape)))?;

        self.input = (channels, height, width);
        self.output = (out_h, out_w);
        self.base.reshape_dst(io, 0, DType::F32, &[batch, self.geometry.outputs, out_h, out_w])?;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, scratch: &mut ScratchPool) {
        let g = self.geometry;
        let (channels, height, width) = self.input;
        let (out_h, out_w) = self.output;
        let spatial = out_h * out_w;
        let patch = g.patch_size();
        let group_channels = channels / g.group;
        let group_outputs = g.outputs / g.group;
        let weight = &self.weight;
        let bias = &self.bias;

        io.compute(0, |srcs, out| {
            let input = srcs[0].f32_data();
            let output = out.f32_data_mut();
            let columns = scratch.get(0, patch * spatial);

            for (image, result) in input
                .chunks_exact(channels * height * width)
                .zip(output.chunks_exact_mut(g.outputs * spatial))
            {
                for group in 0..g.group {
                    let planes = &image[group * group_channels * height * width..];
                    im2col(planes, &g, (height, width), (out_h, out_w), columns);

                    let kernel = weight.slice(ndarray::s![group * group_outputs..(group + 1) * group_outputs, ..]);
                    let mut target = matrix_mut(&mut result[group * group_outputs * spatial..], group_outputs, spatial);
                    general_mat_mul(1.0, &kernel, &matrix(columns, patch, spatial), 0.0, &mut target);
                }

                if let Some(bias) = bias {
                    for (plane, &b) in result.chunks_exact_mut(spatial.max(1)).zip(bias) {
                        plane.iter_mut().for_each(|x| *x += b);
                    }
                }
            }
        });
    }
}

fn im2col(
    planes: &[f32],
    g: &ConvGeometry,
    (height, width): (usize, usize),
    (out_h, out_w): (usize, usize),
    columns: &mut [f32],
) {
    let (kh, kw) = g.kernel;
    let spatial = out_h * out_w;
    let group_channels = g.channels / g.group;

    for c in 0..group_channels {
        let plane = &planes[c * height * width..(c + 1) * height * width];
        for ky in 0..kh {
            for kx in 0..kw {
                let row = ((c * kh + ky) * kw + kx) * spatial;
                for oy in 0..out_h {
                    let iy = (oy * g.stride.0 + ky * g.dilation.0) as isize - g.pad[0] as isize;
                    for ox in 0..out_w {
                        let ix = (ox * g.stride.1 + kx * g.dilation.1) as isize - g.pad[1] as isize;
                        let inside = (0..height as isize).contains(&iy) && (0..width as isize).contains(&ix);
                        columns[row + oy * out_w + ox] = if inside {
                            plane[iy as usize * width + ix as usize]
                        } else {
                            0.0
                        };
                    }
                }
            }
        }
    }
}
