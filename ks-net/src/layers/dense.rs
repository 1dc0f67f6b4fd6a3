use ndarray::{Array1, Array2, Ix2};

use crate::layer::{Layer, LayerBase};
use crate::layers::{matrix, matrix_mut};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::DType;

/// Fully connected layer: everything from `axis` on is flattened into `K` features
/// and multiplied with a `[N, K]` weight (`[K, N]` if `transpose_b`).
#[derive(Debug)]
pub struct InnerProductLayer {
    base: LayerBase,
    /// Stored as `[K, N]`.
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
    rows: usize,
}

impl InnerProductLayer {
    pub fn new(base: LayerBase) -> Self {
        InnerProductLayer {
            base,
            weight: Array2::zeros((0, 0)),
            bias: None,
            rows: 0,
        }
    }
}

impl Layer for InnerProductLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        self.base.forbid_in_place(io)?;

        let param = &self.base.param.inner_product;
        let weight = self
            .base
            .weight(0)?
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|e| self.base.error(format!("weight must be a matrix: {}", e)))?;
        let weight = if param.transpose_b { weight } else { weight.reversed_axes() };
        let outputs = weight.shape()[1];
        if param.output_num != 0 && param.output_num != outputs {
            return Err(self.base.error(format!(
                "output_num {} does not match weight {:?}",
                param.output_num,
                weight.shape()
            )));
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
        self.weight = weight.as_standard_layout().into_owned();
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        let axis = self.base.param.inner_product.axis;
        if axis > src.rank() {
            return Err(self.base.shape_error(format!("axis {} out of range for {:?}", axis, src)));
        }

        let rows: usize = src.shape()[..axis].iter().product();
        let features: usize = src.shape()[axis..].iter().product();
        let (expected, outputs) = self.weight.dim();
        if features != expected {
            return Err(self.base.shape_error(format!(
                "{:?} has {} features, weight expects {}",
                src, features, expected
            )));
        }

        let mut shape = src.shape()[..axis].to_vec();
        shape.push(outputs);
        self.rows = rows;
        self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let (features, outputs) = self.weight.dim();
        let rows = self.rows;
        let weight = &self.weight;
        let bias = &self.bias;

        io.compute(0, |srcs, out| {
            let input = matrix(srcs[0].f32_data(), rows, features);
            let mut output = matrix_mut(out.f32_data_mut(), rows, outputs);
            output.assign(&input.dot(weight));
            if let Some(bias) = bias {
                output += bias;
            }
        });
    }
}
