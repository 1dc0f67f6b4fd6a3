use crate::layer::{Layer, LayerBase};
use crate::param::{LayerType, UnaryOperationType};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::DType;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ElementwiseOp {
    Relu { slope: f32 },
    Sigmoid,
    Log { base: f32, scale: f32, shift: f32 },
    Unary(UnaryOperationType),
    RestrictRange { lower: f32, upper: f32 },
}

impl ElementwiseOp {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            ElementwiseOp::Relu { slope } => {
                if x > 0.0 {
                    x
                } else {
                    x * slope
                }
            }
            ElementwiseOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ElementwiseOp::Log { base, scale, shift } => {
                let y = (shift + scale * x).ln();
                if base > 0.0 {
                    y / base.ln()
                } else {
                    y
                }
            }
            ElementwiseOp::Unary(op) => match op {
                UnaryOperationType::Abs => x.abs(),
                UnaryOperationType::Neg => -x,
                UnaryOperationType::Exp => x.exp(),
                UnaryOperationType::Log => x.ln(),
                UnaryOperationType::Sqrt => x.sqrt(),
                UnaryOperationType::Rsqrt => 1.0 / x.sqrt(),
                UnaryOperationType::Tanh => x.tanh(),
            },
            ElementwiseOp::RestrictRange { lower, upper } => x.clamp(lower, upper),
        }
    }
}

/// A unary function applied to every element, capable of running in place.
#[derive(Debug)]
pub struct ElementwiseLayer {
    base: LayerBase,
    op: ElementwiseOp,
}

impl ElementwiseLayer {
    pub fn new(base: LayerBase, ty: LayerType) -> Self {
        let param = &base.param;
        let op = match ty {
            LayerType::Relu => ElementwiseOp::Relu {
                slope: param.relu.negative_slope,
            },
            LayerType::Sigmoid => ElementwiseOp::Sigmoid,
            LayerType::Log => ElementwiseOp::Log {
                base: param.log.base,
                scale: param.log.scale,
                shift: param.log.shift,
            },
            LayerType::UnaryOperation => ElementwiseOp::Unary(param.unary_operation.op),
            LayerType::RestrictRange => ElementwiseOp::RestrictRange {
                lower: param.restrict_range.lower,
                upper: param.restrict_range.upper,
            },
            _ => panic!("{:?} is not an elementwise layer", ty),
        };
        ElementwiseLayer { base, op }
    }

    pub fn op(&self) -> ElementwiseOp {
        self.op
    }
}

impl Layer for ElementwiseLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        if let ElementwiseOp::RestrictRange { lower, upper } = self.op {
            if !(lower <= upper) {
                return Err(self.base.error(format!("empty range [{}, {}]", lower, upper)));
            }
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_dtype(io.src(0), DType::F32, "input")?;
        if !io.is_in_place(0) {
            let shape = io.src(0).shape().to_vec();
            self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        }
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let op = self.op;
        io.in_place(0).f32_mut().mapv_inplace(|x| op.apply(x));
    }
}
