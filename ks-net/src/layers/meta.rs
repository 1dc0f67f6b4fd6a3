use itertools::Itertools;

use crate::layer::{Layer, LayerBase};
use crate::param::MetaType;
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::{DType, Tensor};

/// Shape arithmetic on small i32 vectors, evaluated entirely at reshape time.
///
/// A `Meta` node of type `Input` is a graph input: its value is written by the caller
/// through [Network::reshape](crate::network::Network::reshape).
#[derive(Debug)]
pub struct MetaLayer {
    base: LayerBase,
    meta_type: MetaType,
}

impl MetaLayer {
    pub fn new(base: LayerBase) -> Self {
        let meta_type = base.param.meta.meta_type;
        MetaLayer { base, meta_type }
    }

    fn vector<'t>(&self, tensor: &'t Tensor, what: &str) -> NetworkResult<&'t [i32]> {
        self.base.require_dtype(tensor, DType::I32, what)?;
        Ok(tensor.i32_data())
    }

    fn binary(&self, a: &[i32], b: &[i32]) -> NetworkResult<Vec<i32>> {
        let len = match (a.len(), b.len()) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (x, y) => return Err(self.base.shape_error(format!("cannot broadcast {} and {} values", x, y))),
        };
        let at = |v: &[i32], i: usize| if v.len() == 1 { v[0] } else { v[i] };

        (0..len)
            .map(|i| {
                let (x, y) = (at(a, i), at(b, i));
                match self.meta_type {
                    MetaType::Add => Ok(x.wrapping_add(y)),
                    MetaType::Sub => Ok(x.wrapping_sub(y)),
                    MetaType::Mul => Ok(x.wrapping_mul(y)),
                    MetaType::Div => x.checked_div(y).ok_or_else(|| self.base.shape_error("division by zero")),
                    _ => unreachable!(),
                }
            })
            .collect()
    }

    fn evaluate(&self, io: &StageIo) -> NetworkResult<Option<Tensor>> {
        let value = match self.meta_type {
            MetaType::Input => {
                let current = io.dst_ref(0);
                if current.dtype() == DType::I32 {
                    return Ok(None);
                }
                if self.base.param.meta.alpha.is_empty() {
                    Tensor::i32_vector(&[])
                } else {
                    self.base.param.meta.alpha.to_tensor()?
                }
            }
            MetaType::Const => self.base.param.meta.alpha.to_tensor()?,
            MetaType::Shape => {
                let shape = io.src(0).shape().iter().map(|&d| d as i32).collect_vec();
                Tensor::i32_vector(&shape)
            }
            MetaType::Add | MetaType::Sub | MetaType::Mul | MetaType::Div => {
                let a = self.vector(io.src(0), "first operand")?;
                let b = self.vector(io.src(1), "second operand")?;
                Tensor::i32_vector(&self.binary(a, b)?)
            }
            MetaType::Pack => {
                let mut values = vec![];
                for i in 0..io.src_len() {
                    values.extend_from_slice(self.vector(io.src(i), "packed value")?);
                }
                Tensor::i32_vector(&values)
            }
            MetaType::Gather => {
                let data = self.vector(io.src(0), "gather data")?;
                let indices = self.vector(io.src(1), "gather indices")?;
                let values = indices
                    .iter()
                    .map(|&i| {
                        let index = if i < 0 { i + data.len() as i32 } else { i };
                        usize::try_from(index)
                            .ok()
                            .and_then(|index| data.get(index).copied())
                            .ok_or_else(|| self.base.shape_error(format!("gather index {} out of range", i)))
                    })
                    .collect::<NetworkResult<Vec<_>>>()?;
                Tensor::i32_vector(&values)
            }
        };
        Ok(Some(value))
    }
}

impl Layer for MetaLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = match self.meta_type {
            MetaType::Input | MetaType::Const => Some(0),
            MetaType::Shape => Some(1),
            MetaType::Add | MetaType::Sub | MetaType::Mul | MetaType::Div | MetaType::Gather => Some(2),
            MetaType::Pack => None,
        };
        self.base.require_io(io, src, Some(1))?;
        self.base.forbid_in_place(io)
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        if let Some(value) = self.evaluate(io)? {
            io.dst(0).copy_from(&value);
        }
        Ok(())
    }

    fn forward(&mut self, _: &mut StageIo, _: &mut ScratchPool) {}
}
