use crate::layer::{Layer, LayerBase};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::{DType, Tensor};

/// Element type conversion, float to integer conversion truncates towards zero.
#[derive(Debug)]
pub struct CastLayer {
    base: LayerBase,
}

impl CastLayer {
    pub fn new(base: LayerBase) -> Self {
        CastLayer { base }
    }
}

impl Layer for CastLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let shape = io.src(0).shape().to_vec();
        let dtype = self.base.param.cast.dtype;
        if io.is_in_place(0) && io.src(0).dtype() != dtype {
            return Err(self.base.error("cannot change the element type in place"));
        }
        self.base.reshape_dst(io, 0, dtype, &shape)?;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        if io.is_in_place(0) {
            return;
        }
        io.compute(0, |srcs, out| match (srcs[0], out) {
            (Tensor::F32(src), Tensor::F32(dst)) => dst.assign(src),
            (Tensor::I32(src), Tensor::I32(dst)) => dst.assign(src),
            (Tensor::F32(src), Tensor::I32(dst)) => dst.zip_mut_with(src, |y, &x| *y = x as i32),
            (Tensor::I32(src), Tensor::F32(dst)) => dst.zip_mut_with(src, |y, &x| *y = x as f32),
        });
    }
}

/// A constant f32 tensor whose shape is given by an i32 source vector.
#[derive(Debug)]
pub struct FillLayer {
    base: LayerBase,
}

impl FillLayer {
    pub fn new(base: LayerBase) -> Self {
        FillLayer { base }
    }
}

impl Layer for FillLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        self.base.forbid_in_place(io)
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::I32, "shape")?;
        let shape = src
            .i32_data()
            .iter()
            .map(|&d| usize::try_from(d).map_err(|_| self.base.shape_error(format!("negative dimension {}", d))))
            .collect::<NetworkResult<Vec<_>>>()?;

        self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        io.dst(0).f32_mut().fill(self.base.param.fill.value);
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let value = self.base.param.fill.value;
        io.dst(0).f32_mut().fill(value);
    }
}
