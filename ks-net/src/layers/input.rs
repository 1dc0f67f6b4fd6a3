use crate::layer::{Layer, LayerBase};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::{DType, Tensor};

/// A graph input. The values are written by the caller,
/// the layer only applies the shapes declared in the description.
#[derive(Debug)]
pub struct InputLayer {
    base: LayerBase,
}

impl InputLayer {
    pub fn new(base: LayerBase) -> Self {
        InputLayer { base }
    }
}

impl Layer for InputLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(0), None)?;

        let shapes = &self.base.param.input.shape;
        if !shapes.is_empty() && shapes.len() != io.dst_len() {
            return Err(self.base.error(format!(
                "got {} input shapes for {} destinations",
                shapes.len(),
                io.dst_len()
            )));
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        for (i, shape) in self.base.param.input.shape.iter().enumerate() {
            self.base.reshape_dst(io, i, DType::F32, shape)?;
        }
        Ok(())
    }

    fn forward(&mut self, _: &mut StageIo, _: &mut ScratchPool) {}
}

/// Outputs its first weight.
#[derive(Debug)]
pub struct ConstLayer {
    base: LayerBase,
}

impl ConstLayer {
    pub fn new(base: LayerBase) -> Self {
        ConstLayer { base }
    }

    fn write(&self, io: &mut StageIo) -> NetworkResult<()> {
        let weight = self.base.weight(0)?;
        io.dst(0).set_f32(weight.clone());
        Ok(())
    }
}

impl Layer for ConstLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(0), Some(1))?;
        self.base.weight(0)?;
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.write(io)
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        // downstream layers may have updated the value in place during the previous pass
        if let (Ok(weight), Tensor::F32(dst)) = (self.base.weight(0), io.dst(0)) {
            if dst.shape() == weight.shape() {
                dst.assign(weight);
            }
        }
    }
}

/// Identity, used for `Stub` and `Dropout`.
#[derive(Debug)]
pub struct StubLayer {
    base: LayerBase,
}

impl StubLayer {
    pub fn new(base: LayerBase) -> Self {
        StubLayer { base }
    }
}

impl Layer for StubLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, None, None)?;
        if io.dst_len() > io.src_len() {
            return Err(self.base.error("more destinations than sources"));
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        for i in 0..io.dst_len() {
            if !io.is_in_place(i) {
                let src = io.src(i);
                let (dtype, shape) = (src.dtype(), src.shape().to_vec());
                self.base.reshape_dst(io, i, dtype, &shape)?;
            }
        }
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        for i in 0..io.dst_len() {
            io.in_place(i);
        }
    }
}

