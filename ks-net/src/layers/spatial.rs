use ndarray::Slice;

use crate::layer::{Layer, LayerBase};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::DType;

/// Nearest neighbour upsampling of NCHW tensors by an integer factor.
#[derive(Debug)]
pub struct UpsampleLayer {
    base: LayerBase,
}

impl UpsampleLayer {
    pub fn new(base: LayerBase) -> Self {
        UpsampleLayer { base }
    }
}

impl Layer for UpsampleLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        self.base.forbid_in_place(io)?;
        if self.base.param.upsample.scale == 0 {
            return Err(self.base.error("scale must be positive"));
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        self.base.require_rank(src, 4, "input")?;

        let scale = self.base.param.upsample.scale;
        let mut shape = src.shape().to_vec();
        for axis in [2, 3] {
            shape[axis] = shape[axis]
                .checked_mul(scale)
                .ok_or_else(|| self.base.shape_error(format!("cannot upsample {:?} by {}", src, scale)))?;
        }
        self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let scale = self.base.param.upsample.scale;
        io.compute(0, |srcs, out| {
            let shape = srcs[0].shape();
            let (height, width) = (shape[2], shape[3]);
            let out_w = width * scale;
            let input = srcs[0].f32_data();
            let output = out.f32_data_mut();

            for (plane, result) in input
                .chunks_exact((height * width).max(1))
                .zip(output.chunks_exact_mut((height * width * scale * scale).max(1)))
            {
                for (y, row) in result.chunks_exact_mut(out_w.max(1)).enumerate() {
                    let src_row = &plane[(y / scale) * width..(y / scale + 1) * width];
                    for (x, value) in row.iter_mut().enumerate() {
                        *value = src_row[x / scale];
                    }
                }
            }
        });
    }
}

/// Constant padding, `pads` lists the leading padding of every axis followed by the trailing ones.
#[derive(Debug)]
pub struct PadLayer {
    base: LayerBase,
}

impl PadLayer {
    pub fn new(base: LayerBase) -> Self {
        PadLayer { base }
    }

    fn pads(&self, rank: usize) -> NetworkResult<(Vec<usize>, Vec<usize>)> {
        let pads = &self.base.param.pad.pads;
        match pads.len() {
            0 => Ok((vec![0; rank], vec![0; rank])),
            n if n == 2 * rank => Ok((pads[..rank].to_vec(), pads[rank..].to_vec())),
            n => Err(self.base.shape_error(format!("got {} pads for rank {}", n, rank))),
        }
    }
}

impl Layer for PadLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        self.base.forbid_in_place(io)
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        let (before, after) = self.pads(src.rank())?;

        let shape = src
            .shape()
            .iter()
            .enumerate()
            .map(|(a, &d)| before[a].checked_add(d).and_then(|d| d.checked_add(after[a])))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.base.shape_error(format!("padding overflows {:?}", src)))?;
        self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let value = self.base.param.pad.value;
        let before = match self.pads(io.src(0).rank()) {
            Ok((before, _)) => before,
            Err(_) => return,
        };

        io.compute(0, |srcs, out| {
            let src = srcs[0].f32();
            let dst = out.f32_mut();
            dst.fill(value);
            dst.slice_each_axis_mut(|ax| {
                let start = before[ax.axis.index()] as isize;
                Slice::from(start..start + src.shape()[ax.axis.index()] as isize)
            })
            .assign(src);
        });
    }
}
