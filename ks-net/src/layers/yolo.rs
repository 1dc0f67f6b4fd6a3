use crate::layer::{Layer, LayerBase};
use crate::layers::region::entry_index;
use crate::region::{logistic, NetSize, Region, RegionSource};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::{DType, Tensor};

/// The YOLOv3 detection head.
///
/// The source is `[N, mask.len() * (5 + classes), H, W]`, laid out like the YOLOv2 head.
/// Anchors are in network input pixels, so extracting regions needs the input size.
#[derive(Debug)]
pub struct YoloLayer {
    base: LayerBase,
}

impl YoloLayer {
    pub fn new(base: LayerBase) -> Self {
        YoloLayer { base }
    }

    fn entries(&self) -> usize {
        5 + self.base.param.yolo.classes
    }
}

impl Layer for YoloLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        let param = &self.base.param.yolo;
        if param.mask.is_empty() {
            return Err(self.base.error("empty anchor mask"));
        }
        if let Some(&m) = param.mask.iter().find(|&&m| 2 * m + 1 >= param.anchors.len()) {
            return Err(self.base.error(format!("mask {} out of range for {} anchor values", m, param.anchors.len())));
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        self.base.require_rank(src, 4, "input")?;

        let expected = self.base.param.yolo.mask.len() * self.entries();
        if src.shape()[1] != expected {
            return Err(self.base.shape_error(format!("expected {} channels, got {:?}", expected, src)));
        }

        let shape = src.shape().to_vec();
        if !io.is_in_place(0) {
            self.base.reshape_dst(io, 0, DType::F32, &shape)?;
        }
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let entries = self.entries();
        let anchors = self.base.param.yolo.mask.len();

        let dst = io.in_place(0);
        let shape = dst.shape().to_vec();
        let cells = shape[2] * shape[3];
        let data = dst.f32_data_mut();

        for image in data.chunks_exact_mut((shape[1] * cells).max(1)) {
            for anchor in 0..anchors {
                // box offsets, objectness and class scores are activated, the box size stays in log space
                for entry in (0..entries).filter(|&e| e != 2 && e != 3) {
                    let start = entry_index(anchor, 0, entry, entries, cells);
                    image[start..start + cells].iter_mut().for_each(|x| *x = logistic(*x));
                }
            }
        }
    }

    fn as_region_source(&self) -> Option<&dyn RegionSource> {
        Some(self)
    }
}

impl RegionSource for YoloLayer {
    fn candidates(&self, output: &Tensor, net: NetSize, threshold: f32) -> Vec<Region> {
        if net.width == 0 || net.height == 0 || output.rank() != 4 || output.as_f32().is_none() {
            return vec![];
        }

        let param = &self.base.param.yolo;
        let entries = self.entries();
        let data = output.f32_data();
        let (height, width) = (output.shape()[2], output.shape()[3]);
        let cells = height * width;

        let mut result = vec![];
        for location in 0..cells {
            let (row, col) = (location / width, location % width);
            for (anchor, &mask) in param.mask.iter().enumerate() {
                let at = |entry: usize| data[entry_index(anchor, location, entry, entries, cells)];
                let objectness = at(4);
                if objectness <= threshold {
                    continue;
                }

                let x = (col as f32 + at(0)) / width as f32;
                let y = (row as f32 + at(1)) / height as f32;
                let w = at(2).exp() * param.anchors[2 * mask] / net.width as f32;
                let h = at(3).exp() * param.anchors[2 * mask + 1] / net.height as f32;

                for class in 0..param.classes {
                    let prob = objectness * at(5 + class);
                    if prob > threshold {
                        result.push(Region::new(x, y, w, h, class, prob));
                    }
                }
            }
        }
        result
    }
}
