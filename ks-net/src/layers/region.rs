use crate::layer::{Layer, LayerBase};
use crate::layers::softmax::softmax_strided;
use crate::region::{logistic, NetSize, Region, RegionSource};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::{DType, Tensor};

/// The YOLOv2 detection head.
///
/// The source is `[N, num * (coords + 1 + classes), H, W]`, every anchor owns a block of
/// `coords` box values, one objectness value and the class scores, each an `H * W` plane.
#[derive(Debug)]
pub struct RegionLayer {
    base: LayerBase,
}

impl RegionLayer {
    pub fn new(base: LayerBase) -> Self {
        RegionLayer { base }
    }

    fn entries(&self) -> usize {
        let param = &self.base.param.region;
        param.coords + 1 + param.classes
    }
}

/// Index of `entry` for anchor `anchor` at cell `location` within a single image.
pub(crate) fn entry_index(anchor: usize, location: usize, entry: usize, entries: usize, cells: usize) -> usize {
    anchor * cells * entries + entry * cells + location
}

impl Layer for RegionLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(1), Some(1))?;
        let param = &self.base.param.region;
        if param.coords < 4 {
            return Err(self.base.error(format!("expected at least 4 coordinates, got {}", param.coords)));
        }
        if param.anchors.len() < 2 * param.num {
            return Err(self.base.error(format!(
                "{} anchor values for {} anchors",
                param.anchors.len(),
                param.num
            )));
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let src = io.src(0);
        self.base.require_dtype(src, DType::F32, "input")?;
        self.base.require_rank(src, 4, "input")?;

        let expected = self.base.param.region.num * self.entries();
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
        let param = &self.base.param.region;
        let entries = self.entries();

        let dst = io.in_place(0);
        let shape = dst.shape().to_vec();
        let cells = shape[2] * shape[3];
        let data = dst.f32_data_mut();

        for image in data.chunks_exact_mut((shape[1] * cells).max(1)) {
            for anchor in 0..param.num {
                for location in 0..cells {
                    for entry in [0, 1, param.coords] {
                        let index = entry_index(anchor, location, entry, entries, cells);
                        image[index] = logistic(image[index]);
                    }
                    if param.softmax {
                        let start = entry_index(anchor, location, param.coords + 1, entries, cells);
                        softmax_strided(&mut image[start..], param.classes, cells);
                    }
                }
            }
        }
    }

    fn as_region_source(&self) -> Option<&dyn RegionSource> {
        Some(self)
    }
}

impl RegionSource for RegionLayer {
    fn candidates(&self, output: &Tensor, _: NetSize, threshold: f32) -> Vec<Region> {
        let param = &self.base.param.region;
        let entries = self.entries();
        let data = match output.as_f32() {
            Some(_) if output.rank() == 4 => output.f32_data(),
            _ => return vec![],
        };
        let (height, width) = (output.shape()[2], output.shape()[3]);
        let cells = height * width;

        let mut result = vec![];
        for location in 0..cells {
            let (row, col) = (location / width, location % width);
            for anchor in 0..param.num {
                let at = |entry: usize| data[entry_index(anchor, location, entry, entries, cells)];
                let objectness = at(param.coords);
                if objectness <= threshold {
                    continue;
                }

                let x = (col as f32 + at(0)) / width as f32;
                let y = (row as f32 + at(1)) / height as f32;
                let w = at(2).exp() * param.anchors[2 * anchor] / width as f32;
                let h = at(3).exp() * param.anchors[2 * anchor + 1] / height as f32;

                for class in 0..param.classes {
                    let prob = objectness * at(param.coords + 1 + class);
                    if prob > threshold {
                        result.push(Region::new(x, y, w, h, class, prob));
                    }
                }
            }
        }
        result
    }
}
