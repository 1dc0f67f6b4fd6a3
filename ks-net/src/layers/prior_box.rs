use crate::layer::{Layer, LayerBase};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::DType;

/// SSD prior (default) boxes for every cell of a feature map.
///
/// Sources are the feature map and the network input image, both NCHW.
/// The destination has shape `[1, 2, cells * priors * 4]`: corner-form boxes normalized
/// to the image size, followed by the matching variances.
/// The boxes only depend on shapes, so they are computed at reshape time.
#[derive(Debug)]
pub struct PriorBoxLayer {
    base: LayerBase,
    aspect_ratios: Vec<f32>,
    boxes: Vec<f32>,
}

impl PriorBoxLayer {
    pub fn new(base: LayerBase) -> Self {
        PriorBoxLayer {
            base,
            aspect_ratios: vec![],
            boxes: vec![],
        }
    }

    pub fn prior_count(&self) -> usize {
        let param = &self.base.param.prior_box;
        self.aspect_ratios.len() * param.min_size.len() + param.max_size.len()
    }

    fn generate(&self, (height, width): (usize, usize), (image_h, image_w): (usize, usize)) -> Vec<f32> {
        let param = &self.base.param.prior_box;
        let (step_h, step_w) = match *param.step.as_slice() {
            [step] => (step, step),
            [step_h, step_w] => (step_h, step_w),
            _ => (image_h as f32 / height as f32, image_w as f32 / width as f32),
        };
        let (image_h, image_w) = (image_h as f32, image_w as f32);

        let mut boxes = Vec::with_capacity(height * width * self.prior_count() * 4);
        let mut push = |cx: f32, cy: f32, w: f32, h: f32| {
            boxes.extend_from_slice(&[
                (cx - w / 2.0) / image_w,
                (cy - h / 2.0) / image_h,
                (cx + w / 2.0) / image_w,
                (cy + h / 2.0) / image_h,
            ]);
        };

        for y in 0..height {
            for x in 0..width {
                let cx = (x as f32 + param.offset) * step_w;
                let cy = (y as f32 + param.offset) * step_h;

                for (i, &min_size) in param.min_size.iter().enumerate() {
                    push(cx, cy, min_size, min_size);

                    if let Some(&max_size) = param.max_size.get(i) {
                        let size = (min_size * max_size).sqrt();
                        push(cx, cy, size, size);
                    }

                    for &ratio in &self.aspect_ratios[1..] {
                        let sqrt = ratio.sqrt();
                        push(cx, cy, min_size * sqrt, min_size / sqrt);
                    }
                }
            }
        }

        if param.clip {
            boxes.iter_mut().for_each(|v| *v = v.clamp(0.0, 1.0));
        }

        let variance = &param.variance;
        let count = boxes.len() / 4;
        for _ in 0..count {
            if variance.len() == 1 {
                boxes.extend_from_slice(&[variance[0]; 4]);
            } else {
                boxes.extend_from_slice(variance);
            }
        }
        boxes
    }
}

impl Layer for PriorBoxLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(2), Some(1))?;
        self.base.forbid_in_place(io)?;

        let param = &self.base.param.prior_box;
        if param.min_size.is_empty() {
            return Err(self.base.error("missing min_size"));
        }
        if !param.max_size.is_empty() && param.max_size.len() != param.min_size.len() {
            return Err(self.base.error("max_size must match min_size"));
        }
        if param.max_size.iter().zip(&param.min_size).any(|(max, min)| max <= min) {
            return Err(self.base.error("max_size must be larger than min_size"));
        }
        if param.variance.len() != 1 && param.variance.len() != 4 {
            return Err(self.base.error("expected 1 or 4 variance values"));
        }

        let mut ratios = vec![1.0f32];
        for &ratio in &param.aspect_ratio {
            if ratio <= 0.0 {
                return Err(self.base.error(format!("invalid aspect ratio {}", ratio)));
            }
            if ratios.iter().any(|&r| (r - ratio).abs() < 1e-6) {
                continue;
            }
            ratios.push(ratio);
            if param.flip {
                ratios.push(1.0 / ratio);
            }
        }
        self.aspect_ratios = ratios;
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let (feature, image) = (io.src(0), io.src(1));
        self.base.require_rank(feature, 4, "feature map")?;
        self.base.require_rank(image, 4, "image")?;

        let layer = (feature.shape()[2], feature.shape()[3]);
        let image = (image.shape()[2], image.shape()[3]);
        self.boxes = self.generate(layer, image);

        self.base.reshape_dst(io, 0, DType::F32, &[1, 2, self.boxes.len() / 2])?;
        io.dst(0).f32_data_mut().copy_from_slice(&self.boxes);
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        io.dst(0).f32_data_mut().copy_from_slice(&self.boxes);
    }
}
