use std::cmp::Ordering;

use itertools::Itertools;

use crate::layer::{Layer, LayerBase};
use crate::region::{NetSize, Region, RegionSource};
use crate::result::NetworkResult;
use crate::table::{ScratchPool, StageIo};
use crate::tensor::{DType, Tensor};

/// The number of values in a single detection row: `[image, label, score, xmin, ymin, xmax, ymax]`.
pub const DETECTION_ROW: usize = 7;

/// Box in corner form, normalized to the image size.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CornerBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl CornerBox {
    fn from_slice(values: &[f32]) -> Self {
        CornerBox {
            xmin: values[0],
            ymin: values[1],
            xmax: values[2],
            ymax: values[3],
        }
    }

    pub fn area(&self) -> f32 {
        if self.xmax < self.xmin || self.ymax < self.ymin {
            0.0
        } else {
            (self.xmax - self.xmin) * (self.ymax - self.ymin)
        }
    }

    /// Intersection over union of two corner-form boxes.
    pub fn jaccard(&self, other: &CornerBox) -> f32 {
        let inter = CornerBox {
            xmin: self.xmin.max(other.xmin),
            ymin: self.ymin.max(other.ymin),
            xmax: self.xmax.min(other.xmax),
            ymax: self.ymax.min(other.ymax),
        };
        let inter = inter.area();
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }

    /// Decode a center-size encoded location relative to this prior.
    pub fn decode(&self, variance: &[f32], loc: &[f32]) -> CornerBox {
        let (pw, ph) = (self.xmax - self.xmin, self.ymax - self.ymin);
        let (pcx, pcy) = ((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0);

        let cx = variance[0] * loc[0] * pw + pcx;
        let cy = variance[1] * loc[1] * ph + pcy;
        let w = (variance[2] * loc[2]).exp() * pw;
        let h = (variance[3] * loc[3]).exp() * ph;

        CornerBox {
            xmin: cx - w / 2.0,
            ymin: cy - h / 2.0,
            xmax: cx + w / 2.0,
            ymax: cy + h / 2.0,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Detection {
    label: usize,
    score: f32,
    bbox: CornerBox,
}

/// The SSD detection head: decodes locations against the priors,
/// runs per-class non-maximum suppression and keeps the best `keep_top_k` detections.
///
/// Sources are the locations `[N, priors * 4]`, the confidences `[N, priors * classes]`
/// and the output of a `PriorBox` layer. The destination holds one row per detection
/// and is resized by every forward pass.
#[derive(Debug)]
pub struct DetectionOutputLayer {
    base: LayerBase,
    priors: usize,
}

impl DetectionOutputLayer {
    pub fn new(base: LayerBase) -> Self {
        DetectionOutputLayer { base, priors: 0 }
    }

    fn location_classes(&self) -> usize {
        let param = &self.base.param.detection_output;
        if param.share_location {
            1
        } else {
            param.num_classes
        }
    }

    fn detect_image(&self, loc: &[f32], conf: &[f32], priors: &Tensor) -> Vec<Detection> {
        let param = &self.base.param.detection_output;
        let classes = param.num_classes;
        let loc_classes = self.location_classes();

        let prior_data = priors.f32_data();
        let variances = &prior_data[self.priors * 4..];
        let unit = [1.0; 4];

        let decode = |p: usize, c: usize| {
            let prior = CornerBox::from_slice(&prior_data[p * 4..]);
            let variance = if param.variance_encoded_in_target { &unit[..] } else { &variances[p * 4..p * 4 + 4] };
            let loc_class = if param.share_location { 0 } else { c };
            prior.decode(variance, &loc[(p * loc_classes + loc_class) * 4..])
        };

        let mut detections = vec![];
        for class in 0..classes {
            if class as i64 == param.background_label_id {
                continue;
            }

            let mut candidates = (0..self.priors)
                .map(|p| (p, conf[p * classes + class]))
                .filter(|&(_, score)| score > param.confidence_threshold)
                .collect_vec();
            candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            if param.nms.top_k > 0 {
                candidates.truncate(param.nms.top_k);
            }

            let mut kept: Vec<Detection> = vec![];
            for (p, score) in candidates {
                let bbox = decode(p, class);
                if kept.iter().all(|k| k.bbox.jaccard(&bbox) <= param.nms.nms_threshold) {
                    kept.push(Detection {
                        label: class,
                        score,
                        bbox,
                    });
                }
            }
            detections.extend(kept);
        }

        if param.keep_top_k > 0 && detections.len() > param.keep_top_k {
            detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
            detections.truncate(param.keep_top_k);
            detections.sort_by_key(|d| d.label);
        }
        detections
    }
}

impl Layer for DetectionOutputLayer {
    layer_base!();

    fn setup(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        self.base.require_io(io, Some(3), Some(1))?;
        self.base.forbid_in_place(io)?;
        if self.base.param.detection_output.num_classes == 0 {
            return Err(self.base.error("num_classes must be positive"));
        }
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, _: &mut ScratchPool) -> NetworkResult<()> {
        let (loc, conf, priors) = (io.src(0), io.src(1), io.src(2));
        for (tensor, what) in [(loc, "locations"), (conf, "confidences"), (priors, "priors")] {
            self.base.require_dtype(tensor, DType::F32, what)?;
        }
        if priors.rank() != 3 || priors.shape()[1] != 2 || priors.shape()[2] % 4 != 0 {
            return Err(self.base.shape_error(format!("invalid prior shape {:?}", priors)));
        }

        let prior_count = priors.shape()[2] / 4;
        let batch = loc.shape().first().copied().unwrap_or(0);
        let classes = self.base.param.detection_output.num_classes;
        if loc.size() != batch * prior_count * 4 * self.location_classes() {
            return Err(self.base.shape_error(format!("{:?} does not match {} priors", loc, prior_count)));
        }
        if conf.size() != batch * prior_count * classes {
            return Err(self.base.shape_error(format!(
                "{:?} does not match {} priors and {} classes",
                conf, prior_count, classes
            )));
        }

        self.priors = prior_count;
        self.base.reshape_dst(io, 0, DType::F32, &[1, 1, 0, DETECTION_ROW])?;
        Ok(())
    }

    fn forward(&mut self, io: &mut StageIo, _: &mut ScratchPool) {
        let loc_classes = self.location_classes();
        let classes = self.base.param.detection_output.num_classes;

        let rows = io.compute(0, |srcs, _| {
            let (loc, conf, priors) = (srcs[0].f32_data(), srcs[1].f32_data(), srcs[2]);
            let loc_size = self.priors * 4 * loc_classes;
            let conf_size = self.priors * classes;

            loc.chunks_exact(loc_size.max(1))
                .zip(conf.chunks_exact(conf_size.max(1)))
                .enumerate()
                .flat_map(|(image, (loc, conf))| {
                    self.detect_image(loc, conf, priors).into_iter().map(move |d| {
                        [
                            image as f32,
                            d.label as f32,
                            d.score,
                            d.bbox.xmin,
                            d.bbox.ymin,
                            d.bbox.xmax,
                            d.bbox.ymax,
                        ]
                    })
                })
                .collect_vec()
        });

        // the row count is bounded by the candidate count, which reshape already sized
        let dst = io.dst(0);
        if dst.reshape_as(DType::F32, &[1, 1, rows.len(), DETECTION_ROW]).is_ok() {
            dst.f32_data_mut().copy_from_slice(rows.concat().as_slice());
        }
    }

    fn as_region_source(&self) -> Option<&dyn RegionSource> {
        Some(self)
    }
}

impl RegionSource for DetectionOutputLayer {
    fn candidates(&self, output: &Tensor, _: NetSize, threshold: f32) -> Vec<Region> {
        let data = match output.as_f32() {
            Some(_) => output.f32_data(),
            None => return vec![],
        };

        data.chunks_exact(DETECTION_ROW)
            .filter(|row| row[1] >= 0.0 && row[2] > threshold)
            .map(|row| {
                let (xmin, ymin, xmax, ymax) = (row[3], row[4], row[5], row[6]);
                Region::new(
                    (xmin + xmax) / 2.0,
                    (ymin + ymax) / 2.0,
                    xmax - xmin,
                    ymax - ymin,
                    row[1] as usize,
                    row[2],
                )
            })
            .collect()
    }
}
