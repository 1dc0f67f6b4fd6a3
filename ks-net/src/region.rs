use crate::tensor::Tensor;

/// A detected box in center form, with a class id and probability.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub id: usize,
    pub prob: f32,
}

/// The size of the network input as `(width, height)`, used by heads with anchors in input pixels.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct NetSize {
    pub width: usize,
    pub height: usize,
}

/// Capability of a layer whose output tensor describes detections.
pub trait RegionSource {
    /// Extract the candidates above `threshold` from `output`, with coordinates normalized to `[0, 1]`.
    fn candidates(&self, output: &Tensor, net: NetSize, threshold: f32) -> Vec<Region>;
}

impl Region {
    pub fn new(x: f32, y: f32, w: f32, h: f32, id: usize, prob: f32) -> Self {
        Region { x, y, w, h, id, prob }
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// Scale from normalized coordinates to image pixels.
    pub fn scaled(self, width: f32, height: f32) -> Region {
        Region {
            x: self.x * width,
            y: self.y * height,
            w: self.w * width,
            h: self.h * height,
            ..self
        }
    }
}

/// The signed overlap of two 1D segments given as `(center, size)`.
pub fn overlap(x1: f32, w1: f32, x2: f32, w2: f32) -> f32 {
    let left = f32::max(x1 - w1 / 2.0, x2 - w2 / 2.0);
    let right = f32::min(x1 + w1 / 2.0, x2 + w2 / 2.0);
    right - left
}

pub fn intersection(a: &Region, b: &Region) -> f32 {
    let w = overlap(a.x, a.w, b.x, b.w);
    let h = overlap(a.y, a.h, b.y, b.h);
    if w < 0.0 || h < 0.0 {
        0.0
    } else {
        w * h
    }
}

pub fn union(a: &Region, b: &Region) -> f32 {
    a.area() + b.area() - intersection(a, b)
}

/// Intersection over union.
pub fn relative_intersection(a: &Region, b: &Region) -> f32 {
    intersection(a, b) / union(a, b)
}

/// Greedy duplicate suppression across all detection outputs.
///
/// A candidate that overlaps an accepted region of the same class by at least `overlap`
/// replaces it if it is more probable and is dropped otherwise; anything else is appended.
#[derive(Debug, Clone)]
pub struct RegionMerger {
    overlap: f32,
    regions: Vec<Region>,
}

impl RegionMerger {
    pub fn new(overlap: f32) -> Self {
        RegionMerger {
            overlap,
            regions: vec![],
        }
    }

    pub fn push(&mut self, candidate: Region) {
        let existing = self
            .regions
            .iter_mut()
            .find(|r| r.id == candidate.id && relative_intersection(&candidate, r) >= self.overlap);

        match existing {
            Some(r) => {
                if candidate.prob > r.prob {
                    *r = candidate;
                }
            }
            None => self.regions.push(candidate),
        }
    }

    pub fn extend(&mut self, candidates: impl IntoIterator<Item = Region>) {
        for c in candidates {
            self.push(c);
        }
    }

    pub fn finish(self) -> Vec<Region> {
        self.regions
    }
}

pub(crate) fn logistic(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
