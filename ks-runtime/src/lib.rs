#![warn(missing_debug_implementations)]

//! Run detection networks built with `ks-net` on images.
//!
//! The [Detector] converts an image into the planar input tensor of the network,
//! runs it and collects the merged regions, scaled back to the original image size.
//!
//! ```no_run
//! # use ks_runtime::{Detector, Preprocess};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut detector = Detector::load("yolo.json", "yolo.bin", Preprocess::default())?;
//! let image = image::open("street.jpg")?.to_rgb8();
//!
//! for region in detector.detect(&image, 0.5, 0.45)? {
//!     println!("class {} at ({}, {}) with p={:.2}", region.id, region.x, region.y, region.prob);
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use image::imageops::{resize, FilterType};
use image::{Rgb, RgbImage};
use itertools::Itertools;
use tracing::debug;

use ks_net::network::Network;
use ks_net::param::LayerType;
use ks_net::region::Region;
use ks_net::result::{NetworkError, NetworkResult, Node};
use ks_net::tensor::{DType, Tensor};

/// How pixel values are mapped to network inputs: `(value - mean[c]) * scale`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Preprocess {
    pub scale: f32,
    pub mean: [f32; 3],
    /// Feed the channels in BGR order instead of RGB.
    pub bgr: bool,
}

impl Default for Preprocess {
    fn default() -> Self {
        Preprocess {
            scale: 1.0 / 255.0,
            mean: [0.0; 3],
            bgr: false,
        }
    }
}

/// Convert an image into a `[1, 3, H, W]` tensor.
pub fn image_to_tensor(image: &RgbImage, preprocess: &Preprocess) -> Tensor {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let mut tensor = Tensor::zeros(DType::F32, &[1, 3, height, width]);

    for (c, plane) in tensor.f32_data_mut().chunks_exact_mut((width * height).max(1)).enumerate() {
        let channel = if preprocess.bgr { 2 - c } else { c };
        for (value, pixel) in plane.iter_mut().zip(image.pixels()) {
            *value = (pixel[channel] as f32 - preprocess.mean[c]) * preprocess.scale;
        }
    }
    tensor
}

/// A loaded detection network together with its input conversion.
#[derive(Debug)]
pub struct Detector {
    network: Network,
    input: String,
    /// The input node declares no shape, so every image reshapes the network.
    dynamic: bool,
    preprocess: Preprocess,
}

impl Detector {
    pub fn load(
        param_path: impl AsRef<Path>,
        weight_path: impl AsRef<Path>,
        preprocess: Preprocess,
    ) -> NetworkResult<Self> {
        let mut network = Network::new();
        network.load(param_path, weight_path)?;
        Detector::new(network, preprocess)
    }

    /// Wrap an already loaded network, the first graph input receives the image.
    pub fn new(network: Network, preprocess: Preprocess) -> NetworkResult<Self> {
        let (input, dynamic) = network
            .param()
            .layers
            .iter()
            .find(|l| l.layer_type() == Some(LayerType::Input))
            .map(|l| (l.name.clone(), l.input.shape.is_empty()))
            .ok_or_else(|| NetworkError::UnknownInput("<image>".to_owned()))?;

        Ok(Detector {
            network,
            input,
            dynamic,
            preprocess,
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// The fixed `(width, height)` the network expects, `None` if it adapts to every image size.
    pub fn input_size(&self) -> Option<(usize, usize)> {
        if self.dynamic {
            return None;
        }
        let tensor = self.network.tensor(&self.input)?;
        match *tensor.shape() {
            [1, 3, height, width] if height > 0 && width > 0 => Some((width, height)),
            _ => None,
        }
    }

    /// Run the network on `image` and return the merged regions in image pixels.
    pub fn detect(&mut self, image: &RgbImage, threshold: f32, overlap: f32) -> NetworkResult<Vec<Region>> {
        let tensor = if self.dynamic {
            let tensor = image_to_tensor(image, &self.preprocess);
            self.network
                .reshape(&[self.input.as_str()], &[tensor.shape().to_vec()], &[])?;
            tensor
        } else {
            let (width, height) = self.input_size().ok_or_else(|| self.input_error())?;
            if (width, height) == (image.width() as usize, image.height() as usize) {
                image_to_tensor(image, &self.preprocess)
            } else {
                let resized = resize(image, width as u32, height as u32, FilterType::Triangle);
                image_to_tensor(&resized, &self.preprocess)
            }
        };

        let input = self
            .network
            .tensor_mut(&self.input)
            .ok_or_else(|| NetworkError::UnknownInput(self.input.clone()))?;
        input.copy_from(&tensor);
        self.network.forward();

        let regions = self
            .network
            .get_regions(image.width() as usize, image.height() as usize, threshold, overlap);
        debug!(
            "Found {} regions in {}x{} image: {:?}",
            regions.len(),
            image.width(),
            image.height(),
            regions.iter().map(|r| (r.id, r.prob)).collect_vec()
        );
        Ok(regions)
    }

    fn input_error(&self) -> NetworkError {
        let node = Node {
            name: self.input.clone(),
            layer_type: "Input".to_owned(),
        };
        NetworkError::InvalidShape(node, "image input must have shape [1, 3, H, W]".to_owned())
    }
}

const PALETTE: [[u8; 3]; 6] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
];

/// Draw the outline of every region onto `image`, colored by class.
pub fn draw_regions(image: &mut RgbImage, regions: &[Region]) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    let max_x = image.width() as f32 - 1.0;
    let max_y = image.height() as f32 - 1.0;

    for region in regions {
        let color = Rgb(PALETTE[region.id % PALETTE.len()]);
        let x0 = (region.x - region.w / 2.0).clamp(0.0, max_x) as u32;
        let x1 = (region.x + region.w / 2.0).clamp(0.0, max_x) as u32;
        let y0 = (region.y - region.h / 2.0).clamp(0.0, max_y) as u32;
        let y1 = (region.y + region.h / 2.0).clamp(0.0, max_y) as u32;

        for x in x0..=x1 {
            image.put_pixel(x, y0, color);
            image.put_pixel(x, y1, color);
        }
        for y in y0..=y1 {
            image.put_pixel(x0, y, color);
            image.put_pixel(x1, y, color);
        }
    }
}
