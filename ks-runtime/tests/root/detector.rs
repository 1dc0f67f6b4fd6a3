use image::{Rgb, RgbImage};

use ks_net::result::NetworkError;
use ks_runtime::{Detector, Preprocess};

use crate::root::files::write_net;

fn region_net(input_shape: &str) -> String {
    format!(
        r#"{{
        "name": "detector",
        "layers": [
            {{ "name": "data", "type": "Input", "dst": ["data"], "input": {{ "shape": {} }} }},
            {{ "name": "conv", "type": "Convolution", "src": ["data"], "dst": ["conv"],
               "convolution": {{ "output_num": 7, "kernel": [1] }}, "weight": [[7, 3, 1, 1], [7]] }},
            {{ "name": "region", "type": "Region", "src": ["conv"], "dst": ["region"],
               "region": {{ "classes": 2, "num": 1, "anchors": [1.0, 1.0] }} }}
        ]
    }}"#,
        input_shape
    )
}

/// The convolution ignores the image and produces a single confident class 0 box per cell.
fn region_weights() -> Vec<f32> {
    let mut weights = vec![0.0; 21];
    weights.extend_from_slice(&[0.0, 0.0, 0.0, 0.0, 10.0, 2.0, 0.0]);
    weights
}

fn expected_prob() -> f32 {
    let objectness = 1.0 / (1.0 + (-10f32).exp());
    objectness * 2f32.exp() / (2f32.exp() + 1.0)
}

fn gray(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))
}

#[test]
fn fixed_input_size() {
    let files = write_net(&region_net("[[1, 3, 1, 1]]"), &region_weights());
    let mut detector = Detector::load(&files.param, &files.weights, Preprocess::default()).unwrap();
    assert_eq!(detector.input_size(), Some((1, 1)));

    let regions = detector.detect(&gray(4, 2), 0.5, 0.45).unwrap();
    assert_eq!(regions.len(), 1);

    let region = regions[0];
    assert_eq!(region.id, 0);
    assert!((region.x - 2.0).abs() < 1e-4);
    assert!((region.y - 1.0).abs() < 1e-4);
    assert!((region.w - 4.0).abs() < 1e-4);
    assert!((region.h - 2.0).abs() < 1e-4);
    assert!((region.prob - expected_prob()).abs() < 1e-4);

    // the input size does not change between images
    assert_eq!(detector.input_size(), Some((1, 1)));
}

#[test]
fn dynamic_input_size() {
    let files = write_net(&region_net("[]"), &region_weights());
    let mut detector = Detector::load(&files.param, &files.weights, Preprocess::default()).unwrap();
    assert_eq!(detector.input_size(), None);

    let regions = detector.detect(&gray(2, 2), 0.5, 0.45).unwrap();
    assert_eq!(detector.network().src()[0].shape(), &[1, 3, 2, 2]);
    assert_eq!(detector.input_size(), None);

    let centers = regions.iter().map(|r| (r.x, r.y)).collect::<Vec<_>>();
    assert_eq!(centers, vec![(0.5, 0.5), (1.5, 0.5), (0.5, 1.5), (1.5, 1.5)]);
    for region in &regions {
        assert!((region.w - 1.0).abs() < 1e-4);
        assert!((region.h - 1.0).abs() < 1e-4);
    }

    // a second image with another size reshapes again
    let regions = detector.detect(&gray(3, 1), 0.5, 0.45).unwrap();
    assert_eq!(detector.network().src()[0].shape(), &[1, 3, 1, 3]);
    assert_eq!(regions.len(), 3);

    // and a third one of the first size again
    let regions = detector.detect(&gray(2, 2), 0.5, 0.45).unwrap();
    assert_eq!(detector.network().src()[0].shape(), &[1, 3, 2, 2]);
    assert_eq!(regions.len(), 4);
}

#[test]
fn batched_input_is_rejected() {
    let files = write_net(&region_net("[[2, 3, 1, 1]]"), &region_weights());
    let mut detector = Detector::load(&files.param, &files.weights, Preprocess::default()).unwrap();
    assert_eq!(detector.input_size(), None);

    let result = detector.detect(&gray(2, 2), 0.5, 0.45);
    assert!(matches!(result, Err(NetworkError::InvalidShape(node, _)) if node.name == "data"));
}

#[test]
fn missing_weights() {
    let files = write_net(&region_net("[[1, 3, 1, 1]]"), &[0.0; 4]);
    assert!(Detector::load(&files.param, &files.weights, Preprocess::default()).is_err());
}
