use ks_net::network::Network;
use ks_net::param::{LayerParam, LayerType};
use ks_net::region::{Region, RegionMerger};

use crate::root::utils::{assert_close, build, input, network_param, node};

fn region_values(regions: &[Region]) -> Vec<f32> {
    regions
        .iter()
        .flat_map(|r| [r.x, r.y, r.w, r.h, r.id as f32, r.prob])
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[test]
fn merge_duplicates() {
    let first = Region::new(10.0, 10.0, 4.0, 4.0, 0, 0.6);
    let second = Region::new(11.0, 10.0, 4.0, 4.0, 0, 0.8);

    let mut merger = RegionMerger::new(0.5);
    merger.extend([first, second]);
    assert_eq!(merger.finish(), vec![second]);

    let mut merger = RegionMerger::new(0.99);
    merger.extend([first, second]);
    assert_eq!(merger.finish(), vec![first, second]);
}

fn yolo_network() -> Network {
    let mut yolo = node("yolo", LayerType::Yolo, &["head"], &["yolo"]);
    yolo.yolo.classes = 2;
    yolo.yolo.mask = vec![1];
    yolo.yolo.anchors = vec![4.0, 4.0, 16.0, 8.0];

    build(
        network_param(vec![input("data", &[1, 3, 32, 32]), input("head", &[1, 7, 2, 2]), yolo]),
        &[],
    )
}

/// Head values with a single confident class 0 detection in the bottom right cell.
fn yolo_head() -> Vec<f32> {
    let cells = 4;
    let mut values = vec![0.0; 7 * cells];
    for location in 0..cells {
        values[4 * cells + location] = -10.0;
    }
    values[4 * cells + 3] = 10.0;
    values[5 * cells + 3] = 10.0;
    values[6 * cells + 3] = -10.0;
    values
}

#[test]
fn yolo_regions() {
    let mut network = yolo_network();
    assert_eq!(network.src_names(), vec!["data", "head"]);
    assert_eq!(network.net_size().width, 32);
    assert_eq!(network.net_size().height, 32);

    network.src_mut(1).f32_data_mut().copy_from_slice(&yolo_head());
    network.forward();

    let regions = network.get_regions(200, 100, 0.5, 0.45);
    let prob = sigmoid(10.0) * sigmoid(10.0);
    assert_close(&region_values(&regions), &[150.0, 75.0, 100.0, 25.0, 0.0, prob], 1e-4);

    // extraction does not modify the network
    assert_eq!(network.get_regions(200, 100, 0.5, 0.45), regions);
}

#[test]
fn yolo_regions_below_threshold() {
    let mut network = yolo_network();
    network.src_mut(1).f32_data_mut().copy_from_slice(&yolo_head());
    network.forward();
    assert!(network.get_regions(200, 100, 0.99999, 0.45).is_empty());
}

fn region_head(name: &str, dst: &str) -> LayerParam {
    let mut region = node(name, LayerType::Region, &["head"], &[dst]);
    region.region.classes = 2;
    region.region.num = 1;
    region.region.anchors = vec![1.0, 1.0];
    region
}

#[test]
fn region_heads_are_merged() {
    let mut network = build(
        network_param(vec![
            input("head", &[1, 7, 1, 1]),
            region_head("first", "first"),
            region_head("second", "second"),
        ]),
        &[],
    );
    assert_eq!(network.dst_names(), vec!["first", "second"]);

    network.src_mut(0).f32_data_mut().copy_from_slice(&[0.0, 0.0, 0.0, 0.0, 10.0, 2.0, 0.0]);
    network.forward();

    let class = 2f32.exp() / (2f32.exp() + 1.0);
    let expected = [50.0, 50.0, 100.0, 100.0, 0.0, sigmoid(10.0) * class];

    // both heads find the same region, only one survives
    let regions = network.get_regions(100, 100, 0.5, 0.45);
    assert_close(&region_values(&regions), &expected, 1e-4);

    // restricting the outputs to a single head gives the same result
    network.reshape(&[], &[], &["second"]).unwrap();
    network.forward();
    let regions = network.get_regions(100, 100, 0.5, 0.45);
    assert_close(&region_values(&regions), &expected, 1e-4);
}

#[test]
fn detection_output_regions() {
    let mut detection = node("detection", LayerType::DetectionOutput, &["loc", "conf", "priors"], &["detection"]);
    detection.detection_output.num_classes = 2;
    detection.detection_output.nms.nms_threshold = 0.45;

    let mut network = build(
        network_param(vec![
            input("loc", &[1, 8]),
            input("conf", &[1, 4]),
            input("priors", &[1, 2, 8]),
            detection,
        ]),
        &[],
    );
    assert_eq!(network.dst()[0].shape(), &[1, 1, 0, 7]);

    network.src_mut(1).f32_data_mut().copy_from_slice(&[0.1, 0.9, 0.4, 0.6]);
    network.src_mut(2).f32_data_mut().copy_from_slice(&[
        0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 1.0, 1.0, //
        0.1, 0.1, 0.2, 0.2, 0.1, 0.1, 0.2, 0.2,
    ]);
    network.forward();

    let detections = network.dst()[0];
    assert_eq!(detections.shape(), &[1, 1, 2, 7]);
    assert_close(
        detections.f32_data(),
        &[
            0.0, 1.0, 0.9, 0.0, 0.0, 0.5, 0.5, //
            0.0, 1.0, 0.6, 0.5, 0.5, 1.0, 1.0,
        ],
        1e-6,
    );

    let regions = network.get_regions(100, 100, 0.5, 0.45);
    assert_close(
        &region_values(&regions),
        &[25.0, 25.0, 50.0, 50.0, 1.0, 0.9, 75.0, 75.0, 50.0, 50.0, 1.0, 0.6],
        1e-4,
    );
}

#[test]
fn overlapping_detections_are_suppressed() {
    let mut detection = node("detection", LayerType::DetectionOutput, &["loc", "conf", "priors"], &["detection"]);
    detection.detection_output.num_classes = 2;
    detection.detection_output.nms.nms_threshold = 0.45;

    let mut network = build(
        network_param(vec![
            input("loc", &[1, 8]),
            input("conf", &[1, 4]),
            input("priors", &[1, 2, 8]),
            detection,
        ]),
        &[],
    );

    network.src_mut(1).f32_data_mut().copy_from_slice(&[0.1, 0.7, 0.1, 0.8]);
    network.src_mut(2).f32_data_mut().copy_from_slice(&[
        0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.5, 0.6, //
        0.1, 0.1, 0.2, 0.2, 0.1, 0.1, 0.2, 0.2,
    ]);
    network.forward();

    let detections = network.dst()[0];
    assert_eq!(detections.shape(), &[1, 1, 1, 7]);
    assert_close(&detections.f32_data()[..3], &[0.0, 1.0, 0.8], 1e-6);
}
