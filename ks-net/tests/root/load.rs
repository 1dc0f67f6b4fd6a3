use std::fs;

use tempfile::TempDir;

use ks_net::network::Network;
use ks_net::param::{LayerType, NetworkParam};
use ks_net::result::NetworkError;

use crate::root::utils::{assert_close, input, network_param, node, try_build, weight_bytes, with_weights};

fn scale_param() -> NetworkParam {
    let scale = with_weights(node("scale", LayerType::Scale, &["data"], &["scale"]), &[vec![2]]);
    network_param(vec![input("data", &[1, 2, 1, 2]), scale])
}

fn write_files(dir: &TempDir, param: &NetworkParam, weights: &[f32]) -> (String, String) {
    let param_path = dir.path().join("net.json");
    let weight_path = dir.path().join("net.bin");
    fs::write(&param_path, param.to_json()).unwrap();
    fs::write(&weight_path, weight_bytes(weights)).unwrap();
    (
        param_path.to_str().unwrap().to_owned(),
        weight_path.to_str().unwrap().to_owned(),
    )
}

#[test]
fn load_from_files() {
    let dir = TempDir::new().unwrap();
    let (param_path, weight_path) = write_files(&dir, &scale_param(), &[2.0, -1.0]);

    let mut network = Network::new();
    network.load(&param_path, &weight_path).unwrap();
    assert!(!network.is_empty());
    assert_eq!(network.param(), &scale_param());

    network.src_mut(0).f32_data_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
    network.forward();
    assert_close(network.dst()[0].f32_data(), &[2.0, 4.0, -3.0, -4.0], 0.0);
}

#[test]
fn load_from_json_text() {
    let json = r#"{
        "name": "tiny",
        "layers": [
            { "name": "data", "type": "Input", "dst": ["data"], "input": { "shape": [[1, 4]] } },
            { "name": "clip", "type": "RestrictRange", "src": ["data"], "dst": ["clip"],
              "restrict_range": { "lower": -1.0, "upper": 1.0 } }
        ]
    }"#;

    let param = NetworkParam::from_json(json).unwrap();
    let mut network = Network::new();
    network.load_from(param, &mut std::io::empty()).unwrap();

    network.src_mut(0).f32_data_mut().copy_from_slice(&[-3.0, -0.5, 0.5, 3.0]);
    network.forward();
    assert_close(network.dst()[0].f32_data(), &[-1.0, -0.5, 0.5, 1.0], 0.0);
}

#[test]
fn short_weight_stream() {
    let (network, result) = try_build(scale_param(), &[2.0]);
    match result {
        Err(NetworkError::WeightsExhausted(node, 0)) => assert_eq!(node.name, "scale"),
        other => panic!("Expected exhausted weights, got {:?}", other),
    }
    assert!(network.is_empty());
}

#[test]
fn trailing_weights_are_ignored() {
    let (network, result) = try_build(scale_param(), &[2.0, -1.0, 5.0]);
    result.unwrap();
    assert!(!network.is_empty());
}

#[test]
fn failed_load_clears_previous_network() {
    let dir = TempDir::new().unwrap();
    let (param_path, weight_path) = write_files(&dir, &scale_param(), &[2.0, -1.0]);

    let mut network = Network::new();
    network.load(&param_path, &weight_path).unwrap();
    assert_eq!(network.stage_count(), 2);

    fs::write(&weight_path, weight_bytes(&[1.0])).unwrap();
    assert!(network.load(&param_path, &weight_path).is_err());
    assert!(network.is_empty());
    assert_eq!(network.stage_count(), 0);
    assert!(network.dst().is_empty());
}

#[test]
fn missing_files() {
    let dir = TempDir::new().unwrap();
    let (param_path, _) = write_files(&dir, &scale_param(), &[]);
    let missing = dir.path().join("missing.bin");

    let mut network = Network::new();
    let result = network.load(&param_path, &missing);
    assert!(matches!(result, Err(NetworkError::IO(path, _)) if path == missing));
    assert!(network.is_empty());

    let result = network.load(dir.path().join("missing.json"), &missing);
    assert!(matches!(result, Err(NetworkError::IO(..))));
}

#[test]
fn malformed_description() {
    let dir = TempDir::new().unwrap();
    let param_path = dir.path().join("net.json");
    fs::write(&param_path, "{ \"layers\": 3 }").unwrap();

    let mut network = Network::new();
    let result = network.load(&param_path, dir.path().join("net.bin"));
    assert!(matches!(result, Err(NetworkError::Parse(Some(path), _)) if path == param_path));
}

#[test]
fn display_lists_stages() {
    let (network, result) = try_build(scale_param(), &[2.0, -1.0]);
    result.unwrap();

    let text = network.to_string();
    assert!(text.contains("inputs: [\"data\"]"));
    assert!(text.contains("outputs: [\"scale\"]"));
    assert!(text.contains("Scale 'scale'"));
}

#[test]
fn debug_print_dumps_every_stage() {
    let (mut network, result) = try_build(scale_param(), &[2.0, -1.0]);
    result.unwrap();

    let mut buffer = vec![];
    network.debug_print(&mut buffer, true).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert!(text.contains("Layer: data : Input"));
    assert!(text.contains("Layer: scale : Scale"));
    assert!(text.contains("weight[0]"));
}

#[test]
fn oversized_weight_shape() {
    let constant = with_weights(node("huge", LayerType::Const, &[], &["huge"]), &[vec![1 << 62]]);
    let (network, result) = try_build(network_param(vec![constant]), &[1.0; 4]);
    assert!(matches!(result, Err(NetworkError::InvalidParam(node, _)) if node.name == "huge"));
    assert!(network.is_empty());
}

#[test]
fn large_weight_shape_on_short_stream() {
    let constant = with_weights(node("large", LayerType::Const, &[], &["large"]), &[vec![1 << 40]]);
    let (network, result) = try_build(network_param(vec![constant]), &[1.0; 4]);
    assert!(matches!(result, Err(NetworkError::WeightsExhausted(node, 0)) if node.name == "large"));
    assert!(network.is_empty());
}

#[test]
fn oversized_input_shape() {
    let (network, result) = try_build(network_param(vec![input("data", &[1 << 62])]), &[]);
    assert!(matches!(result, Err(NetworkError::InvalidShape(node, _)) if node.name == "data"));
    assert!(network.is_empty());

    let (_, result) = try_build(network_param(vec![input("data", &[1 << 40, 1 << 40])]), &[]);
    assert!(matches!(result, Err(NetworkError::InvalidShape(..))));
}
