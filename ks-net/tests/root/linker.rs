use ks_net::param::{LayerType, MetaType};
use ks_net::result::NetworkError;

use crate::root::utils::{build, input, network_param, node, try_build};

#[test]
fn stages_follow_declaration_order() {
    let network = build(
        network_param(vec![
            input("data", &[1, 2, 3, 3]),
            node("relu", LayerType::Relu, &["data"], &["relu"]),
            node("sigmoid", LayerType::Sigmoid, &["relu"], &["sigmoid"]),
        ]),
        &[],
    );

    assert!(!network.is_empty());
    assert_eq!(network.stage_count(), 3);
    assert_eq!(network.input_stage_count(), 1);
    assert_eq!(network.src_names(), vec!["data"]);
    assert_eq!(network.dst_names(), vec!["sigmoid"]);
    assert_eq!(network.back()[0].param().name, "sigmoid");
}

#[test]
fn dangling_source() {
    let (network, result) = try_build(
        network_param(vec![
            input("data", &[1, 4]),
            node("relu", LayerType::Relu, &["missing"], &["relu"]),
        ]),
        &[],
    );

    match result {
        Err(NetworkError::DanglingSource(node, 0, name)) => {
            assert_eq!(node.name, "relu");
            assert_eq!(name, "missing");
        }
        other => panic!("Expected dangling source error, got {:?}", other),
    }
    assert!(network.is_empty());
    assert_eq!(network.stage_count(), 0);
    assert_eq!(network.allocated_tensors(), 0);
}

#[test]
fn source_must_be_produced_earlier() {
    let (network, result) = try_build(
        network_param(vec![
            input("data", &[1, 4]),
            node("first", LayerType::Relu, &["second"], &["first"]),
            node("second", LayerType::Relu, &["data"], &["second"]),
        ]),
        &[],
    );
    assert!(matches!(result, Err(NetworkError::DanglingSource(..))));
    assert!(network.is_empty());
}

#[test]
fn aliases_allocate_nothing() {
    let network = build(
        network_param(vec![
            input("data", &[1, 2, 2, 2]),
            node("conv_like", LayerType::Sigmoid, &["data"], &["x"]),
            node("relu", LayerType::Relu, &["x"], &["x"]),
            node("scale", LayerType::Relu, &["x"], &["x"]),
            node("out", LayerType::Sigmoid, &["x"], &["y"]),
        ]),
        &[],
    );

    // data, x and y plus the two scratch buffers
    assert_eq!(network.allocated_tensors(), 3 + 2);
    assert_eq!(network.dst_names(), vec!["y"]);
}

#[test]
fn duplicate_destination() {
    let (network, result) = try_build(
        network_param(vec![
            input("data", &[1, 4]),
            node("a", LayerType::Relu, &["data"], &["x"]),
            node("b", LayerType::Sigmoid, &["data"], &["x"]),
        ]),
        &[],
    );

    match result {
        Err(NetworkError::DuplicateDestination(node, name)) => {
            assert_eq!(node.name, "b");
            assert_eq!(name, "x");
        }
        other => panic!("Expected duplicate destination error, got {:?}", other),
    }
    assert!(network.is_empty());
}

#[test]
fn alias_only_at_same_position() {
    let (_, result) = try_build(
        network_param(vec![
            input("a", &[1, 4]),
            input("b", &[1, 4]),
            node("sum", LayerType::Eltwise, &["a", "b"], &["b"]),
        ]),
        &[],
    );
    assert!(matches!(result, Err(NetworkError::DuplicateDestination(..))));
}

#[test]
fn every_leaf_is_an_output() {
    let network = build(
        network_param(vec![
            input("data", &[1, 4]),
            node("a", LayerType::Relu, &["data"], &["a"]),
            node("b", LayerType::Sigmoid, &["data"], &["b"]),
            node("c", LayerType::Relu, &["a"], &["c"]),
            node("d", LayerType::Relu, &["b"], &["b"]),
        ]),
        &[],
    );

    // "b" is consumed by "d" but produced again in place, so it is a leaf
    assert_eq!(network.dst_names(), vec!["b", "c"]);
    let back = network.back().iter().map(|l| l.param().name.clone()).collect::<Vec<_>>();
    assert_eq!(back, vec!["d", "c"]);
}

#[test]
fn allowlist_order_and_filtering() {
    let mut param = network_param(vec![
        input("data", &[1, 4]),
        node("a", LayerType::Relu, &["data"], &["a"]),
        node("b", LayerType::Sigmoid, &["a"], &["b"]),
        node("c", LayerType::Sigmoid, &["a"], &["c"]),
    ]);
    param.dst = vec!["c".to_owned(), "a".to_owned(), "missing".to_owned(), "b".to_owned()];

    let network = build(param, &[]);
    assert_eq!(network.dst_names(), vec!["c", "b"]);
}

#[test]
fn unknown_type_fails_loading() {
    let mut layer = node("deconv", LayerType::Stub, &["data"], &["out"]);
    layer.layer_type = "Deconvolution".to_owned();
    let (network, result) = try_build(network_param(vec![input("data", &[1, 4]), layer]), &[]);

    assert!(matches!(result, Err(NetworkError::UnknownLayerType(node)) if node.layer_type == "Deconvolution"));
    assert!(network.is_empty());
}

#[test]
fn unsupported_type_fails_loading() {
    let (network, result) = try_build(
        network_param(vec![
            input("data", &[1, 4]),
            node("lrn", LayerType::Lrn, &["data"], &["out"]),
        ]),
        &[],
    );
    assert!(matches!(result, Err(NetworkError::UnsupportedLayerType(node)) if node.name == "lrn"));
    assert!(network.is_empty());
}

#[test]
fn input_stage_without_destination() {
    let mut layer = input("data", &[]);
    layer.dst.clear();
    let (_, result) = try_build(network_param(vec![layer]), &[]);
    assert!(matches!(result, Err(NetworkError::InvalidInputStage(..))));
}

#[test]
fn meta_input_is_an_input_stage() {
    let mut shape = node("shape", LayerType::Meta, &[], &["shape"]);
    shape.meta.meta_type = MetaType::Input;

    let network = build(
        network_param(vec![
            input("data", &[]),
            shape,
            node("reshape", LayerType::Reshape, &["data", "shape"], &["out"]),
        ]),
        &[],
    );
    assert_eq!(network.input_stage_count(), 2);
    assert_eq!(network.src_names(), vec!["data", "shape"]);
    assert_eq!(network.dst_names(), vec!["out"]);
}
