use byteorder::{LittleEndian, WriteBytesExt};
use itertools::Itertools;
use rand::Rng;

use ks_net::network::Network;
use ks_net::param::{LayerParam, LayerType, NetworkParam, Shape};
use ks_net::result::NetworkResult;

pub fn node(name: &str, ty: LayerType, src: &[&str], dst: &[&str]) -> LayerParam {
    LayerParam::new(name, ty, src, dst)
}

pub fn input(name: &str, shape: &[usize]) -> LayerParam {
    let mut param = LayerParam::new(name, LayerType::Input, &[], &[name]);
    if !shape.is_empty() {
        param.input.shape = vec![shape.to_vec()];
    }
    param
}

pub fn with_weights(mut param: LayerParam, shapes: &[Shape]) -> LayerParam {
    param.weight = shapes.to_vec();
    param
}

pub fn network_param(layers: Vec<LayerParam>) -> NetworkParam {
    NetworkParam {
        name: "test".to_owned(),
        layers,
        dst: vec![],
    }
}

pub fn weight_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.write_f32::<LittleEndian>(v).unwrap();
    }
    bytes
}

pub fn try_build(param: NetworkParam, weights: &[f32]) -> (Network, NetworkResult<()>) {
    let bytes = weight_bytes(weights);
    let mut network = Network::new();
    let result = network.load_from(param, &mut bytes.as_slice());
    (network, result)
}

pub fn build(param: NetworkParam, weights: &[f32]) -> Network {
    let (network, result) = try_build(param, weights);
    result.expect("Failed to load network");
    network
}

pub fn range_vec(len: usize) -> Vec<f32> {
    (0..len).map(|x| x as f32).collect_vec()
}

pub fn rng_vec(len: usize, rng: &mut impl Rng) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect_vec()
}

pub fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "Length mismatch");
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "Mismatch at {}: got {}, expected {}\n  actual: {:?}\n  expected: {:?}",
            i,
            a,
            e,
            actual,
            expected
        );
    }
}
