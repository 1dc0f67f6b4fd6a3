use rand::rngs::StdRng;
use rand::SeedableRng;

use ks_net::ftz::flush_to_zero_enabled;
use ks_net::network::Network;
use ks_net::param::{EltwiseOperation, LayerType, PoolingMethod};

use crate::root::utils::{assert_close, build, input, network_param, node, range_vec, rng_vec, with_weights};

fn set_input(network: &mut Network, values: &[f32]) {
    network.src_mut(0).f32_data_mut().copy_from_slice(values);
}

fn output(network: &Network, index: usize) -> Vec<f32> {
    network.dst()[index].f32_data().to_vec()
}

#[test]
fn leaky_relu() {
    let mut relu = node("relu", LayerType::Relu, &["data"], &["relu"]);
    relu.relu.negative_slope = 0.1;
    let mut network = build(network_param(vec![input("data", &[1, 4]), relu]), &[]);

    set_input(&mut network, &[-2.0, -1.0, 0.0, 1.5]);
    network.forward();
    assert_close(&output(&network, 0), &[-0.2, -0.1, 0.0, 1.5], 1e-6);
}

#[test]
fn random_relu() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut network = build(
        network_param(vec![
            input("data", &[2, 3, 5, 5]),
            node("relu", LayerType::Relu, &["data"], &["relu"]),
        ]),
        &[],
    );

    let values = rng_vec(2 * 3 * 5 * 5, &mut rng);
    set_input(&mut network, &values);
    network.forward();

    let expected = values.iter().map(|&x| x.max(0.0)).collect::<Vec<_>>();
    assert_close(&output(&network, 0), &expected, 0.0);
}

#[test]
fn in_place_chain() {
    let mut network = build(
        network_param(vec![
            input("data", &[1, 3]),
            node("double", LayerType::Eltwise, &["data", "data"], &["x"]),
            node("relu", LayerType::Relu, &["x"], &["x"]),
            node("sigmoid", LayerType::Sigmoid, &["x"], &["x"]),
        ]),
        &[],
    );

    set_input(&mut network, &[-1.0, 0.0, 2.0]);
    network.forward();

    let sigmoid = |x: f32| 1.0 / (1.0 + (-x).exp());
    assert_close(&output(&network, 0), &[0.5, 0.5, sigmoid(4.0)], 1e-6);

    // a second pass over unchanged inputs gives the same result
    network.forward();
    assert_close(&output(&network, 0), &[0.5, 0.5, sigmoid(4.0)], 1e-6);
}

#[test]
fn convolution() {
    let mut conv = node("conv", LayerType::Convolution, &["data"], &["conv"]);
    conv.convolution.pad = vec![1];
    let conv = with_weights(conv, &[vec![2, 1, 3, 3], vec![2]]);

    let mut weights = vec![1.0; 9];
    weights.extend_from_slice(&[0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    weights.extend_from_slice(&[0.5, -1.0]);

    let mut network = build(network_param(vec![input("data", &[1, 1, 3, 3]), conv]), &weights);
    assert_eq!(network.dst()[0].shape(), &[1, 2, 3, 3]);

    set_input(&mut network, &range_vec(9));
    network.forward();

    let expected = [
        8.5, 15.5, 12.5, 21.5, 36.5, 27.5, 20.5, 33.5, 24.5, //
        -1.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0,
    ];
    assert_close(&output(&network, 0), &expected, 1e-5);
}

#[test]
fn strided_grouped_convolution() {
    let mut conv = node("conv", LayerType::Convolution, &["data"], &["conv"]);
    conv.convolution.group = 2;
    conv.convolution.stride = vec![2];
    conv.convolution.bias_term = false;
    let conv = with_weights(conv, &[vec![2, 1, 1, 1]]);

    let mut network = build(network_param(vec![input("data", &[1, 2, 4, 4]), conv]), &[1.0, -2.0]);
    assert_eq!(network.dst()[0].shape(), &[1, 2, 2, 2]);

    set_input(&mut network, &range_vec(32));
    network.forward();

    let expected = [0.0, 2.0, 8.0, 10.0, -32.0, -36.0, -48.0, -52.0];
    assert_close(&output(&network, 0), &expected, 1e-5);
}

#[test]
fn inner_product() {
    let dense = with_weights(
        node("dense", LayerType::InnerProduct, &["data"], &["dense"]),
        &[vec![2, 3], vec![2]],
    );
    let weights = [1.0, 0.0, -1.0, 2.0, 1.0, 0.0, 0.5, 1.0];

    let mut network = build(network_param(vec![input("data", &[2, 3]), dense]), &weights);
    assert_eq!(network.dst()[0].shape(), &[2, 2]);

    set_input(&mut network, &range_vec(6));
    network.forward();
    assert_close(&output(&network, 0), &[-1.5, 2.0, -1.5, 11.0], 1e-5);
}

#[test]
fn concat_channels() {
    let mut network = build(
        network_param(vec![
            input("a", &[1, 2, 2]),
            input("b", &[1, 1, 2]),
            node("concat", LayerType::Concat, &["a", "b"], &["concat"]),
        ]),
        &[],
    );
    assert_eq!(network.dst()[0].shape(), &[1, 3, 2]);

    network.src_mut(0).f32_data_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
    network.src_mut(1).f32_data_mut().copy_from_slice(&[5.0, 6.0]);
    network.forward();
    assert_close(&output(&network, 0), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 0.0);
}

#[test]
fn softmax_over_channels() {
    let mut network = build(
        network_param(vec![
            input("data", &[1, 3, 2]),
            node("softmax", LayerType::Softmax, &["data"], &["prob"]),
        ]),
        &[],
    );

    set_input(&mut network, &[1.0, 0.0, 2.0, 0.0, 3.0, 0.0]);
    network.forward();

    let total = 1f32.exp() + 2f32.exp() + 3f32.exp();
    let expected = [
        1f32.exp() / total,
        1.0 / 3.0,
        2f32.exp() / total,
        1.0 / 3.0,
        3f32.exp() / total,
        1.0 / 3.0,
    ];
    assert_close(&output(&network, 0), &expected, 1e-6);
}

#[test]
fn pooling() {
    let mut max = node("max", LayerType::Pooling, &["data"], &["max"]);
    max.pooling.kernel = vec![2];
    max.pooling.stride = vec![2];
    let mut average = node("average", LayerType::Pooling, &["data"], &["average"]);
    average.pooling.method = PoolingMethod::Average;
    average.pooling.global_pooling = true;

    let mut network = build(network_param(vec![input("data", &[1, 1, 4, 4]), max, average]), &[]);
    assert_eq!(network.dst_names(), vec!["max", "average"]);
    assert_eq!(network.dst()[0].shape(), &[1, 1, 2, 2]);
    assert_eq!(network.dst()[1].shape(), &[1, 1, 1, 1]);

    set_input(&mut network, &range_vec(16));
    network.forward();
    assert_close(&output(&network, 0), &[5.0, 7.0, 13.0, 15.0], 0.0);
    assert_close(&output(&network, 1), &[7.5], 1e-6);
}

#[test]
fn eltwise_operations() {
    let mut product = node("product", LayerType::Eltwise, &["a", "b"], &["product"]);
    product.eltwise.operation = EltwiseOperation::Product;
    let mut weighted = node("weighted", LayerType::Eltwise, &["a", "b"], &["weighted"]);
    weighted.eltwise.coefficients = vec![2.0, -1.0];
    let mut max = node("max", LayerType::Eltwise, &["a", "b"], &["max"]);
    max.eltwise.operation = EltwiseOperation::Max;

    let mut network = build(
        network_param(vec![input("a", &[3]), input("b", &[3]), product, weighted, max]),
        &[],
    );

    network.src_mut(0).f32_data_mut().copy_from_slice(&[1.0, -2.0, 3.0]);
    network.src_mut(1).f32_data_mut().copy_from_slice(&[4.0, 5.0, -6.0]);
    network.forward();

    assert_close(&output(&network, 0), &[4.0, -10.0, -18.0], 0.0);
    assert_close(&output(&network, 1), &[-2.0, -9.0, 12.0], 0.0);
    assert_close(&output(&network, 2), &[4.0, 5.0, 3.0], 0.0);
}

#[test]
fn permute_and_flatten() {
    let mut permute = node("permute", LayerType::Permute, &["data"], &["permute"]);
    permute.permute.order = vec![0, 2, 1];

    let mut network = build(
        network_param(vec![
            input("data", &[1, 2, 3]),
            permute,
            node("flatten", LayerType::Flatten, &["permute"], &["flatten"]),
        ]),
        &[],
    );
    assert_eq!(network.dst()[0].shape(), &[1, 6]);

    set_input(&mut network, &range_vec(6));
    network.forward();
    assert_close(&output(&network, 0), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0], 0.0);
}

#[test]
fn const_operand() {
    let bias = with_weights(node("bias", LayerType::Const, &[], &["bias"]), &[vec![1, 3]]);

    let mut network = build(
        network_param(vec![
            input("data", &[1, 3]),
            bias,
            node("sum", LayerType::Eltwise, &["data", "bias"], &["sum"]),
        ]),
        &[10.0, 20.0, 30.0],
    );

    set_input(&mut network, &[1.0, 2.0, 3.0]);
    network.forward();
    assert_close(&output(&network, 0), &[11.0, 22.0, 33.0], 0.0);
}

#[test]
fn flush_to_zero_is_restored() {
    let before = flush_to_zero_enabled();
    let mut network = build(
        network_param(vec![
            input("data", &[4]),
            node("relu", LayerType::Relu, &["data"], &["relu"]),
        ]),
        &[],
    );
    network.forward();
    assert_eq!(flush_to_zero_enabled(), before);
}
