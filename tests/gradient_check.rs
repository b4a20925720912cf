//! Analytic gradients against centered finite differences, in `f64`, for
//! every combination of normalization and dropout.

use fcnet::gradcheck::{check_gradients, numerical_gradient, rel_error};
use fcnet::{FullyConnectedNet, NetConfig, Normalization, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const N: usize = 5;
const D: usize = 15;
const C: usize = 10;
const H: f64 = 1e-6;

fn base_config() -> NetConfig {
    NetConfig::new(vec![20, 30])
        .with_input_dim(D)
        .with_num_classes(C)
        .with_weight_scale(5e-2)
}

fn batch(rng: &mut StdRng) -> (Tensor<f64>, Vec<usize>) {
    let x = Tensor::new((0..N * D).map(|_| rng.random::<f64>() * 2.0 - 1.0).collect(), vec![N, D]);
    let labels = (0..N).map(|_| rng.random_range(0..C)).collect();
    (x, labels)
}

/// Per-element agreement `|a - n| <= atol + rtol * (|a| + |n|)`
#[derive(Clone, Copy)]
struct Tolerance {
    atol: f64,
    rtol: f64,
}

/// Affine-only networks: relative error below 1e-5 wherever the gradient is
/// large enough to rise above the finite-difference rounding noise.
const STRICT: Tolerance = Tolerance { atol: 1e-8, rtol: 1e-5 };

/// Normalized networks couple every sample through the batch statistics, and
/// the bias feeding a batch-norm layer has an analytic gradient of zero where
/// finite differences only see noise.
const NORMALIZED: Tolerance = Tolerance { atol: 1e-7, rtol: 1e-4 };

fn assert_gradients_match(config: NetConfig, seed: u64, tol: Tolerance) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut net: FullyConnectedNet<f64> = FullyConnectedNet::with_rng(config, &mut rng).unwrap();
    let (x, labels) = batch(&mut rng);

    let (_, grads) = net.loss_and_grads(&x, &labels).unwrap();
    for id in net.param_ids() {
        let analytic = grads.get(id).unwrap();
        let numeric = numerical_gradient(&net, id, &x, &labels, H).unwrap();
        assert_eq!(analytic.shape, numeric.shape, "{} gradient shape", id);

        for (i, (&a, &n)) in analytic.data.iter().zip(&numeric.data).enumerate() {
            let bound = tol.atol + tol.rtol * (a.abs() + n.abs());
            assert!(
                (a - n).abs() <= bound,
                "{}[{}]: analytic {} numeric {} (rel error {})",
                id,
                i,
                a,
                n,
                rel_error(analytic, &numeric)
            );
        }
    }
}

#[test]
fn test_plain_network() {
    assert_gradients_match(base_config(), 1, STRICT);
}

#[test]
fn test_plain_network_with_regularization() {
    assert_gradients_match(base_config().with_reg(3.14), 2, STRICT);
}

#[test]
fn test_batch_norm() {
    assert_gradients_match(base_config().with_normalization(Normalization::BatchNorm), 3, NORMALIZED);
}

#[test]
fn test_layer_norm() {
    assert_gradients_match(base_config().with_normalization(Normalization::LayerNorm), 4, NORMALIZED);
}

#[test]
fn test_seeded_dropout() {
    assert_gradients_match(base_config().with_dropout(0.5).with_seed(123), 5, STRICT);
}

#[test]
fn test_everything_combined() {
    let config = base_config()
        .with_normalization(Normalization::BatchNorm)
        .with_dropout(0.75)
        .with_seed(7)
        .with_reg(0.7);
    assert_gradients_match(config, 6, NORMALIZED);

    let config = base_config()
        .with_normalization(Normalization::LayerNorm)
        .with_dropout(0.75)
        .with_seed(8)
        .with_reg(0.7);
    assert_gradients_match(config, 7, NORMALIZED);
}

#[test]
fn test_check_gradients_reports_every_parameter() {
    let config = NetConfig::new(vec![6])
        .with_input_dim(4)
        .with_num_classes(3)
        .with_normalization(Normalization::LayerNorm);
    let mut rng = StdRng::seed_from_u64(11);
    let net: FullyConnectedNet<f64> = FullyConnectedNet::with_rng(config, &mut rng).unwrap();
    let x = Tensor::new((0..12).map(|_| rng.random::<f64>() - 0.5).collect(), vec![3, 4]);

    let checks = check_gradients(&net, &x, &[0, 2, 1], 1e-5).unwrap();
    let names: Vec<String> = checks.iter().map(|c| c.id.to_string()).collect();
    assert_eq!(names, vec!["W1", "b1", "gamma1", "beta1", "W2", "b2"]);
    assert!(checks.iter().all(|c| c.rel_error.is_finite()));
}

#[test]
fn test_numerical_gradient_leaves_network_untouched() {
    for normalization in [None, Some(Normalization::BatchNorm)] {
        let mut config = base_config();
        config.normalization = normalization;
        let mut rng = StdRng::seed_from_u64(12);
        let mut net: FullyConnectedNet<f64> = FullyConnectedNet::with_rng(config, &mut rng).unwrap();

        // Give batch norm non-trivial running statistics first
        let (train_x, train_labels) = batch(&mut rng);
        net.loss_and_grads(&train_x, &train_labels).unwrap();
        let before = net.clone();

        let (x, labels) = batch(&mut rng);
        for id in net.param_ids() {
            numerical_gradient(&net, id, &x, &labels, H).unwrap();
        }
        for id in net.param_ids() {
            assert_eq!(net.param(id), before.param(id), "{} changed", id);
        }
        assert_running_stats_unchanged(&net, &before);
    }
}

#[test]
fn test_check_gradients_keeps_running_stats() {
    let config = base_config().with_normalization(Normalization::BatchNorm);
    let mut rng = StdRng::seed_from_u64(13);
    let mut net: FullyConnectedNet<f64> = FullyConnectedNet::with_rng(config, &mut rng).unwrap();
    let (train_x, train_labels) = batch(&mut rng);
    net.loss_and_grads(&train_x, &train_labels).unwrap();
    let before = net.clone();

    let (x, labels) = batch(&mut rng);
    check_gradients(&net, &x, &labels, H).unwrap();

    assert_running_stats_unchanged(&net, &before);
    assert_eq!(net.scores(&x).unwrap(), before.scores(&x).unwrap());
}

fn assert_running_stats_unchanged(net: &FullyConnectedNet<f64>, before: &FullyConnectedNet<f64>) {
    for layer in 0..net.num_layers() {
        match (net.running_stats(layer), before.running_stats(layer)) {
            (Some(now), Some(then)) => {
                assert_eq!(now.mean(), then.mean(), "running mean of layer {}", layer);
                assert_eq!(now.var(), then.var(), "running var of layer {}", layer);
            }
            (None, None) => {}
            _ => panic!("layer {} changed normalization", layer),
        }
    }
}
