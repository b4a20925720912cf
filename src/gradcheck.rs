//! Numerical Gradient Checking
//!
//! Compares the analytic gradients from
//! [`FullyConnectedNet::loss_and_grads`] against centered finite differences
//! of the training loss:
//!
//! ```text
//! grad[i] ≈ (L(θ + h·e_i) - L(θ - h·e_i)) / 2h
//! ```
//!
//! The agreement measure is the maximum elementwise relative error
//!
//! ```text
//! rel_error(a, b) = max_i |a_i - b_i| / max(1e-8, |a_i| + |b_i|)
//! ```
//!
//! Run checks in `f64`; single precision cannot resolve the differences.
//! Dropout must be seeded, otherwise every loss evaluation draws new masks.
//!
//! Every loss evaluation is a training-mode pass, so it would fold the check
//! batch into batch-norm running statistics. The checks therefore run on a
//! clone and leave the caller's network untouched.
//!
//! ## Example
//!
//! ```rust
//! use fcnet::gradcheck::check_gradients;
//! use fcnet::{FullyConnectedNet, NetConfig, Tensor};
//! use rand::{rngs::StdRng, Rng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let config = NetConfig::new(vec![6]).with_input_dim(4).with_num_classes(3).with_weight_scale(5e-2);
//! let net: FullyConnectedNet<f64> = FullyConnectedNet::with_rng(config, &mut rng).unwrap();
//!
//! let x = Tensor::new((0..12).map(|_| rng.random::<f64>() - 0.5).collect(), vec![3, 4]);
//! for check in check_gradients(&net, &x, &[0, 2, 1], 1e-5).unwrap() {
//!     assert!(check.rel_error < 1e-5, "{} rel error {}", check.id, check.rel_error);
//! }
//! ```

use crate::error::NetError;
use crate::network::{FullyConnectedNet, ParamId};
use crate::tensor::{Scalar, Tensor};
use tracing::debug;

/// Outcome of checking one parameter
#[derive(Clone, Debug)]
pub struct GradCheck {
    pub id: ParamId,
    pub rel_error: f64,
}

/// Maximum elementwise relative error between two arrays of the same shape
pub fn rel_error<T: Scalar>(a: &Tensor<T>, b: &Tensor<T>) -> f64 {
    assert_eq!(a.shape, b.shape, "rel_error needs matching shapes");
    a.data
        .iter()
        .zip(&b.data)
        .map(|(&x, &y)| {
            let (x, y) = (x.as_f64(), y.as_f64());
            (x - y).abs() / (x.abs() + y.abs()).max(1e-8)
        })
        .fold(0.0, f64::max)
}

/// Centered finite-difference gradient of the training loss for one parameter
pub fn numerical_gradient<T: Scalar>(
    net: &FullyConnectedNet<T>,
    id: ParamId,
    x: &Tensor<T>,
    labels: &[usize],
    h: f64,
) -> Result<Tensor<T>, NetError> {
    let mut scratch = net.clone();
    finite_differences(&mut scratch, id, x, labels, h)
}

/// Perturb each element of one parameter of `net` in place, restoring it
/// after its two loss evaluations
fn finite_differences<T: Scalar>(
    net: &mut FullyConnectedNet<T>,
    id: ParamId,
    x: &Tensor<T>,
    labels: &[usize],
    h: f64,
) -> Result<Tensor<T>, NetError> {
    let shape = net
        .param(id)
        .ok_or_else(|| NetError::UnknownParam(id.to_string()))?
        .shape
        .clone();
    let size: usize = shape.iter().product();
    let step = T::from_f64(h);
    let two_h = T::from_f64(2.0 * h);

    let mut grad = Vec::with_capacity(size);
    for i in 0..size {
        let old = perturb(net, id, i, None)?;

        perturb(net, id, i, Some(old + step))?;
        let (plus, _) = net.loss_and_grads(x, labels)?;

        perturb(net, id, i, Some(old - step))?;
        let (minus, _) = net.loss_and_grads(x, labels)?;

        perturb(net, id, i, Some(old))?;
        grad.push((plus - minus) / two_h);
    }

    Ok(Tensor::new(grad, shape))
}

/// Read element `i` of a parameter, optionally overwriting it; returns the
/// value before any write.
fn perturb<T: Scalar>(
    net: &mut FullyConnectedNet<T>,
    id: ParamId,
    i: usize,
    value: Option<T>,
) -> Result<T, NetError> {
    let param = net
        .param_mut(id)
        .ok_or_else(|| NetError::UnknownParam(id.to_string()))?;
    let old = param.data[i];
    if let Some(value) = value {
        param.data[i] = value;
    }
    Ok(old)
}

/// Check every parameter of `net` on one batch
///
/// Results are in [`FullyConnectedNet::param_ids`] order.
pub fn check_gradients<T: Scalar>(
    net: &FullyConnectedNet<T>,
    x: &Tensor<T>,
    labels: &[usize],
    h: f64,
) -> Result<Vec<GradCheck>, NetError> {
    let mut scratch = net.clone();
    let (_, grads) = scratch.loss_and_grads(x, labels)?;

    let mut checks = Vec::new();
    for id in scratch.param_ids() {
        let analytic = grads
            .get(id)
            .ok_or_else(|| NetError::UnknownParam(id.to_string()))?;
        let numeric = finite_differences(&mut scratch, id, x, labels, h)?;
        let err = rel_error(analytic, &numeric);
        debug!(param = %id, rel_error = err, "gradient check");
        checks.push(GradCheck { id, rel_error: err });
    }
    Ok(checks)
}
