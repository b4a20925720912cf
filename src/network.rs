//! Fully-Connected Network
//!
//! A classifier with an arbitrary number of hidden layers, ReLU
//! nonlinearities, optional batch/layer normalization and dropout, and a
//! softmax loss. For a network with L affine layers the architecture is
//!
//! ```text
//! {affine - [batch/layer norm] - relu - [dropout]} x (L - 1) - affine - softmax
//! ```
//!
//! ## Parameters
//!
//! Parameters live in an indexed sequence of per-layer structures rather than
//! a string-keyed map. [`ParamId`] addresses a single array (`layer`, `kind`)
//! and displays with the conventional names (`W1`, `b1`, `gamma1`, `beta1`,
//! 1-based) for logging.
//!
//! ## Loss
//!
//! [`FullyConnectedNet::loss`] is the single runtime entry point:
//!
//! - without labels it runs a test-time forward pass and returns the scores
//! - with labels it runs a training-time forward and backward pass and returns
//!   the loss together with a gradient for every parameter
//!
//! ## Example
//!
//! ```rust
//! use fcnet::{FullyConnectedNet, NetConfig, Output, Tensor};
//!
//! let config = NetConfig::new(vec![20]).with_input_dim(10).with_num_classes(3);
//! let mut net: FullyConnectedNet<f64> = FullyConnectedNet::new(config).unwrap();
//!
//! let x = Tensor::zeros(vec![4, 10]);
//! match net.loss(&x, Some(&[0, 1, 2, 0][..])).unwrap() {
//!     Output::Loss { loss, grads } => {
//!         assert!(loss > 0.0);
//!         assert_eq!(grads.layers.len(), 2);
//!     }
//!     Output::Scores(_) => unreachable!(),
//! }
//! ```

use crate::config::{NetConfig, Normalization};
use crate::error::NetError;
use crate::layers::{
    relu_backward, relu_forward, softmax_loss, Affine, AffineCache, BatchNorm, BatchNormCache,
    Dropout, DropoutCache, LayerNorm, LayerNormCache, Mode, RunningStats,
};
use crate::tensor::{Scalar, Tensor};
use rand::Rng;
use std::fmt;
use tracing::{debug, info};

/// Which array of a layer a [`ParamId`] refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Weight,
    Bias,
    /// Normalization scale (gamma)
    Scale,
    /// Normalization shift (beta)
    Shift,
}

/// Address of one parameter array
///
/// `layer` is 0-based; the output layer is `num_layers - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamId {
    pub layer: usize,
    pub kind: ParamKind,
}

impl ParamId {
    pub fn new(layer: usize, kind: ParamKind) -> Self {
        Self { layer, kind }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ParamKind::Weight => "W",
            ParamKind::Bias => "b",
            ParamKind::Scale => "gamma",
            ParamKind::Shift => "beta",
        };
        write!(f, "{}{}", prefix, self.layer + 1)
    }
}

/// Normalization strategy of one hidden layer, fixed at construction
#[derive(Clone, Debug)]
pub enum Norm<T: Scalar> {
    Identity,
    Batch(BatchNorm<T>),
    Layer(LayerNorm<T>),
}

impl<T: Scalar> Norm<T> {
    fn new(normalization: Option<Normalization>, features: usize) -> Self {
        match normalization {
            None => Norm::Identity,
            Some(Normalization::BatchNorm) => Norm::Batch(BatchNorm::new(features)),
            Some(Normalization::LayerNorm) => Norm::Layer(LayerNorm::new(features)),
        }
    }

    fn forward(&mut self, x: Tensor<T>, mode: Mode) -> (Tensor<T>, NormCache<T>) {
        match self {
            Norm::Identity => (x, NormCache::Identity),
            Norm::Batch(bn) => {
                let (y, cache) = bn.forward(&x, mode);
                (y, NormCache::Batch(cache))
            }
            Norm::Layer(ln) => {
                let (y, cache) = ln.forward(&x);
                (y, NormCache::Layer(cache))
            }
        }
    }

    /// Test-mode normalization; batch norm reads its running statistics
    fn infer(&self, x: Tensor<T>) -> Tensor<T> {
        match self {
            Norm::Identity => x,
            Norm::Batch(bn) => bn.infer(&x),
            Norm::Layer(ln) => ln.forward(&x).0,
        }
    }

    /// Returns the input gradient and, for normalized layers, `(grad_gamma, grad_beta)`
    fn backward(&self, grad_out: Tensor<T>, cache: &NormCache<T>) -> (Tensor<T>, Option<(Tensor<T>, Tensor<T>)>) {
        match (self, cache) {
            (Norm::Identity, NormCache::Identity) => (grad_out, None),
            (Norm::Batch(bn), NormCache::Batch(cache)) => {
                let grads = bn.backward(&grad_out, cache);
                (grads.x, Some((grads.gamma, grads.beta)))
            }
            (Norm::Layer(ln), NormCache::Layer(cache)) => {
                let grads = ln.backward(&grad_out, cache);
                (grads.x, Some((grads.gamma, grads.beta)))
            }
            _ => unreachable!("normalization cache does not match its layer"),
        }
    }

    fn scale_shift(&self) -> Option<(&Tensor<T>, &Tensor<T>)> {
        match self {
            Norm::Identity => None,
            Norm::Batch(bn) => Some((&bn.gamma, &bn.beta)),
            Norm::Layer(ln) => Some((&ln.gamma, &ln.beta)),
        }
    }

    fn scale_shift_mut(&mut self) -> Option<(&mut Tensor<T>, &mut Tensor<T>)> {
        match self {
            Norm::Identity => None,
            Norm::Batch(bn) => Some((&mut bn.gamma, &mut bn.beta)),
            Norm::Layer(ln) => Some((&mut ln.gamma, &mut ln.beta)),
        }
    }
}

enum NormCache<T: Scalar> {
    Identity,
    Batch(BatchNormCache<T>),
    Layer(LayerNormCache<T>),
}

/// One `affine - [norm] - relu` block
#[derive(Clone, Debug)]
pub struct HiddenLayer<T: Scalar> {
    pub affine: Affine<T>,
    pub norm: Norm<T>,
}

/// Everything the backward pass needs from one hidden layer
struct HiddenCache<T: Scalar> {
    affine: AffineCache<T>,
    norm: NormCache<T>,
    /// ReLU input; its sign pattern gates the gradient
    pre_activation: Tensor<T>,
    dropout: Option<DropoutCache<T>>,
}

/// Gradients of one layer, same shapes as its parameters
#[derive(Clone, Debug)]
pub struct LayerGradients<T: Scalar> {
    pub weight: Tensor<T>,
    pub bias: Tensor<T>,
    pub gamma: Option<Tensor<T>>,
    pub beta: Option<Tensor<T>>,
}

/// Gradients for every parameter, indexed like the network's layers
#[derive(Clone, Debug)]
pub struct Gradients<T: Scalar> {
    pub layers: Vec<LayerGradients<T>>,
}

impl<T: Scalar> Gradients<T> {
    /// Gradient for one parameter
    pub fn get(&self, id: ParamId) -> Option<&Tensor<T>> {
        let layer = self.layers.get(id.layer)?;
        match id.kind {
            ParamKind::Weight => Some(&layer.weight),
            ParamKind::Bias => Some(&layer.bias),
            ParamKind::Scale => layer.gamma.as_ref(),
            ParamKind::Shift => layer.beta.as_ref(),
        }
    }

    /// Every gradient with its id, in layer order
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Tensor<T>)> + '_ {
        self.layers.iter().enumerate().flat_map(|(i, layer)| {
            [
                Some((ParamId::new(i, ParamKind::Weight), &layer.weight)),
                Some((ParamId::new(i, ParamKind::Bias), &layer.bias)),
                layer.gamma.as_ref().map(|g| (ParamId::new(i, ParamKind::Scale), g)),
                layer.beta.as_ref().map(|b| (ParamId::new(i, ParamKind::Shift), b)),
            ]
            .into_iter()
            .flatten()
        })
    }

    /// L2 norm over all gradient values: √(Σ g²)
    pub fn global_norm(&self) -> f64 {
        self.iter()
            .map(|(_, g)| g.sum_squares().as_f64())
            .sum::<f64>()
            .sqrt()
    }
}

/// Result of [`FullyConnectedNet::loss`]
#[derive(Clone, Debug)]
pub enum Output<T: Scalar> {
    /// Test-time class scores [batch, num_classes]
    Scores(Tensor<T>),
    /// Training-time loss and parameter gradients
    Loss { loss: T, grads: Gradients<T> },
}

/// Multi-layer fully-connected classifier
///
/// `T` selects the numeric precision: `f32` for speed, `f64` for numerical
/// gradient checking.
#[derive(Clone, Debug)]
pub struct FullyConnectedNet<T: Scalar = f32> {
    config: NetConfig,
    hidden: Vec<HiddenLayer<T>>,
    output: Affine<T>,
    dropout: Option<Dropout>,
}

impl<T: Scalar> FullyConnectedNet<T> {
    /// Build a network with weights drawn from the thread-local generator
    pub fn new(config: NetConfig) -> Result<Self, NetError> {
        Self::with_rng(config, &mut rand::rng())
    }

    /// Build a network drawing its initial weights from `rng`
    ///
    /// Weights are `N(0, weight_scale²)`, biases and shifts zero, scales one.
    pub fn with_rng<R: Rng>(config: NetConfig, rng: &mut R) -> Result<Self, NetError> {
        config.validate()?;

        let dims = config.layer_dims();
        let (&(out_in, out_features), hidden_dims) = dims
            .split_last()
            .ok_or_else(|| NetError::invalid_config("network has no layers"))?;

        let hidden: Vec<HiddenLayer<T>> = hidden_dims
            .iter()
            .map(|&(fan_in, fan_out)| HiddenLayer {
                affine: Affine::new(fan_in, fan_out, config.weight_scale, rng),
                norm: Norm::new(config.normalization, fan_out),
            })
            .collect();
        let output = Affine::new(out_in, out_features, config.weight_scale, rng);

        let dropout = config
            .use_dropout()
            .then(|| Dropout::new(config.dropout_keep_ratio, config.seed));

        let net = Self {
            config,
            hidden,
            output,
            dropout,
        };

        let normalization = net
            .config
            .normalization
            .map_or_else(|| "none".to_string(), |n| n.to_string());
        info!(
            layers = net.num_layers(),
            parameters = net.num_parameters(),
            normalization = %normalization,
            dropout = net.dropout.is_some(),
            "built fully-connected network"
        );

        Ok(net)
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Number of affine layers, including the output layer
    pub fn num_layers(&self) -> usize {
        self.hidden.len() + 1
    }

    pub fn hidden_layers(&self) -> &[HiddenLayer<T>] {
        &self.hidden
    }

    /// Running statistics of hidden layer `layer` (0-based), if it uses batch norm
    pub fn running_stats(&self, layer: usize) -> Option<&RunningStats<T>> {
        match &self.hidden.get(layer)?.norm {
            Norm::Batch(bn) => Some(bn.running()),
            _ => None,
        }
    }

    /// Every parameter id, in layer order (W, b, gamma, beta)
    pub fn param_ids(&self) -> Vec<ParamId> {
        let mut ids = Vec::new();
        for (i, layer) in self.hidden.iter().enumerate() {
            ids.push(ParamId::new(i, ParamKind::Weight));
            ids.push(ParamId::new(i, ParamKind::Bias));
            if layer.norm.scale_shift().is_some() {
                ids.push(ParamId::new(i, ParamKind::Scale));
                ids.push(ParamId::new(i, ParamKind::Shift));
            }
        }
        let out = self.hidden.len();
        ids.push(ParamId::new(out, ParamKind::Weight));
        ids.push(ParamId::new(out, ParamKind::Bias));
        ids
    }

    /// Look up one parameter array
    pub fn param(&self, id: ParamId) -> Option<&Tensor<T>> {
        if id.layer == self.hidden.len() {
            return match id.kind {
                ParamKind::Weight => Some(&self.output.weight),
                ParamKind::Bias => Some(&self.output.bias),
                ParamKind::Scale | ParamKind::Shift => None,
            };
        }
        let layer = self.hidden.get(id.layer)?;
        match id.kind {
            ParamKind::Weight => Some(&layer.affine.weight),
            ParamKind::Bias => Some(&layer.affine.bias),
            ParamKind::Scale => layer.norm.scale_shift().map(|(g, _)| g),
            ParamKind::Shift => layer.norm.scale_shift().map(|(_, b)| b),
        }
    }

    /// Mutable access to one parameter array, for an external optimizer
    ///
    /// Callers must keep the shape unchanged.
    pub fn param_mut(&mut self, id: ParamId) -> Option<&mut Tensor<T>> {
        if id.layer == self.hidden.len() {
            return match id.kind {
                ParamKind::Weight => Some(&mut self.output.weight),
                ParamKind::Bias => Some(&mut self.output.bias),
                ParamKind::Scale | ParamKind::Shift => None,
            };
        }
        let layer = self.hidden.get_mut(id.layer)?;
        match id.kind {
            ParamKind::Weight => Some(&mut layer.affine.weight),
            ParamKind::Bias => Some(&mut layer.affine.bias),
            ParamKind::Scale => layer.norm.scale_shift_mut().map(|(g, _)| g),
            ParamKind::Shift => layer.norm.scale_shift_mut().map(|(_, b)| b),
        }
    }

    /// Total number of scalar parameters
    pub fn num_parameters(&self) -> usize {
        self.param_ids()
            .into_iter()
            .filter_map(|id| self.param(id).map(Tensor::len))
            .sum()
    }

    /// Compute scores, or loss and gradients
    ///
    /// # Arguments
    ///
    /// * `x` - Input batch [N, d_1, ..., d_k] with N ≥ 1 and `d_1 * ... * d_k == input_dim`;
    ///   a rank-1 `[N]` input is N samples of one feature
    /// * `labels` - `labels[i]` is the class of `x[i]`; `None` selects test mode
    ///
    /// # Returns
    ///
    /// - test mode: [`Output::Scores`] of shape [N, num_classes]
    /// - training mode: [`Output::Loss`] with the regularized loss and one
    ///   gradient per parameter
    pub fn loss(&mut self, x: &Tensor<T>, labels: Option<&[usize]>) -> Result<Output<T>, NetError> {
        match labels {
            None => self.scores(x).map(Output::Scores),
            Some(labels) => {
                let (loss, grads) = self.loss_and_grads(x, labels)?;
                Ok(Output::Loss { loss, grads })
            }
        }
    }

    /// Test-time forward pass
    ///
    /// Dropout passes values through and batch norm uses its running
    /// statistics, so this never mutates the network.
    pub fn scores(&self, x: &Tensor<T>) -> Result<Tensor<T>, NetError> {
        let mut out = self.flatten_input(x)?;
        for layer in &self.hidden {
            let (a, _) = layer.affine.forward(&out);
            out = relu_forward(&layer.norm.infer(a));
        }
        let (scores, _) = self.output.forward(&out);
        Ok(scores)
    }

    /// Most likely class of each sample
    pub fn predict(&self, x: &Tensor<T>) -> Result<Vec<usize>, NetError> {
        let scores = self.scores(x)?;
        Ok(scores
            .data
            .chunks(scores.cols())
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, T::neg_infinity()), |best, (j, &s)| if s > best.1 { (j, s) } else { best })
                    .0
            })
            .collect())
    }

    /// Training-time forward and backward pass
    ///
    /// Updates batch-norm running statistics as a side effect.
    pub fn loss_and_grads(&mut self, x: &Tensor<T>, labels: &[usize]) -> Result<(T, Gradients<T>), NetError> {
        let input = self.flatten_input(x)?;
        self.check_labels(labels, input.rows())?;

        // === FORWARD ===
        let mut mask_rng = self.dropout.as_ref().map(Dropout::mask_rng);
        let mut caches: Vec<HiddenCache<T>> = Vec::with_capacity(self.hidden.len());
        let mut out = input;

        for layer in &mut self.hidden {
            let (a, affine_cache) = layer.affine.forward(&out);
            let (normed, norm_cache) = layer.norm.forward(a, Mode::Train);
            let activated = relu_forward(&normed);

            let (next, dropout_cache) = match (&self.dropout, mask_rng.as_mut()) {
                (Some(dropout), Some(rng)) => {
                    let (y, cache) = dropout.forward(&activated, Mode::Train, rng);
                    (y, Some(cache))
                }
                _ => (activated, None),
            };

            caches.push(HiddenCache {
                affine: affine_cache,
                norm: norm_cache,
                pre_activation: normed,
                dropout: dropout_cache,
            });
            out = next;
        }

        let (scores, output_cache) = self.output.forward(&out);

        // === LOSS ===
        let (data_loss, grad_scores) = softmax_loss(&scores, labels);
        let reg = T::from_f64(self.config.reg);
        let half = T::from_f64(0.5);
        let weight_sq: T = self
            .hidden
            .iter()
            .map(|layer| layer.affine.weight.sum_squares())
            .chain(std::iter::once(self.output.weight.sum_squares()))
            .sum();
        let reg_loss = half * reg * weight_sq;
        let loss = data_loss + reg_loss;

        // === BACKWARD ===
        let mut layer_grads: Vec<LayerGradients<T>> = Vec::with_capacity(self.num_layers());

        let output_grads = self.output.backward(&grad_scores, &output_cache);
        layer_grads.push(LayerGradients {
            weight: output_grads.weight.add(&self.output.weight.mul_scalar(reg)),
            bias: output_grads.bias,
            gamma: None,
            beta: None,
        });

        let mut grad = output_grads.x;
        for (layer, cache) in self.hidden.iter().zip(caches.iter()).rev() {
            if let (Some(dropout), Some(dropout_cache)) = (&self.dropout, &cache.dropout) {
                grad = dropout.backward(&grad, dropout_cache);
            }
            grad = relu_backward(&grad, &cache.pre_activation);
            let (grad_norm_in, scale_shift) = layer.norm.backward(grad, &cache.norm);
            let affine_grads = layer.affine.backward(&grad_norm_in, &cache.affine);

            let (gamma, beta) = match scale_shift {
                Some((g, b)) => (Some(g), Some(b)),
                None => (None, None),
            };
            layer_grads.push(LayerGradients {
                weight: affine_grads.weight.add(&layer.affine.weight.mul_scalar(reg)),
                bias: affine_grads.bias,
                gamma,
                beta,
            });
            grad = affine_grads.x;
        }
        layer_grads.reverse(); // Put back in forward order

        debug!(
            batch = labels.len(),
            data_loss = data_loss.as_f64(),
            reg_loss = reg_loss.as_f64(),
            "computed loss and gradients"
        );

        Ok((loss, Gradients { layers: layer_grads }))
    }

    fn flatten_input(&self, x: &Tensor<T>) -> Result<Tensor<T>, NetError> {
        if x.shape.is_empty() {
            return Err(NetError::ShapeMismatch {
                what: "input rank",
                expected: 2,
                actual: 0,
            });
        }
        // Batch statistics of zero samples are NaN and would poison the running averages
        if x.shape[0] == 0 {
            return Err(NetError::ShapeMismatch {
                what: "batch size",
                expected: 1,
                actual: 0,
            });
        }
        let features: usize = x.shape.iter().skip(1).product();
        if features != self.config.input_dim {
            return Err(NetError::ShapeMismatch {
                what: "input features",
                expected: self.config.input_dim,
                actual: features,
            });
        }
        Ok(x.flatten_batch())
    }

    fn check_labels(&self, labels: &[usize], batch: usize) -> Result<(), NetError> {
        if labels.len() != batch {
            return Err(NetError::ShapeMismatch {
                what: "labels",
                expected: batch,
                actual: labels.len(),
            });
        }
        if let Some((index, &label)) = labels
            .iter()
            .enumerate()
            .find(|(_, &label)| label >= self.config.num_classes)
        {
            return Err(NetError::LabelOutOfRange {
                index,
                label,
                num_classes: self.config.num_classes,
            });
        }
        Ok(())
    }
}
