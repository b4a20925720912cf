//! Dropout Layer
//!
//! Inverted dropout: during training each unit is kept with probability
//! `keep_ratio` and kept units are scaled by `1 / keep_ratio`, so the expected
//! activation is unchanged and inference can pass values through untouched.
//!
//! ## Determinism
//!
//! With a seed, every forward call starts a fresh generator from that seed.
//! Two training calls on the same batch therefore draw the same masks, which
//! is what numerical gradient checking needs.

use super::Mode;
use crate::tensor::{Scalar, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Dropout layer configuration shared by every hidden layer
#[derive(Clone, Debug)]
pub struct Dropout {
    pub keep_ratio: f64,
    pub seed: Option<u64>,
}

impl Dropout {
    /// Create a new dropout layer
    ///
    /// # Arguments
    ///
    /// * `keep_ratio` - Probability of keeping a unit (1.0 = no dropout)
    /// * `seed` - Optional seed making masks reproducible
    pub fn new(keep_ratio: f64, seed: Option<u64>) -> Self {
        assert!(
            keep_ratio > 0.0 && keep_ratio <= 1.0,
            "Dropout keep ratio must be in (0.0, 1.0]"
        );
        Self { keep_ratio, seed }
    }

    /// Generator for the masks of one forward call
    pub fn mask_rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Forward pass with caching for backward
    ///
    /// # Returns
    ///
    /// Tuple of (output, cache) where cache stores the dropout mask
    pub fn forward<T: Scalar, R: Rng>(
        &self,
        x: &Tensor<T>,
        mode: Mode,
        rng: &mut R,
    ) -> (Tensor<T>, DropoutCache<T>) {
        if mode == Mode::Test || self.keep_ratio >= 1.0 {
            // No dropout - just pass through
            let cache = DropoutCache {
                mask: None,
                scale: T::one(),
            };
            return (x.clone(), cache);
        }

        let scale = T::from_f64(1.0 / self.keep_ratio);
        let mut mask = Vec::with_capacity(x.len());
        let mut output = Tensor::zeros(x.shape.clone());

        for i in 0..x.len() {
            let keep = rng.random::<f64>() < self.keep_ratio;
            mask.push(keep);
            if keep {
                output.data[i] = x.data[i] * scale;
            }
        }

        let cache = DropoutCache {
            mask: Some(mask),
            scale,
        };

        (output, cache)
    }

    /// Backward pass through dropout
    ///
    /// Gradients flow only through the units the forward pass kept.
    pub fn backward<T: Scalar>(&self, grad_output: &Tensor<T>, cache: &DropoutCache<T>) -> Tensor<T> {
        if let Some(mask) = &cache.mask {
            let mut grad_input = Tensor::zeros(grad_output.shape.clone());
            for (i, &keep) in mask.iter().enumerate() {
                if keep {
                    grad_input.data[i] = grad_output.data[i] * cache.scale;
                }
            }
            grad_input
        } else {
            grad_output.clone()
        }
    }
}

/// Cache for dropout backward pass
pub struct DropoutCache<T: Scalar> {
    /// Dropout mask (true = kept, false = dropped)
    /// None if dropout was not applied
    pub mask: Option<Vec<bool>>,
    /// Scaling factor applied to kept values
    pub scale: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(n: usize) -> Tensor<f64> {
        Tensor::ones(vec![n, 100])
    }

    #[test]
    fn test_train_mode_scales_kept_units() {
        let dropout = Dropout::new(0.25, Some(0));
        let mut rng = dropout.mask_rng();
        let (y, cache) = dropout.forward(&ones(50), Mode::Train, &mut rng);

        assert!(y.data.iter().all(|&v| v == 0.0 || v == 4.0));
        let kept = cache.mask.as_ref().map(|m| m.iter().filter(|&&k| k).count()).unwrap_or(0);
        let frac = kept as f64 / 5000.0;
        assert!((frac - 0.25).abs() < 0.03, "kept fraction {}", frac);
    }

    #[test]
    fn test_test_mode_passes_through() {
        let dropout = Dropout::new(0.5, Some(1));
        let mut rng = dropout.mask_rng();
        let x = ones(3);
        let (y, cache) = dropout.forward(&x, Mode::Test, &mut rng);
        assert_eq!(y, x);
        assert!(cache.mask.is_none());
    }

    #[test]
    fn test_keep_ratio_one_is_identity() {
        let dropout = Dropout::new(1.0, None);
        let mut rng = dropout.mask_rng();
        let x = Tensor::new(vec![0.5, -2.0, 3.0, 0.0], vec![2, 2]);
        let (y, cache) = dropout.forward(&x, Mode::Train, &mut rng);
        assert_eq!(y, x);
        assert_eq!(dropout.backward(&x, &cache), x);
    }

    #[test]
    fn test_seed_reproduces_mask() {
        let dropout = Dropout::new(0.6, Some(42));
        let x = ones(4);
        let (a, _) = dropout.forward(&x, Mode::Train, &mut dropout.mask_rng());
        let (b, _) = dropout.forward(&x, Mode::Train, &mut dropout.mask_rng());
        assert_eq!(a, b);
    }

    #[test]
    fn test_backward_uses_forward_mask() {
        let dropout = Dropout::new(0.5, Some(9));
        let x = ones(2);
        let (y, cache) = dropout.forward(&x, Mode::Train, &mut dropout.mask_rng());
        let grad = dropout.backward(&ones(2), &cache);
        // Forward and backward of an all-ones input apply the same mask and scale
        assert_eq!(grad, y);
    }

    #[test]
    #[should_panic(expected = "keep ratio")]
    fn test_rejects_zero_keep_ratio() {
        Dropout::new(0.0, None);
    }
}
