//! Softmax Cross-Entropy Loss
//!
//! ```text
//! p[i, c] = exp(s[i, c] - max_c s[i, c]) / Σ_c' exp(s[i, c'] - max_c s[i, c'])
//! loss    = -1/N Σ_i log p[i, y_i]
//! grad    = (p - onehot(y)) / N
//! ```
//!
//! Subtracting the row maximum keeps `exp` from overflowing without changing
//! the result.

use crate::tensor::{Scalar, Tensor};
use rayon::prelude::*;

/// Mean softmax cross-entropy loss and its gradient with respect to the scores
///
/// # Arguments
///
/// * `scores` - Class scores [batch, num_classes]
/// * `labels` - Correct class of each row, each `< num_classes`
///
/// # Panics
///
/// Panics if `labels.len()` differs from the number of rows or a label is out
/// of range; the network validates both before calling.
pub fn softmax_loss<T: Scalar>(scores: &Tensor<T>, labels: &[usize]) -> (T, Tensor<T>) {
    let n = scores.rows();
    let num_classes = scores.cols();
    assert_eq!(labels.len(), n, "one label per score row is required");
    let inv_n = T::one() / T::from_usize(n);

    let rows: Vec<(T, Vec<T>)> = scores
        .data
        .par_chunks(num_classes)
        .zip(labels.par_iter())
        .map(|(row, &label)| {
            assert!(label < num_classes, "label {} out of range", label);

            let max_score = row.iter().fold(T::neg_infinity(), |a, &b| a.max(b));
            let exp_vals: Vec<T> = row.iter().map(|&s| (s - max_score).exp()).collect();
            let sum: T = exp_vals.iter().copied().sum();

            let log_prob = (row[label] - max_score) - sum.ln();
            let grad: Vec<T> = exp_vals
                .iter()
                .enumerate()
                .map(|(j, &e)| {
                    let prob = e / sum;
                    let grad = if j == label { prob - T::one() } else { prob };
                    grad * inv_n
                })
                .collect();

            (-log_prob, grad)
        })
        .collect();

    let mut loss = T::zero();
    let mut grad_data = Vec::with_capacity(n * num_classes);
    for (row_loss, row_grad) in rows {
        loss = loss + row_loss;
        grad_data.extend(row_grad);
    }

    (loss * inv_n, Tensor::new(grad_data, vec![n, num_classes]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_scores_give_log_num_classes() {
        let scores: Tensor<f64> = Tensor::zeros(vec![4, 5]);
        let (loss, grad) = softmax_loss(&scores, &[0, 1, 2, 4]);
        assert_relative_eq!(loss, 5.0f64.ln(), epsilon = 1e-12);

        // Each row of the gradient sums to zero
        for row in grad.data.chunks(5) {
            assert_relative_eq!(row.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
        }
        assert_relative_eq!(grad.data[0], (0.2 - 1.0) / 4.0, epsilon = 1e-12);
        assert_relative_eq!(grad.data[1], 0.2 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_large_scores_stay_finite() {
        let scores: Tensor<f32> = Tensor::new(vec![1000.0, 0.0, -1000.0], vec![1, 3]);
        let (loss, grad) = softmax_loss(&scores, &[0]);
        assert!(loss.is_finite());
        assert!(loss.abs() < 1e-6);
        assert!(grad.data.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let scores: Tensor<f64> = Tensor::new(vec![0.3, -1.2, 2.0, 0.0, 0.5, 0.5], vec![2, 3]);
        let labels = [2, 1];
        let (_, grad) = softmax_loss(&scores, &labels);

        let h = 1e-6;
        for i in 0..scores.len() {
            let mut plus = scores.clone();
            plus.data[i] += h;
            let mut minus = scores.clone();
            minus.data[i] -= h;
            let numeric = (softmax_loss(&plus, &labels).0 - softmax_loss(&minus, &labels).0) / (2.0 * h);
            assert_relative_eq!(grad.data[i], numeric, epsilon = 1e-8);
        }
    }
}
