//! Tensor Operations for Fully-Connected Networks
//!
//! A minimal row-major tensor generic over its scalar precision. The network
//! only ever needs matrices `[rows, cols]` and vectors `[len]`, so every
//! operation here is specialized to those two shapes.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<T>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, features]`)
//! - **Scalar**: `f32` or `f64`, chosen by the caller through the type parameter
//!
//! ## Example
//!
//! ```rust
//! use fcnet::Tensor;
//!
//! // Create a 2x3 matrix
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let tensor: Tensor<f32> = Tensor::new(data, vec![2, 3]);
//!
//! // Matrix multiplication
//! let other = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let result = tensor.matmul(&other);
//! assert_eq!(result.shape, vec![2, 2]);
//! ```
//!
//! ## Performance Optimizations
//!
//! Matrix multiplication switches to a parallel cache-blocked kernel once the
//! work exceeds a small threshold, and elementwise operations run through
//! Rayon parallel iterators.

use num_traits::Float;
use rayon::prelude::*;
use std::fmt::{Debug, Display};
use std::iter::Sum;

/// Floating point precision a network computes in
///
/// Implemented for `f32` (the default, fast) and `f64` (for numerical
/// gradient checking).
pub trait Scalar: Float + Sum + Send + Sync + Debug + Display + Default + 'static {
    fn from_f64(value: f64) -> Self;
    fn as_f64(self) -> f64;

    fn from_usize(value: usize) -> Self {
        Self::from_f64(value as f64)
    }
}

impl Scalar for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Scalar for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }
}

/// A dense array for network computations
///
/// # Memory Layout
///
/// For shape `[2, 3]`, data is stored as: `[row0_col0, row0_col1, row0_col2, row1_col0, row1_col1, row1_col2]`
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<T: Scalar = f32> {
    /// Flat storage of all tensor elements
    pub data: Vec<T>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
}

impl<T: Scalar> Tensor<T> {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    ///
    /// # Example
    ///
    /// ```rust
    /// # use fcnet::Tensor;
    /// let tensor: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// ```
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );
        Self { data, shape }
    }

    /// Create a tensor with every element set to `value`
    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![value; size], shape)
    }

    /// Create a tensor filled with zeros
    ///
    /// ```rust
    /// # use fcnet::Tensor;
    /// let tensor: Tensor<f32> = Tensor::zeros(vec![3, 4]);
    /// assert_eq!(tensor.data.len(), 12);
    /// assert!(tensor.data.iter().all(|&x| x == 0.0));
    /// ```
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, T::zero())
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, T::one())
    }

    /// Number of rows of a 2D tensor
    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    /// Number of columns of a 2D tensor
    pub fn cols(&self) -> usize {
        self.shape[1]
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Inner loop of the blocked kernel: `result[j] += a_val * b[j]`
    #[inline(always)]
    fn matmul_inner(a_val: T, b: &[T], result: &mut [T]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r = *r + a_val * b_val;
        }
    }

    /// Matrix multiplication
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]` the result is
    /// `[m, n]` with `C[i,j] = sum(A[i,l] * B[l,j])`.
    ///
    /// # Performance
    ///
    /// - **Small matrices** (< 1K multiply-adds): sequential triple loop
    /// - **Large matrices**: parallel cache-blocked algorithm
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2D or the inner dimensions differ
    pub fn matmul(&self, other: &Tensor<T>) -> Tensor<T> {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let k = self.shape[1];

        if m * n * k >= 1_000 {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        let mut result = vec![T::zero(); m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = T::zero();
                for l in 0..k {
                    sum = sum + self.data[i * k + l] * other.data[l * n + j];
                }
                result[i * n + j] = sum;
            }
        }

        Tensor::new(result, vec![m, n])
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Processes 8×8 blocks so the working set stays in L1, and distributes
    /// row blocks across cores via Rayon. Within a block the innermost loop
    /// walks memory sequentially.
    fn matmul_parallel_blocked(&self, other: &Tensor<T>, m: usize, n: usize, k: usize) -> Tensor<T> {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![T::zero(); m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Transpose a 2D matrix
    ///
    /// ```rust
    /// # use fcnet::Tensor;
    /// let tensor: Tensor<f32> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    /// let transposed = tensor.transpose();
    /// assert_eq!(transposed.shape, vec![3, 2]);
    /// assert_eq!(transposed.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    /// ```
    pub fn transpose(&self) -> Tensor<T> {
        assert_eq!(self.shape.len(), 2, "transpose expects a 2D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![T::zero(); rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Tensor::new(result, vec![cols, rows])
    }

    /// Apply `op` elementwise, broadcasting a vector over the last dimension
    ///
    /// Supports the two patterns the network needs:
    ///
    /// 1. **Exact match**: Same shape
    /// 2. **Broadcast last dim**: `[rows, n] op [n]` (e.g., adding bias)
    fn broadcast_with(&self, other: &Tensor<T>, name: &str, op: impl Fn(T, T) -> T + Sync) -> Tensor<T> {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(&a, &b)| op(a, b))
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        if self.shape.len() == 2 && other.shape.len() == 1 && other.shape[0] == self.shape[1] {
            let last_dim = self.shape[1];
            let result: Vec<T> = (0..self.data.len())
                .into_par_iter()
                .map(|i| op(self.data[i], other.data[i % last_dim]))
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        panic!(
            "Unsupported broadcast for {}: {:?} and {:?}",
            name, self.shape, other.shape
        );
    }

    /// Element-wise addition with last-dim broadcasting
    ///
    /// ```rust
    /// # use fcnet::Tensor;
    /// let a: Tensor<f32> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let bias = Tensor::new(vec![10.0, 20.0], vec![2]);
    /// assert_eq!(a.add(&bias).data, vec![11.0, 22.0, 13.0, 24.0]);
    /// ```
    pub fn add(&self, other: &Tensor<T>) -> Tensor<T> {
        self.broadcast_with(other, "add", |a, b| a + b)
    }

    /// Element-wise subtraction with last-dim broadcasting
    pub fn sub(&self, other: &Tensor<T>) -> Tensor<T> {
        self.broadcast_with(other, "sub", |a, b| a - b)
    }

    /// Element-wise multiplication with last-dim broadcasting
    pub fn mul(&self, other: &Tensor<T>) -> Tensor<T> {
        self.broadcast_with(other, "mul", |a, b| a * b)
    }

    /// Element-wise division with last-dim broadcasting
    pub fn div(&self, other: &Tensor<T>) -> Tensor<T> {
        self.broadcast_with(other, "div", |a, b| a / b)
    }

    /// Apply a function to every element
    pub fn map(&self, f: impl Fn(T) -> T + Sync) -> Tensor<T> {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Add scalar to all elements
    pub fn add_scalar(&self, scalar: T) -> Tensor<T> {
        self.map(|x| x + scalar)
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: T) -> Tensor<T> {
        self.map(|x| x * scalar)
    }

    /// Element-wise square root
    pub fn sqrt(&self) -> Tensor<T> {
        self.map(|x| x.sqrt())
    }

    /// Sum of squared elements
    ///
    /// Sequential so the result is bit-for-bit repeatable.
    pub fn sum_squares(&self) -> T {
        self.data.iter().map(|&x| x * x).sum()
    }

    /// Sum a 2D tensor over its rows, producing one value per column
    ///
    /// ```rust
    /// # use fcnet::Tensor;
    /// let t: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(t.sum_rows().data, vec![4.0, 6.0]);
    /// ```
    pub fn sum_rows(&self) -> Tensor<T> {
        assert_eq!(self.shape.len(), 2, "sum_rows expects a 2D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        let result: Vec<T> = (0..cols)
            .into_par_iter()
            .map(|j| (0..rows).map(|i| self.data[i * cols + j]).sum())
            .collect();
        Tensor::new(result, vec![cols])
    }

    /// Per-column mean of a 2D tensor
    pub fn mean_rows(&self) -> Tensor<T> {
        let n = T::from_usize(self.rows());
        self.sum_rows().map(|s| s / n)
    }

    /// Per-column biased variance of a 2D tensor, given its per-column mean
    pub fn var_rows(&self, mean: &Tensor<T>) -> Tensor<T> {
        let n = T::from_usize(self.rows());
        self.sub(mean).map(|d| d * d).sum_rows().map(|s| s / n)
    }

    /// Reshape tensor to new shape
    ///
    /// Total number of elements must remain the same.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor<T> {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape: element count mismatch"
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Collapse `[n, d_1, ..., d_k]` into `[n, d_1 * ... * d_k]`
    pub fn flatten_batch(&self) -> Tensor<T> {
        let n = self.shape.first().copied().unwrap_or(0);
        let features: usize = self.shape.iter().skip(1).product();
        self.reshape(&[n, features])
    }
}
