//! Small dense linear algebra for symmetric positive-definite systems.
//!
//! Sized for posterior covariance of a handful of regression coefficients or
//! a correlation matrix over a few varying terms; no blocking, no pivoting.

use serde::{Deserialize, Serialize};

/// Row-major square matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    n: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// n x n zero matrix.
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    /// n x n identity.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m.set(i, i, 1.0);
        }
        m
    }

    /// Build from rows; `None` if the rows are not square.
    pub fn from_rows(rows: &[Vec<f64>]) -> Option<Self> {
        let n = rows.len();
        if rows.iter().any(|r| r.len() != n) {
            return None;
        }
        Some(Self {
            n,
            data: rows.iter().flatten().copied().collect(),
        })
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.n + j] = value;
    }

    pub fn add_to(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.n + j] += value;
    }

    /// `self * self^T`.
    pub fn mul_transpose(&self) -> Matrix {
        let n = self.n;
        let mut out = Matrix::zeros(n);
        for i in 0..n {
            for j in 0..=i {
                let v: f64 = (0..n).map(|k| self.get(i, k) * self.get(j, k)).sum();
                out.set(i, j, v);
                out.set(j, i, v);
            }
        }
        out
    }

    /// Matrix-vector product.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        (0..self.n)
            .map(|i| (0..self.n).map(|j| self.get(i, j) * v[j]).sum())
            .collect()
    }
}

/// Lower Cholesky factor `L` with `A = L L^T`.
///
/// Returns `None` when `A` is not (numerically) positive definite.
pub fn cholesky(a: &Matrix) -> Option<Matrix> {
    let n = a.dim();
    let mut l = Matrix::zeros(n);
    for i in 0..n {
        for j in 0..=i {
            let partial: f64 = (0..j).map(|k| l.get(i, k) * l.get(j, k)).sum();
            if i == j {
                let d = a.get(i, i) - partial;
                if !(d > 0.0) || !d.is_finite() {
                    return None;
                }
                l.set(i, j, d.sqrt());
            } else {
                l.set(i, j, (a.get(i, j) - partial) / l.get(j, j));
            }
        }
    }
    Some(l)
}

/// Solve `L x = b` for lower-triangular `L`.
pub fn solve_lower(l: &Matrix, b: &[f64]) -> Vec<f64> {
    let n = l.dim();
    let mut x = vec![0.0; n];
    for i in 0..n {
        let partial: f64 = (0..i).map(|k| l.get(i, k) * x[k]).sum();
        x[i] = (b[i] - partial) / l.get(i, i);
    }
    x
}

/// Solve `L^T x = b` for lower-triangular `L`.
pub fn solve_lower_transpose(l: &Matrix, b: &[f64]) -> Vec<f64> {
    let n = l.dim();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let partial: f64 = (i + 1..n).map(|k| l.get(k, i) * x[k]).sum();
        x[i] = (b[i] - partial) / l.get(i, i);
    }
    x
}

/// Solve `A x = b` given the Cholesky factor of `A`.
pub fn cholesky_solve(l: &Matrix, b: &[f64]) -> Vec<f64> {
    solve_lower_transpose(l, &solve_lower(l, b))
}
