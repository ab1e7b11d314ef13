use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::gf::Field;

/// Dense row-major matrix over a Galois field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Matrix<F: Field> {
    rows: usize,
    cols: usize,
    data: Vec<F>,
}

impl<F: Field> Matrix<F> {
    pub fn zero(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![F::ZERO; rows * cols] }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zero(n, n);
        for i in 0..n {
            m.set(i, i, F::ONE);
        }
        m
    }

    pub fn from_rows(rows: Vec<Vec<F>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let n = rows.len();
        let mut data = Vec::with_capacity(n * cols);
        for r in rows {
            if r.len() != cols {
                return Err(Error::DimensionMismatch { expected: cols, actual: r.len() });
            }
            data.extend(r);
        }
        Ok(Self { rows: n, cols, data })
    }

    /// Row `r`, column `c` holds `bases[c]^exponents[r]`.
    pub fn vandermonde(exponents: &[u32], bases: &[F]) -> Self {
        let mut data = Vec::with_capacity(exponents.len() * bases.len());
        for &e in exponents {
            data.extend(bases.iter().map(|b| b.pow(e)));
        }
        Self { rows: exponents.len(), cols: bases.len(), data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, r: usize, c: usize) -> F {
        self.data[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, v: F) {
        self.data[r * self.cols + c] = v;
    }

    pub fn row(&self, r: usize) -> &[F] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for c in 0..self.cols {
            self.data.swap(a * self.cols + c, b * self.cols + c);
        }
    }

    pub fn mul(&self, rhs: &Matrix<F>) -> Result<Matrix<F>> {
        if self.cols != rhs.rows {
            return Err(Error::DimensionMismatch { expected: self.cols, actual: rhs.rows });
        }
        let mut out = Matrix::zero(self.rows, rhs.cols);
        for r in 0..self.rows {
            for c in 0..rhs.cols {
                let mut acc = F::ZERO;
                for k in 0..self.cols {
                    acc = acc + self.get(r, k) * rhs.get(k, c);
                }
                out.set(r, c, acc);
            }
        }
        Ok(out)
    }

    pub fn mul_vec(&self, v: &[F]) -> Result<Vec<F>> {
        if v.len() != self.cols {
            return Err(Error::DimensionMismatch { expected: self.cols, actual: v.len() });
        }
        Ok((0..self.rows)
            .map(|r| self.row(r).iter().zip(v).fold(F::ZERO, |acc, (&a, &x)| acc + a * x))
            .collect())
    }

    /// Multiplies this matrix by a vector of equally sized blocks. Each symbol position is
    /// an independent instance of the same linear system.
    pub fn mul_blocks(&self, blocks: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if blocks.len() != self.cols {
            return Err(Error::DimensionMismatch { expected: self.cols, actual: blocks.len() });
        }
        let len = blocks.first().map_or(0, |b| b.len());
        if let Some(b) = blocks.iter().find(|b| b.len() != len) {
            return Err(Error::DimensionMismatch { expected: len, actual: b.len() });
        }
        if len % F::SYMBOL_BYTES != 0 {
            return Err(Error::InvalidBlockSize(len));
        }
        Ok((0..self.rows)
            .into_par_iter()
            .map(|r| {
                let mut out = vec![0u8; len];
                for (&coef, src) in self.row(r).iter().zip(blocks) {
                    F::mul_acc(&mut out, src, coef);
                }
                out
            })
            .collect())
    }

    /// Gauss-Jordan inversion. The pivot for each column is the first nonzero entry at or
    /// below the diagonal.
    pub fn invert(&self) -> Result<Matrix<F>> {
        if self.rows != self.cols {
            return Err(Error::DimensionMismatch { expected: self.rows, actual: self.cols });
        }
        let n = self.rows;
        let mut a = self.clone();
        let mut inv = Matrix::identity(n);
        for col in 0..n {
            let pivot = (col..n).find(|&r| !a.get(r, col).is_zero()).ok_or(Error::SingularMatrix)?;
            a.swap_rows(col, pivot);
            inv.swap_rows(col, pivot);

            let scale = a.get(col, col).inverse()?;
            for c in 0..n {
                a.set(col, c, a.get(col, c) * scale);
                inv.set(col, c, inv.get(col, c) * scale);
            }

            for r in 0..n {
                let factor = a.get(r, col);
                if r == col || factor.is_zero() {
                    continue;
                }
                for c in 0..n {
                    a.set(r, c, a.get(r, c) - factor * a.get(col, c));
                    inv.set(r, c, inv.get(r, c) - factor * inv.get(col, c));
                }
            }
        }
        Ok(inv)
    }
}
