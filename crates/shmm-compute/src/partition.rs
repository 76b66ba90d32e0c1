use std::ops::Range;

use crate::error::{ComputeError, Result};

/// A contiguous range of result rows owned by a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    /// Worker index, `0..P`.
    pub index: usize,
    /// First row (inclusive).
    pub start: usize,
    /// One past the last row.
    pub end: usize,
}

impl Band {
    /// Number of rows in the band.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn rows(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Element range of this band inside a row-major `n x n` matrix.
    pub fn elements(&self, n: usize) -> Range<usize> {
        self.start * n..self.end * n
    }
}

/// Split `n` rows into `p` equal bands.
///
/// Band `i` covers rows `[i * n/p, (i + 1) * n/p)`. Fails unless `n` and
/// `p` are positive and `p` divides `n`; there is no remainder handling.
pub fn partition(n: usize, p: usize) -> Result<Vec<Band>> {
    if n == 0 {
        return Err(ComputeError::Configuration(
            "matrix dimension must be positive".to_string(),
        ));
    }
    if p == 0 {
        return Err(ComputeError::Configuration(
            "worker count must be positive".to_string(),
        ));
    }
    if n % p != 0 {
        return Err(ComputeError::Configuration(format!(
            "matrix size {} must be a multiple of number of processes {}",
            n, p
        )));
    }

    let rows = n / p;
    Ok((0..p)
        .map(|index| Band {
            index,
            start: index * rows,
            end: (index + 1) * rows,
        })
        .collect())
}

/// Bytes needed for one `n x n` matrix of `f64`.
pub fn matrix_bytes(n: usize) -> Result<usize> {
    n.checked_mul(n)
        .and_then(|e| e.checked_mul(std::mem::size_of::<f64>()))
        .ok_or_else(|| {
            ComputeError::Configuration(format!("matrix dimension {} is too large", n))
        })
}
