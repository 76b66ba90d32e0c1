use std::fmt::Write;

use crate::error::Result;
use crate::partition::Band;

/// A row-major `n x n` matrix with every element set to `value`.
pub fn fill(n: usize, value: f64) -> Vec<f64> {
    vec![value; n * n]
}

/// Single-band product of two `n x n` matrices.
///
/// Runs the band kernel over all rows at once, so it accumulates in exactly
/// the order every partitioned run does.
pub fn reference_matmul(a: &[f64], b: &[f64], n: usize) -> Result<Vec<f64>> {
    let mut c = vec![0.0; n * n];
    let whole = Band {
        index: 0,
        start: 0,
        end: n,
    };
    crate::worker::run(&whole, a, b, &mut c, n)?;
    Ok(c)
}

/// Render a row-major matrix as whitespace-separated rows, six decimals per
/// element, one row per line.
pub fn format_matrix(values: &[f64], n: usize) -> String {
    let mut out = String::with_capacity(values.len() * 10);
    for row in values.chunks(n.max(1)) {
        for x in row {
            let _ = write!(out, "{:.6} ", x);
        }
        out.push('\n');
    }
    out
}
