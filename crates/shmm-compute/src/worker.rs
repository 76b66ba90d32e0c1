use crate::error::{ComputeError, Result};
use crate::partition::Band;

/// Compute the rows of `C = A @ B` that belong to `band`.
///
/// - `a`, `b`: row-major `n x n` operands
/// - `c_band`: the band's rows of C, i.e. `band.len() * n` elements starting
///   at row `band.start`
///
/// Each element is accumulated over `k` in ascending order, the same order as
/// [`crate::reference_matmul`], so the result does not depend on how rows are
/// split between workers. Shapes are checked before anything is written.
pub fn run(band: &Band, a: &[f64], b: &[f64], c_band: &mut [f64], n: usize) -> Result<()> {
    check_len("A", a.len(), n * n)?;
    check_len("B", b.len(), n * n)?;
    check_len("C band", c_band.len(), band.len() * n)?;
    if band.end > n {
        return Err(ComputeError::Configuration(format!(
            "band {} ends at row {} but the matrix has {} rows",
            band.index, band.end, n
        )));
    }

    for (local, i) in band.rows().enumerate() {
        let a_row = &a[i * n..(i + 1) * n];
        let c_row = &mut c_band[local * n..(local + 1) * n];
        for (j, c) in c_row.iter_mut().enumerate() {
            let mut sum = 0.0f64;
            for (k, &a_ik) in a_row.iter().enumerate() {
                sum += a_ik * b[k * n + j];
            }
            *c = sum;
        }
    }
    Ok(())
}

fn check_len(operand: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(ComputeError::ShapeMismatch {
            operand,
            expected,
            got,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{fill, reference_matmul};
    use crate::partition::partition;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rng: &mut impl Rng, n: usize) -> Vec<f64> {
        (0..n * n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    fn run_partitioned(a: &[f64], b: &[f64], n: usize, p: usize) -> Vec<f64> {
        let bands = partition(n, p).unwrap();
        let mut c = vec![f64::NAN; n * n];
        for (band, chunk) in bands.iter().zip(c.chunks_mut((n / p) * n)) {
            run(band, a, b, chunk, n).unwrap();
        }
        c
    }

    #[test]
    fn test_ones_give_dimension() {
        let n = 6;
        let a = fill(n, 1.0);
        let b = fill(n, 1.0);
        for p in [1, 2, 3, 6] {
            let c = run_partitioned(&a, &b, n, p);
            assert!(c.iter().all(|&x| x == n as f64), "p={}", p);
        }
    }

    #[test]
    fn test_known_2x2() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let band = Band { index: 1, start: 1, end: 2 };
        let mut row = [0.0; 2];
        run(&band, &a, &b, &mut row, 2).unwrap();
        assert_eq!(row, [43.0, 50.0]);
    }

    #[test]
    fn test_matches_reference_bitwise() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let n = 12;
        let a = random_matrix(&mut rng, n);
        let b = random_matrix(&mut rng, n);
        let expected = reference_matmul(&a, &b, n).unwrap();

        for p in [1, 2, 3, 4, 6, 12] {
            let c = run_partitioned(&a, &b, n, p);
            let same = c.iter().zip(&expected).all(|(x, y)| x.to_bits() == y.to_bits());
            assert!(same, "p={} differs from reference", p);
        }
    }

    #[test]
    fn test_close_to_ikj_product() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let n = 8;
        let a = random_matrix(&mut rng, n);
        let b = random_matrix(&mut rng, n);

        // Different summation order: agreement is only approximate.
        let mut ikj = vec![0.0; n * n];
        for i in 0..n {
            for k in 0..n {
                for j in 0..n {
                    ikj[i * n + j] += a[i * n + k] * b[k * n + j];
                }
            }
        }

        let c = run_partitioned(&a, &b, n, 4);
        for (x, y) in c.iter().zip(&ikj) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_only_band_rows_written() {
        let n = 4;
        let a = fill(n, 2.0);
        let b = fill(n, 0.5);
        let mut c = vec![-1.0; n * n];
        let band = Band { index: 1, start: 2, end: 4 };
        run(&band, &a, &b, &mut c[band.elements(n)], n).unwrap();

        assert!(c[..8].iter().all(|&x| x == -1.0));
        assert!(c[8..].iter().all(|&x| x == 4.0));
    }

    #[test]
    fn test_shape_mismatch_writes_nothing() {
        let n = 3;
        let a = fill(n, 1.0);
        let b = fill(n - 1, 1.0);
        let mut c = vec![-1.0; n];
        let band = Band { index: 0, start: 0, end: 1 };

        let err = run(&band, &a, &b, &mut c, n).unwrap_err();
        assert_eq!(
            err,
            ComputeError::ShapeMismatch { operand: "B", expected: 9, got: 4 }
        );
        assert!(c.iter().all(|&x| x == -1.0));
    }

    #[test]
    fn test_band_past_end_rejected() {
        let n = 2;
        let a = fill(n, 1.0);
        let b = fill(n, 1.0);
        let mut c = vec![0.0; n];
        let band = Band { index: 2, start: 2, end: 3 };
        assert!(matches!(
            run(&band, &a, &b, &mut c, n),
            Err(ComputeError::Configuration(_))
        ));
    }
}
