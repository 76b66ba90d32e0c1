use std::fmt;
use std::str::FromStr;

use shmm_compute::{matrix_bytes, partition, Band, ComputeError};
use shmm_region::RegionKeys;

use crate::error::Result;

/// How workers are isolated from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// One forked OS process per band.
    #[default]
    Process,
    /// One scoped thread per band inside the orchestrating process.
    Thread,
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isolation::Process => write!(f, "process"),
            Isolation::Thread => write!(f, "thread"),
        }
    }
}

impl FromStr for Isolation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "process" => Ok(Isolation::Process),
            "thread" => Ok(Isolation::Thread),
            other => Err(format!("unknown isolation '{}' (expected process or thread)", other)),
        }
    }
}

/// Initial contents of operands A and B.
#[derive(Debug, Clone, PartialEq)]
pub enum Operands {
    /// Every element of both operands set to the value.
    Fill(f64),
    /// Row-major `n x n` data for each operand.
    Explicit { a: Vec<f64>, b: Vec<f64> },
}

impl Default for Operands {
    fn default() -> Self {
        Operands::Fill(1.0)
    }
}

impl Operands {
    fn check(&self, n: usize) -> std::result::Result<(), ComputeError> {
        if let Operands::Explicit { a, b } = self {
            for (operand, data) in [("A", a), ("B", b)] {
                if data.len() != n * n {
                    return Err(ComputeError::ShapeMismatch {
                        operand,
                        expected: n * n,
                        got: data.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Write the operands into freshly mapped regions.
    pub fn write_into(&self, a: &mut [f64], b: &mut [f64]) {
        match self {
            Operands::Fill(value) => {
                a.fill(*value);
                b.fill(*value);
            }
            Operands::Explicit { a: src_a, b: src_b } => {
                a.copy_from_slice(src_a);
                b.copy_from_slice(src_b);
            }
        }
    }

    /// Owned copies of both operands.
    pub fn materialize(&self, n: usize) -> (Vec<f64>, Vec<f64>) {
        match self {
            Operands::Fill(value) => (vec![*value; n * n], vec![*value; n * n]),
            Operands::Explicit { a, b } => (a.clone(), b.clone()),
        }
    }
}

/// Everything a multiplication run needs, passed explicitly to each stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Matrix dimension N.
    pub dimension: usize,
    /// Worker count P. Must divide `dimension`.
    pub workers: usize,
    pub keys: RegionKeys,
    pub isolation: Isolation,
    pub operands: Operands,
    /// Copy the result out of shared memory after all workers have joined.
    pub capture_product: bool,
}

impl RunConfig {
    pub fn new(dimension: usize, workers: usize) -> Self {
        Self {
            dimension,
            workers,
            keys: RegionKeys::default(),
            isolation: Isolation::default(),
            operands: Operands::default(),
            capture_product: false,
        }
    }

    pub fn with_keys(mut self, keys: RegionKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_operands(mut self, operands: Operands) -> Self {
        self.operands = operands;
        self
    }

    pub fn capture_product(mut self, capture: bool) -> Self {
        self.capture_product = capture;
        self
    }

    /// Check the configuration and compute the row bands.
    ///
    /// Performs no I/O, so a failure here means nothing was allocated.
    pub fn validate(&self) -> Result<Vec<Band>> {
        let bands = partition(self.dimension, self.workers)?;
        matrix_bytes(self.dimension)?;
        self.operands.check(self.dimension)?;
        Ok(bands)
    }

    /// Size in bytes of each of the three regions.
    pub fn region_bytes(&self) -> Result<usize> {
        Ok(matrix_bytes(self.dimension)?)
    }
}
