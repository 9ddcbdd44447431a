//! The workload shape: factorized dimensions, data spaces, and the affine
//! ranks that project dimension points onto data-space coordinates.
//!
//! Grounded on `src/ir/operator.rs`'s typed, immutable descriptor style in
//! the teacher, generalized from a fixed tensor-algebra operator set to the
//! arbitrary dimension/data-space/rank triple of spec.md §3.

use std::collections::HashMap;

use crate::error::ConfigError;

/// Index of a [`Dimension`] within a [`Workload`].
pub type DimId = usize;

/// The data space conventionally holding the accumulator / output the
/// bank-conflict engine treats as the write path (spec §9 open question 2:
/// the `data_space_id == 2` convention is not configurable upstream, so we
/// keep it as a named constant rather than a magic number).
pub const WRITE_DATA_SPACE_ID: usize = 2;

/// An integer-indexed named axis with a positive bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub bound: u32,
}

/// A named multiplicative coefficient used inside an affine rank expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coefficient {
    pub value: u32,
}

impl Default for Coefficient {
    fn default() -> Self {
        Coefficient { value: 1 }
    }
}

/// An affine projection of one or more dimensions onto one data-space
/// coordinate: `rank_expr = Σ c_i · d_i`.
#[derive(Debug, Clone)]
pub struct Rank {
    pub name: String,
    /// `(dimension, coefficient)` pairs in declaration order. A rank with a
    /// single term is a "single-dimension rank" per spec §4.3.
    pub terms: Vec<(DimId, Coefficient)>,
}

impl Rank {
    pub fn dims(&self) -> impl Iterator<Item = DimId> + '_ {
        self.terms.iter().map(|&(d, _)| d)
    }

    pub fn is_multi_dim(&self) -> bool {
        self.terms.len() > 1
    }

    /// Evaluates `Σ_i contribution_i(dim_value(dims_i))` as defined in spec
    /// §4.3: the raw dimension value for single-dimension ranks, and for
    /// multi-dimension ranks the coefficient-weighted sum with exactly one
    /// unit subtracted overall (equivalent to subtracting it from the last
    /// term, since addition is associative).
    pub fn contribution(&self, dim_value: impl Fn(DimId) -> u32) -> u32 {
        if self.terms.len() <= 1 {
            return self.terms.first().map_or(1, |&(d, _)| dim_value(d));
        }
        let sum: i64 = self
            .terms
            .iter()
            .map(|&(d, c)| i64::from(dim_value(d)) * i64::from(c.value))
            .sum();
        (sum - 1).max(0) as u32
    }
}

/// A named collection of ranks, in significant order.
#[derive(Debug, Clone)]
pub struct DataSpace {
    pub name: String,
    pub order: usize,
    pub ranks: Vec<Rank>,
    pub read_write: bool,
}

/// The immutable, factorized-loop workload description (spec §3, C1).
#[derive(Debug, Clone)]
pub struct Workload {
    pub dimensions: Vec<Dimension>,
    pub data_spaces: Vec<DataSpace>,
}

impl Workload {
    pub fn new(dimensions: Vec<Dimension>, data_spaces: Vec<DataSpace>) -> Self {
        Workload {
            dimensions,
            data_spaces,
        }
    }

    pub fn dim_id(&self, name: &str) -> Option<DimId> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    pub fn dim_bound(&self, id: DimId) -> u32 {
        self.dimensions[id].bound
    }

    pub fn data_space_id(&self, name: &str) -> Option<usize> {
        self.data_spaces.iter().position(|d| d.name == name)
    }

    /// Builds a lookup of dimension name to id, used by configuration
    /// parsing to resolve rank expressions (spec §6 `problem`).
    pub fn dim_name_index(&self) -> HashMap<String, DimId> {
        self.dimensions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect()
    }

    /// Validates that every rank only refers to declared dimensions
    /// (spec §7 kind 6: terminal underflow on name lookup failure).
    pub fn validate(&self) -> Result<(), ConfigError> {
        for ds in &self.data_spaces {
            for rank in &ds.ranks {
                for &(dim, _) in &rank.terms {
                    if dim >= self.dimensions.len() {
                        return Err(ConfigError::UnknownDimension(
                            rank.name.clone(),
                            dim.to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
