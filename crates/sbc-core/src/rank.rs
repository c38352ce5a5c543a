//! Rank statistics.
//!
//! The rank of a true value among `L` posterior draws is the number of draws
//! strictly below it. Ties never count, so the rank lies in `0..=L` and is
//! uniform on that set when the posterior is computed faithfully.

use indexmap::IndexMap;
use sbc_common::{Error, Result};

use crate::fit::DrawTable;
use crate::model::ParameterVector;

/// Count of draws strictly below `truth`.
pub fn rank(truth: f64, draws: &[f64]) -> Result<u32> {
    if truth.is_nan() {
        return Err(Error::NumericalInstability(
            "true value is NaN; rank undefined".to_string(),
        ));
    }
    Ok(draws.iter().filter(|&&d| d < truth).count() as u32)
}

/// Rank of every parameter of `truth` against the thinned `draws`.
///
/// Columns are matched by name, so the table and the vector must share the
/// parameter schema.
pub fn rank_all(truth: &ParameterVector, draws: &DrawTable) -> Result<IndexMap<String, u32>> {
    let mut ranks = IndexMap::with_capacity(truth.len());
    for (name, value) in truth.iter() {
        let idx = draws.column_index(name).ok_or_else(|| {
            Error::SchemaMismatch(format!("posterior draws lack column '{}'", name))
        })?;
        let r = rank(value, &draws.column(idx))
            .map_err(|_| Error::NumericalInstability(format!("true value of '{}' is NaN", name)))?;
        ranks.insert(name.to_string(), r);
    }
    Ok(ranks)
}
