//! Data access port trait.

use crate::domain::backtest::AssetData;
use crate::domain::error::TrendgateError;
use crate::domain::fill::Fill;
use crate::domain::observation::Observation;

/// Source of per-asset observation rows and executed fills.
///
/// Implementations return rows in their stored order; the domain never
/// re-sorts.
pub trait DataPort {
    fn list_assets(&self) -> Result<Vec<String>, TrendgateError>;

    fn fetch_observations(&self, asset: &str) -> Result<Vec<Observation>, TrendgateError>;

    /// Fills for `asset`. An asset that never traded has none.
    fn fetch_fills(&self, asset: &str) -> Result<Vec<Fill>, TrendgateError>;

    fn fetch_asset(&self, asset: &str) -> Result<AssetData, TrendgateError> {
        Ok(AssetData::new(
            asset,
            self.fetch_observations(asset)?,
            self.fetch_fills(asset)?,
        ))
    }
}
