// ⛽ Gas Stations & Price Observations
// Owned by the price subsystem; the import pipeline only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasStation {
    /// Station id of the price feed
    pub id: String,
    pub name: String,
    /// 5-digit postcode as delivered by the feed
    pub post_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuelType {
    E5,
    E10,
    Diesel,
}

impl FuelType {
    pub fn all() -> [FuelType; 3] {
        [FuelType::E5, FuelType::E10, FuelType::Diesel]
    }
}

/// One timestamped price report of a station (all fuels at once)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasPrice {
    pub gas_station_id: String,
    pub e5: f64,
    pub e10: f64,
    pub diesel: f64,
    pub date: DateTime<Utc>,
}

impl GasPrice {
    /// Price for one fuel, `None` when the station does not sell it
    pub fn price(&self, fuel: FuelType) -> Option<f64> {
        let value = match fuel {
            FuelType::E5 => self.e5,
            FuelType::E10 => self.e10,
            FuelType::Diesel => self.diesel,
        };
        (value.is_finite() && value > 0.0).then_some(value)
    }
}
