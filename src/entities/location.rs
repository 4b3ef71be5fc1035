// 📮 Postcode Location - one row per German postcode (PLZ)
//
// "Postcode is IDENTITY (join key), label/population/centroid are VALUES"
//
// The location carries two references into the administrative hierarchy:
// one county and one state. Both may be NULL after a reconciliation pass
// left the postcode without a mapping (orphaned location).

use crate::geometry::Centroid;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// POSTCODE
// ============================================================================

/// 5-digit numeric postal code. Leading zeros are not stored,
/// `Display` restores them ("1067" -> "01067").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Postcode(pub u32);

impl Postcode {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Postcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:05}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPostcode(pub String);

impl fmt::Display for InvalidPostcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid postcode: {:?}", self.0)
    }
}

impl std::error::Error for InvalidPostcode {}

impl FromStr for Postcode {
    type Err = InvalidPostcode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidPostcode(s.to_string()));
        }
        trimmed
            .parse::<u32>()
            .map(Postcode)
            .map_err(|_| InvalidPostcode(s.to_string()))
    }
}

impl ToSql for Postcode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0 as i64))
    }
}

impl FromSql for Postcode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = i64::column_result(value)?;
        u32::try_from(raw)
            .map(Postcode)
            .map_err(|_| FromSqlError::OutOfRange(raw))
    }
}

// ============================================================================
// BOUNDARY RECORD (transient, one per decoded feature)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcodeBoundaryRecord {
    pub postcode: Postcode,
    pub label: String,
    pub population: i64,
    pub square_km: f64,
    /// NaN when the polygon had no area
    pub center_longitude: f64,
    pub center_latitude: f64,
}

impl PostcodeBoundaryRecord {
    pub fn centroid(&self) -> Centroid {
        Centroid {
            longitude: self.center_longitude,
            latitude: self.center_latitude,
        }
    }
}

// ============================================================================
// POSTCODE LOCATION (persistent)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcodeLocation {
    pub id: i64,
    pub postcode: Postcode,
    pub label: String,
    pub population: i64,
    pub square_km: f64,
    pub center_longitude: f64,
    pub center_latitude: f64,
    pub county_data_id: Option<i64>,
    pub state_data_id: Option<i64>,
}

impl PostcodeLocation {
    /// Copy the geographic values of a freshly decoded record,
    /// hierarchy references stay as they are
    pub fn apply_boundary(&mut self, record: &PostcodeBoundaryRecord) {
        self.label = record.label.clone();
        self.population = record.population;
        self.square_km = record.square_km;
        self.center_longitude = record.center_longitude;
        self.center_latitude = record.center_latitude;
    }

    pub fn has_centroid(&self) -> bool {
        self.center_longitude.is_finite() && self.center_latitude.is_finite()
    }
}
