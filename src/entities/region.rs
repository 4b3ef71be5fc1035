// 🗺️ County / State Entities - administrative hierarchy above a postcode
//
// Counties and states have the same shape (a name plus derived fuel price
// aggregates), so one struct serves both levels and `HierarchyLevel`
// selects the table.
//
// A county or state without a name is a placeholder (created for a new
// location before any hierarchy import) or an orphan (left behind by a
// reconciliation pass). Orphans are deleted at the end of every pass.

use super::gas_station::FuelType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel county name for rows without a county ("independent city")
pub const INDEPENDENT_CITY: &str = "Kreisfrei";

// ============================================================================
// HIERARCHY LEVEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HierarchyLevel {
    County,
    State,
}

impl HierarchyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyLevel::County => "county",
            HierarchyLevel::State => "state",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            HierarchyLevel::County => "county_data",
            HierarchyLevel::State => "state_data",
        }
    }

    /// Column holding the entity name
    pub fn name_column(&self) -> &'static str {
        match self {
            HierarchyLevel::County => "county",
            HierarchyLevel::State => "state",
        }
    }

    /// Foreign key column on postcode_location
    pub fn location_column(&self) -> &'static str {
        match self {
            HierarchyLevel::County => "county_data_id",
            HierarchyLevel::State => "state_data_id",
        }
    }

    pub fn all() -> [HierarchyLevel; 2] {
        [HierarchyLevel::County, HierarchyLevel::State]
    }
}

// ============================================================================
// PRICE AGGREGATES
// ============================================================================

/// Mean prices per fuel type and the number of stations behind each mean
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceAggregates {
    pub avg_e5: f64,
    pub avg_e10: f64,
    pub avg_diesel: f64,
    pub gs_num_e5: i64,
    pub gs_num_e10: i64,
    pub gs_num_diesel: i64,
}

impl PriceAggregates {
    pub fn average(&self, fuel: FuelType) -> f64 {
        match fuel {
            FuelType::E5 => self.avg_e5,
            FuelType::E10 => self.avg_e10,
            FuelType::Diesel => self.avg_diesel,
        }
    }

    pub fn stations(&self, fuel: FuelType) -> i64 {
        match fuel {
            FuelType::E5 => self.gs_num_e5,
            FuelType::E10 => self.gs_num_e10,
            FuelType::Diesel => self.gs_num_diesel,
        }
    }

    pub fn set(&mut self, fuel: FuelType, average: f64, stations: i64) {
        let (avg, num) = match fuel {
            FuelType::E5 => (&mut self.avg_e5, &mut self.gs_num_e5),
            FuelType::E10 => (&mut self.avg_e10, &mut self.gs_num_e10),
            FuelType::Diesel => (&mut self.avg_diesel, &mut self.gs_num_diesel),
        };
        *avg = average;
        *num = stations;
    }
}

// ============================================================================
// HIERARCHY ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyEntity {
    pub id: i64,
    pub level: HierarchyLevel,
    /// NULL and "" are both treated as "no name"
    pub name: Option<String>,
    pub aggregates: PriceAggregates,
}

impl HierarchyEntity {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Placeholder or orphan: eligible for removal
    pub fn is_unnamed(&self) -> bool {
        self.name().is_empty()
    }

    pub fn has_name(&self, name: &str) -> bool {
        !name.is_empty() && self.name() == name
    }
}

// ============================================================================
// COUNTY TIME SLOT (append-only history)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyTimeSlot {
    pub id: i64,
    pub county_data_id: i64,
    pub start_date: DateTime<Utc>,
    pub aggregates: PriceAggregates,
}
