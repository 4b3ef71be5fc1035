// Entity Models
// "Postcode is the join key, counties and states are shared nodes above it"
//
// - location:    postcode value type, decoded boundary record, stored location
// - region:      county/state entities, price aggregates, county time slots
// - gas_station: read-only view of the price subsystem

pub mod gas_station;
pub mod location;
pub mod region;

pub use gas_station::{FuelType, GasPrice, GasStation};
pub use location::{InvalidPostcode, Postcode, PostcodeBoundaryRecord, PostcodeLocation};
pub use region::{
    CountyTimeSlot, HierarchyEntity, HierarchyLevel, PriceAggregates, INDEPENDENT_CITY,
};
