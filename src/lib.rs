// Postcode Import - Core Library
// Geodata ingestion, hierarchy reconciliation and price aggregation,
// used by the job runner binary and the tests

pub mod error;
pub mod geometry;
pub mod entities;
pub mod source;
pub mod boundary;       // Boundary Stream Decoder (.json.gz)
pub mod hierarchy;      // Hierarchy Table Parser (.csv.gz)
pub mod store;          // Store Gateway - SQLite
pub mod deduplication;  // Entity name cache, one row per name
pub mod reconciliation; // Reconciliation Engine
pub mod prices;
pub mod aggregation;    // Aggregation Engine
pub mod worker;         // Background aggregation queue
pub mod queries;
pub mod config;
pub mod pipeline;       // Import jobs

// Re-export commonly used types
pub use error::{ImportError, Result};
pub use geometry::{centroid, signed_area, summarize, Centroid, PolygonSummary, Ring};
pub use entities::{
    CountyTimeSlot, FuelType, GasPrice, GasStation, HierarchyEntity, HierarchyLevel,
    Postcode, PostcodeBoundaryRecord, PostcodeLocation, PriceAggregates, INDEPENDENT_CITY,
};
pub use source::ImportSource;
pub use boundary::{decode_all, BoundaryDecoder};
pub use hierarchy::{parse_table, HierarchyTable};
pub use store::{LocationWithHierarchy, Store};
pub use deduplication::{EntityNameCache, Resolution};
pub use reconciliation::{
    ReconciliationEngine, ReconciliationReport, ResolutionCounts, UpsertReport,
};
pub use prices::{PriceSource, PriceWindow, SqlitePriceSource, WindowUnit};
pub use aggregation::{
    AggregationEngine, AggregationReport, AggregationSettings, MeanPriceAggregator,
    PriceAggregator,
};
pub use worker::{AggregationDispatcher, AggregationJob, WorkerStats};
pub use queries::{
    find_averages_by_postcode, find_county_time_slots_by_postcode, parse_postcodes,
    search_locations, GasPriceAverages,
};
pub use crate::config::ImportConfig;
pub use pipeline::{
    update_postcode_coordinates, update_states_and_counties, HierarchyImport, ImportContext,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
