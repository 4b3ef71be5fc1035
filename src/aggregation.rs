// 📊 Aggregation Engine - county/state fuel price statistics
//
// Runs after a hierarchy import for the postcodes it touched:
//
//   stations at the postcodes
//     -> their price observations inside the trailing window
//     -> grouped by the county / state each postcode belongs to
//     -> one mean per fuel type and entity
//
// Every county whose aggregates changed also gets a time slot appended, so
// the county history grows by one snapshot per run.

use crate::entities::{FuelType, GasPrice, HierarchyEntity, HierarchyLevel, Postcode};
use crate::error::Result;
use crate::prices::{PriceSource, PriceWindow, SqlitePriceSource, WindowUnit};
use crate::store::{self, Store};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSettings {
    pub window_size: u32,
    pub window_unit: WindowUnit,
    /// Only the newest observation per station counts
    pub latest_only: bool,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        AggregationSettings {
            window_size: 1,
            window_unit: WindowUnit::Month,
            latest_only: false,
        }
    }
}

// ============================================================================
// PER-ENTITY AGGREGATION
// ============================================================================

/// Aggregated value of one fuel type for one entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuelAggregate {
    pub average: f64,
    /// Distinct stations behind `average`
    pub stations: i64,
}

pub trait PriceAggregator: Send {
    /// `None` when no observation offers `fuel`
    fn aggregate(&self, fuel: FuelType, observations: &[&GasPrice]) -> Option<FuelAggregate>;
}

/// Arithmetic mean over all observations, every observation weighted equally
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanPriceAggregator;

impl PriceAggregator for MeanPriceAggregator {
    fn aggregate(&self, fuel: FuelType, observations: &[&GasPrice]) -> Option<FuelAggregate> {
        let mut sum = 0.0;
        let mut count = 0usize;
        let mut stations = HashSet::new();

        for observation in observations {
            if let Some(price) = observation.price(fuel) {
                sum += price;
                count += 1;
                stations.insert(observation.gas_station_id.as_str());
            }
        }

        if count == 0 {
            return None;
        }

        Some(FuelAggregate {
            average: sum / count as f64,
            stations: stations.len() as i64,
        })
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub postcodes: usize,
    pub stations: usize,
    pub observations: usize,
    pub counties_updated: usize,
    pub states_updated: usize,
    pub time_slots: usize,
    pub window: PriceWindow,
}

impl AggregationReport {
    pub fn summary(&self) -> String {
        format!(
            "Aggregated {} observations of {} stations in {} postcodes: \
             {} counties, {} states updated, {} time slots",
            self.observations,
            self.stations,
            self.postcodes,
            self.counties_updated,
            self.states_updated,
            self.time_slots
        )
    }
}

// ============================================================================
// AGGREGATION ENGINE
// ============================================================================

pub struct AggregationEngine {
    settings: AggregationSettings,
    aggregator: Box<dyn PriceAggregator>,
}

impl AggregationEngine {
    pub fn new(settings: AggregationSettings) -> Self {
        Self::with_aggregator(settings, Box::new(MeanPriceAggregator))
    }

    pub fn with_aggregator(settings: AggregationSettings, aggregator: Box<dyn PriceAggregator>) -> Self {
        AggregationEngine {
            settings,
            aggregator,
        }
    }

    pub fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    /// Aggregate with prices from the store itself, window ending now
    pub fn run(&self, store: &mut Store, postcodes: &[Postcode]) -> Result<AggregationReport> {
        let tx = store.transaction()?;
        let source = SqlitePriceSource::new(&tx);
        let report = self.aggregate(&tx, &source, postcodes, Utc::now())?;
        tx.commit()?;

        Ok(report)
    }

    /// Aggregate with an external price source; all writes in one transaction
    pub fn run_with(
        &self,
        store: &mut Store,
        source: &dyn PriceSource,
        postcodes: &[Postcode],
        now: DateTime<Utc>,
    ) -> Result<AggregationReport> {
        let tx = store.transaction()?;
        let report = self.aggregate(&tx, source, postcodes, now)?;
        tx.commit()?;

        Ok(report)
    }

    #[instrument(skip_all, fields(postcodes = postcodes.len()))]
    pub fn aggregate(
        &self,
        conn: &Connection,
        source: &dyn PriceSource,
        postcodes: &[Postcode],
        now: DateTime<Utc>,
    ) -> Result<AggregationReport> {
        let window = PriceWindow::trailing(now, self.settings.window_size, self.settings.window_unit);
        let mut report = AggregationReport {
            postcodes: postcodes.len(),
            stations: 0,
            observations: 0,
            counties_updated: 0,
            states_updated: 0,
            time_slots: 0,
            window,
        };

        if postcodes.is_empty() {
            return Ok(report);
        }

        // (a) stations, keyed by the postcode they are located in
        let stations = source.find_stations_by_postcodes(postcodes)?;
        let mut postcode_of_station: HashMap<&str, Postcode> = HashMap::new();
        for station in &stations {
            match station.post_code.parse::<Postcode>() {
                Ok(postcode) => {
                    postcode_of_station.insert(station.id.as_str(), postcode);
                }
                Err(e) => warn!(station = %station.id, error = %e, "Station without usable postcode"),
            }
        }
        report.stations = postcode_of_station.len();

        // (b) observations inside the window
        let station_ids: Vec<String> = postcode_of_station.keys().map(|id| id.to_string()).collect();
        let prices = source.find_prices_by_station_ids(&station_ids, &window, self.settings.latest_only)?;
        report.observations = prices.len();

        let mut prices_by_postcode: HashMap<Postcode, Vec<&GasPrice>> = HashMap::new();
        for price in &prices {
            if let Some(postcode) = postcode_of_station.get(price.gas_station_id.as_str()) {
                prices_by_postcode.entry(*postcode).or_default().push(price);
            }
        }

        // (c) entities touched by the postcodes
        let locations = store::locations_with_hierarchy_by_postcodes(conn, postcodes)?;
        let mut entities: BTreeMap<(HierarchyLevel, i64), (HierarchyEntity, Vec<Postcode>)> =
            BTreeMap::new();
        for entry in &locations {
            for level in HierarchyLevel::all() {
                if let Some(entity) = entry.entity(level) {
                    entities
                        .entry((level, entity.id))
                        .or_insert_with(|| (entity.clone(), Vec::new()))
                        .1
                        .push(entry.location.postcode);
                }
            }
        }

        // (d) one aggregate per entity
        for (entity, entity_postcodes) in entities.values() {
            let observations: Vec<&GasPrice> = entity_postcodes
                .iter()
                .filter_map(|postcode| prices_by_postcode.get(postcode))
                .flatten()
                .copied()
                .collect();

            let mut aggregates = entity.aggregates;
            let mut changed = false;
            for fuel in FuelType::all() {
                if let Some(value) = self.aggregator.aggregate(fuel, &observations) {
                    aggregates.set(fuel, value.average, value.stations);
                    changed = true;
                }
            }

            if !changed {
                debug!(level = entity.level.as_str(), id = entity.id, "No prices, aggregates kept");
                continue;
            }

            store::update_entity_aggregates(conn, entity.level, entity.id, &aggregates)?;

            match entity.level {
                HierarchyLevel::County => {
                    store::insert_county_time_slot(conn, entity.id, &window.start, &aggregates)?;
                    report.counties_updated += 1;
                    report.time_slots += 1;
                }
                HierarchyLevel::State => report.states_updated += 1,
            }
        }

        info!("{}", report.summary());

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{GasStation, PostcodeBoundaryRecord, PriceAggregates};
    use crate::prices::{insert_gas_price, insert_gas_station};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn location(conn: &Connection, postcode: u32, county: i64, state: i64) {
        let record = PostcodeBoundaryRecord {
            postcode: Postcode(postcode),
            label: format!("{:05} Ort", postcode),
            population: 1,
            square_km: 1.0,
            center_longitude: 13.0,
            center_latitude: 52.0,
        };
        store::insert_location(conn, &record, Some(county), Some(state)).unwrap();
    }

    fn station(conn: &Connection, id: &str, post_code: &str) {
        insert_gas_station(
            conn,
            &GasStation {
                id: id.to_string(),
                name: id.to_string(),
                post_code: post_code.to_string(),
            },
        )
        .unwrap();
    }

    fn price(conn: &Connection, station: &str, e5: f64, e10: f64, diesel: f64, day: u32) {
        insert_gas_price(
            conn,
            &GasPrice {
                gas_station_id: station.to_string(),
                e5,
                e10,
                diesel,
                date: Utc.with_ymd_and_hms(2024, 5, day, 10, 0, 0).unwrap(),
            },
        )
        .unwrap();
    }

    /// Two counties in one state, three stations
    fn berlin_fixture() -> (Store, i64, i64, i64) {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connection();

        let mitte = store::insert_entity(conn, HierarchyLevel::County, Some("Mitte")).unwrap();
        let pankow = store::insert_entity(conn, HierarchyLevel::County, Some("Pankow")).unwrap();
        let berlin = store::insert_entity(conn, HierarchyLevel::State, Some("Berlin")).unwrap();

        location(conn, 10115, mitte, berlin);
        location(conn, 10117, mitte, berlin);
        location(conn, 13187, pankow, berlin);

        station(conn, "a", "10115");
        station(conn, "b", "10117");
        station(conn, "c", "13187");

        price(conn, "a", 1.80, 1.70, 1.60, 20);
        price(conn, "a", 1.90, 1.80, 0.0, 25);
        price(conn, "b", 2.00, 1.90, 0.0, 22);
        price(conn, "c", 1.70, 0.0, 1.50, 21);

        (store, mitte, pankow, berlin)
    }

    fn postcodes() -> Vec<Postcode> {
        vec![Postcode(10115), Postcode(10117), Postcode(13187)]
    }

    fn entity(store: &Store, level: HierarchyLevel, id: i64) -> HierarchyEntity {
        store::find_entity(store.connection(), level, id).unwrap().unwrap()
    }

    #[test]
    fn test_county_means_over_all_observations() {
        let (mut store, mitte, _, _) = berlin_fixture();
        let engine = AggregationEngine::new(AggregationSettings::default());

        let tx = store.transaction().unwrap();
        let report = engine
            .aggregate(&tx, &SqlitePriceSource::new(&tx), &postcodes(), now())
            .unwrap();
        tx.commit().unwrap();

        let mitte = entity(&store, HierarchyLevel::County, mitte);
        // (1.80 + 1.90 + 2.00) / 3
        assert!((mitte.aggregates.avg_e5 - 1.90).abs() < 1e-9);
        assert_eq!(mitte.aggregates.gs_num_e5, 2);
        // Diesel only offered once by station a
        assert!((mitte.aggregates.avg_diesel - 1.60).abs() < 1e-9);
        assert_eq!(mitte.aggregates.gs_num_diesel, 1);

        assert_eq!(report.counties_updated, 2);
        assert_eq!(report.states_updated, 1);
        assert_eq!(report.observations, 4);

        println!("✅ County aggregation test PASSED: {}", report.summary());
    }

    #[test]
    fn test_state_spans_all_counties() {
        let (mut store, _, _, berlin) = berlin_fixture();
        let engine = AggregationEngine::new(AggregationSettings::default());

        let tx = store.transaction().unwrap();
        engine
            .aggregate(&tx, &SqlitePriceSource::new(&tx), &postcodes(), now())
            .unwrap();
        tx.commit().unwrap();

        let berlin = entity(&store, HierarchyLevel::State, berlin);
        // (1.80 + 1.90 + 2.00 + 1.70) / 4
        assert!((berlin.aggregates.avg_e5 - 1.85).abs() < 1e-9);
        assert_eq!(berlin.aggregates.gs_num_e5, 3);
        assert_eq!(berlin.aggregates.gs_num_diesel, 2);
    }

    #[test]
    fn test_fuel_without_stations_keeps_stored_value() {
        let (mut store, _, pankow, _) = berlin_fixture();
        let previous = PriceAggregates {
            avg_e10: 1.66,
            gs_num_e10: 4,
            ..PriceAggregates::default()
        };
        store::update_entity_aggregates(store.connection(), HierarchyLevel::County, pankow, &previous)
            .unwrap();

        AggregationEngine::new(AggregationSettings::default())
            .run(&mut store, &postcodes())
            .unwrap();

        let pankow = entity(&store, HierarchyLevel::County, pankow);
        // Station c reports no E10
        assert_eq!(pankow.aggregates.avg_e10, 1.66);
        assert_eq!(pankow.aggregates.gs_num_e10, 4);
        assert!(pankow.aggregates.avg_e10.is_finite());
    }

    #[test]
    fn test_time_slot_appended_per_county() {
        let (mut store, mitte, _, _) = berlin_fixture();
        let engine = AggregationEngine::new(AggregationSettings::default());

        let tx = store.transaction().unwrap();
        engine
            .aggregate(&tx, &SqlitePriceSource::new(&tx), &postcodes(), now())
            .unwrap();
        engine
            .aggregate(&tx, &SqlitePriceSource::new(&tx), &postcodes(), now())
            .unwrap();
        tx.commit().unwrap();

        let slots = store::county_time_slots(store.connection(), mitte).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].start_date, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert_eq!(slots[0].aggregates, entity(&store, HierarchyLevel::County, mitte).aggregates);
    }

    #[test]
    fn test_observations_outside_window_ignored() {
        let (mut store, mitte, _, _) = berlin_fixture();
        let engine = AggregationEngine::new(AggregationSettings {
            window_size: 7,
            window_unit: WindowUnit::Day,
            latest_only: false,
        });

        let tx = store.transaction().unwrap();
        let report = engine
            .aggregate(&tx, &SqlitePriceSource::new(&tx), &postcodes(), now())
            .unwrap();
        tx.commit().unwrap();

        // Only the 25th is within seven days of June 1st
        assert_eq!(report.observations, 1);
        let mitte = entity(&store, HierarchyLevel::County, mitte);
        assert!((mitte.aggregates.avg_e5 - 1.90).abs() < 1e-9);
        assert_eq!(mitte.aggregates.gs_num_e5, 1);
    }

    #[test]
    fn test_latest_only_setting() {
        let (mut store, mitte, _, _) = berlin_fixture();
        let engine = AggregationEngine::new(AggregationSettings {
            latest_only: true,
            ..AggregationSettings::default()
        });

        let tx = store.transaction().unwrap();
        engine
            .aggregate(&tx, &SqlitePriceSource::new(&tx), &postcodes(), now())
            .unwrap();
        tx.commit().unwrap();

        let mitte = entity(&store, HierarchyLevel::County, mitte);
        // a: 1.90 (25th), b: 2.00
        assert!((mitte.aggregates.avg_e5 - 1.95).abs() < 1e-9);
    }

    #[test]
    fn test_no_stations_no_writes() {
        let mut store = Store::open_in_memory().unwrap();
        let county = store::insert_entity(store.connection(), HierarchyLevel::County, Some("Leer")).unwrap();
        let state = store::insert_entity(store.connection(), HierarchyLevel::State, Some("Land")).unwrap();
        location(store.connection(), 26789, county, state);

        let report = AggregationEngine::new(AggregationSettings::default())
            .run(&mut store, &[Postcode(26789)])
            .unwrap();

        assert_eq!(report.counties_updated, 0);
        assert_eq!(report.time_slots, 0);
        assert!(store::county_time_slots(store.connection(), county).unwrap().is_empty());
    }

    struct FixedPrices(Vec<GasStation>, Vec<GasPrice>);

    impl PriceSource for FixedPrices {
        fn find_stations_by_postcodes(&self, _: &[Postcode]) -> Result<Vec<GasStation>> {
            Ok(self.0.clone())
        }

        fn find_prices_by_station_ids(
            &self,
            _: &[String],
            _: &PriceWindow,
            _: bool,
        ) -> Result<Vec<GasPrice>> {
            Ok(self.1.clone())
        }
    }

    struct CheapestPrice;

    impl PriceAggregator for CheapestPrice {
        fn aggregate(&self, fuel: FuelType, observations: &[&GasPrice]) -> Option<FuelAggregate> {
            observations
                .iter()
                .filter_map(|o| o.price(fuel))
                .reduce(f64::min)
                .map(|average| FuelAggregate { average, stations: 1 })
        }
    }

    #[test]
    fn test_injected_source_and_aggregator() {
        let mut store = Store::open_in_memory().unwrap();
        let county = store::insert_entity(store.connection(), HierarchyLevel::County, Some("Mitte")).unwrap();
        let state = store::insert_entity(store.connection(), HierarchyLevel::State, Some("Berlin")).unwrap();
        location(store.connection(), 10115, county, state);

        let date = Utc.with_ymd_and_hms(2024, 5, 30, 0, 0, 0).unwrap();
        let source = FixedPrices(
            vec![GasStation {
                id: "x".to_string(),
                name: "X".to_string(),
                post_code: "10115".to_string(),
            }],
            vec![
                GasPrice { gas_station_id: "x".to_string(), e5: 1.9, e10: 1.8, diesel: 1.7, date },
                GasPrice { gas_station_id: "x".to_string(), e5: 1.7, e10: 1.6, diesel: 1.5, date },
            ],
        );

        let engine = AggregationEngine::with_aggregator(
            AggregationSettings::default(),
            Box::new(CheapestPrice),
        );
        engine.run_with(&mut store, &source, &[Postcode(10115)], now()).unwrap();

        let mitte = entity(&store, HierarchyLevel::County, county);
        assert_eq!(mitte.aggregates.avg_e5, 1.7);
        assert_eq!(mitte.aggregates.avg_diesel, 1.5);

        println!("✅ Injected aggregator test PASSED");
    }
}
