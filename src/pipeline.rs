// 🚚 Import Pipeline - the two batch jobs
//
//   update_postcode_coordinates  boundary .json.gz -> postcode locations
//   update_states_and_counties   hierarchy .csv.gz -> county/state links,
//                                then background price aggregation
//
// Both jobs run on the caller's thread. Everything they need travels in an
// explicit `ImportContext`; there is no global connection.

use crate::boundary::BoundaryDecoder;
use crate::config::ImportConfig;
use crate::error::Result;
use crate::hierarchy::parse_table;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport, UpsertReport};
use crate::source::ImportSource;
use crate::store::Store;
use crate::worker::{AggregationDispatcher, WorkerStats};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{error, info, instrument};
use uuid::Uuid;

pub struct ImportContext {
    pub store: Store,
    pub source: ImportSource,
    pub dispatcher: AggregationDispatcher,
}

impl ImportContext {
    pub fn new(store: Store, source: ImportSource, dispatcher: AggregationDispatcher) -> Self {
        ImportContext {
            store,
            source,
            dispatcher,
        }
    }

    /// Store and worker both on `config.database_path`
    pub fn from_config(config: &ImportConfig) -> Result<Self> {
        let store = Store::open(&config.database_path)?;
        let dispatcher =
            AggregationDispatcher::spawn(&config.database_path, config.aggregation_settings())?;

        Ok(Self::new(store, config.import_source(), dispatcher))
    }

    /// Wait for queued aggregation jobs, then release the store
    pub fn shutdown(self) -> WorkerStats {
        self.dispatcher.shutdown()
    }
}

/// Result of a hierarchy import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyImport {
    pub reconciliation: ReconciliationReport,
    pub skipped_rows: usize,
    /// Background job recomputing the affected prices
    pub aggregation_job: Uuid,
}

/// Decode the boundary file and upsert every postcode in one transaction
#[instrument(skip(ctx))]
pub fn update_postcode_coordinates(ctx: &mut ImportContext, file_name: &str) -> Result<UpsertReport> {
    let started = Instant::now();

    let result = ctx.source.open(file_name).and_then(|stream| {
        ReconciliationEngine::new().upsert_stream(&mut ctx.store, BoundaryDecoder::new(stream))
    });

    match result {
        Ok(report) => {
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "{}", report.summary());
            Ok(report)
        }
        Err(e) => {
            error!(error = %e, "Postcode coordinate import failed, nothing written");
            Err(e)
        }
    }
}

/// Parse the hierarchy table, reconcile, and queue price aggregation
#[instrument(skip(ctx))]
pub fn update_states_and_counties(
    ctx: &mut ImportContext,
    file_name: &str,
) -> Result<HierarchyImport> {
    let started = Instant::now();

    let result = ctx.source.open(file_name).and_then(parse_table).and_then(|table| {
        let report = ReconciliationEngine::new().reconcile_hierarchy(&mut ctx.store, &table)?;
        Ok((table, report))
    });

    let (table, reconciliation) = match result {
        Ok(done) => done,
        Err(e) => {
            error!(error = %e, "State/county import failed, nothing written");
            return Err(e);
        }
    };

    let mut seen = HashSet::new();
    let postcodes: Vec<_> = table
        .postcodes
        .iter()
        .copied()
        .filter(|postcode| seen.insert(*postcode))
        .collect();
    let aggregation_job = ctx.dispatcher.dispatch(postcodes);

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        job = %aggregation_job,
        "{}",
        reconciliation.summary()
    );

    Ok(HierarchyImport {
        reconciliation,
        skipped_rows: table.skipped_rows,
        aggregation_job,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregationSettings;
    use crate::entities::{GasPrice, GasStation, HierarchyLevel, Postcode};
    use crate::error::ImportError;
    use crate::prices::{insert_gas_price, insert_gas_station};
    use crate::source::test_support::write_gz;
    use crate::store;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    const BOUNDARIES: &str = "plz-5stellig.geojson.gz";
    const HIERARCHY: &str = "zuordnung_plz_ort_landkreis.csv.gz";

    fn feature(plz: &str, note: &str) -> String {
        format!(
            r#"{{"type":"Feature","properties":{{"plz":"{}","note":"{}","einwohner":500,"qkm":2.3}},
               "geometry":{{"type":"Polygon","coordinates":[[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,1.0]]]}}}}"#,
            plz, note
        )
    }

    fn context(dir: &TempDir) -> ImportContext {
        let db = dir.path().join("plz.db");
        ImportContext::new(
            Store::open(&db).unwrap(),
            ImportSource::new(dir.path()),
            AggregationDispatcher::spawn(&db, AggregationSettings::default()).unwrap(),
        )
    }

    #[test]
    fn test_coordinates_import_end_to_end() {
        let dir = TempDir::new().unwrap();
        write_gz(dir.path(), BOUNDARIES, &format!("[{}]", feature("10115", "10115 Berlin Mitte")));
        let mut ctx = context(&dir);

        let report = update_postcode_coordinates(&mut ctx, BOUNDARIES).unwrap();
        assert_eq!(report.inserted, 1);

        let location = store::find_location(ctx.store.connection(), Postcode(10115))
            .unwrap()
            .unwrap();
        assert_eq!(location.label, "10115 Berlin Mitte");
        assert_eq!(location.population, 500);
        assert!((location.square_km - 2.3).abs() < 1e-12);
        // Open traversal over the unit square
        assert!((location.center_longitude - 0.5).abs() < 1e-12);
        assert!((location.center_latitude - 0.5).abs() < 1e-12);

        let again = update_postcode_coordinates(&mut ctx, BOUNDARIES).unwrap();
        assert_eq!(again.updated, 1);
        assert_eq!(store::count_locations(ctx.store.connection()).unwrap(), 1);

        ctx.shutdown();
        println!("✅ Coordinate import test PASSED");
    }

    #[test]
    fn test_missing_file_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);

        let err = update_postcode_coordinates(&mut ctx, "missing.json.gz").unwrap_err();
        assert!(matches!(err, ImportError::Resource { .. }));

        let err = update_states_and_counties(&mut ctx, "missing.csv.gz").unwrap_err();
        assert!(err.is_resource());

        assert_eq!(store::count_locations(ctx.store.connection()).unwrap(), 0);
        assert_eq!(ctx.shutdown(), WorkerStats::default());
    }

    #[test]
    fn test_malformed_feature_rolls_back_import() {
        let dir = TempDir::new().unwrap();
        write_gz(
            dir.path(),
            BOUNDARIES,
            &format!(
                "[{},{{\"type\":\"Feature\",\"properties\":{{\"plz\":\"x\"}}}}]",
                feature("10115", "10115 Berlin Mitte")
            ),
        );
        let mut ctx = context(&dir);

        let err = update_postcode_coordinates(&mut ctx, BOUNDARIES).unwrap_err();

        assert!(matches!(err, ImportError::Decode { index: 1, .. }));
        assert_eq!(store::count_locations(ctx.store.connection()).unwrap(), 0);
        ctx.shutdown();
    }

    #[test]
    fn test_hierarchy_import_links_and_aggregates() {
        let dir = TempDir::new().unwrap();
        write_gz(
            dir.path(),
            BOUNDARIES,
            &format!(
                "[{},{}]",
                feature("10115", "10115 Berlin Mitte"),
                feature("10117", "10117 Berlin Mitte")
            ),
        );
        write_gz(
            dir.path(),
            HIERARCHY,
            "osm_id,ags,ort,plz,landkreis,bundesland\n\
             1,11000000,Berlin,10115,Mitte,Berlin\n\
             2,11000000,Berlin,10117,Mitte,Berlin\n\
             3,broken\n",
        );
        let mut ctx = context(&dir);

        insert_gas_station(
            ctx.store.connection(),
            &GasStation {
                id: "st-1".to_string(),
                name: "Tankstelle".to_string(),
                post_code: "10117".to_string(),
            },
        )
        .unwrap();
        insert_gas_price(
            ctx.store.connection(),
            &GasPrice {
                gas_station_id: "st-1".to_string(),
                e5: 1.859,
                e10: 1.799,
                diesel: 1.659,
                date: Utc::now() - Duration::days(1),
            },
        )
        .unwrap();

        update_postcode_coordinates(&mut ctx, BOUNDARIES).unwrap();
        let import = update_states_and_counties(&mut ctx, HIERARCHY).unwrap();

        assert_eq!(import.skipped_rows, 1);
        assert_eq!(import.reconciliation.locations, 2);

        let joined = store::find_location_with_hierarchy(ctx.store.connection(), Postcode(10115))
            .unwrap()
            .unwrap();
        let county = joined.county.unwrap();
        assert_eq!(county.name(), "Mitte");
        assert_eq!(joined.state.unwrap().name(), "Berlin");
        assert_eq!(
            store::count_entities(ctx.store.connection(), HierarchyLevel::County).unwrap(),
            1
        );

        let db = ctx.store.path().unwrap().to_path_buf();
        let stats = ctx.shutdown();
        assert_eq!(stats.completed, 1);

        let store = Store::open(&db).unwrap();
        let mitte = store::find_entity(store.connection(), HierarchyLevel::County, county.id)
            .unwrap()
            .unwrap();
        assert!((mitte.aggregates.avg_e5 - 1.859).abs() < 1e-9);
        assert_eq!(mitte.aggregates.gs_num_e5, 1);
        assert_eq!(store::county_time_slots(store.connection(), county.id).unwrap().len(), 1);

        println!("✅ Hierarchy pipeline test PASSED");
    }
}
