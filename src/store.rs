// 🗄️ Store Gateway - SQLite persistence for locations and the hierarchy
//
// All functions take a plain `&Connection`, so they work the same on the
// store's connection and inside a `rusqlite::Transaction` (which derefs to
// `Connection`). A unit of work is:
//
//   let tx = store.transaction()?;
//   ... store functions on &tx ...
//   tx.commit()?;        // dropping `tx` instead rolls everything back
//
// NaN centroids are written as NULL and read back as NaN.

use crate::entities::{
    CountyTimeSlot, HierarchyEntity, HierarchyLevel, Postcode, PostcodeBoundaryRecord,
    PostcodeLocation, PriceAggregates,
};
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Max. bound parameters per `IN (...)` query
pub(crate) const IN_CHUNK: usize = 500;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// STORE HANDLE
// ============================================================================

/// Owned database handle, passed explicitly to every import entry point
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        setup_database(&conn)?;
        debug!(path = %path.display(), "Store opened");

        Ok(Store {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Store { conn, path: None })
    }

    /// File backing the store, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin a unit of work; rolled back unless committed.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front, so contention with
    /// the aggregation worker waits on the busy timeout instead of failing
    /// a later write with SQLITE_BUSY_SNAPSHOT.
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode so the aggregation worker can read while importing
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS county_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            county TEXT,
            avg_e5 REAL NOT NULL DEFAULT 0,
            avg_e10 REAL NOT NULL DEFAULT 0,
            avg_diesel REAL NOT NULL DEFAULT 0,
            gs_num_e5 INTEGER NOT NULL DEFAULT 0,
            gs_num_e10 INTEGER NOT NULL DEFAULT 0,
            gs_num_diesel INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS state_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            state TEXT,
            avg_e5 REAL NOT NULL DEFAULT 0,
            avg_e10 REAL NOT NULL DEFAULT 0,
            avg_diesel REAL NOT NULL DEFAULT 0,
            gs_num_e5 INTEGER NOT NULL DEFAULT 0,
            gs_num_e10 INTEGER NOT NULL DEFAULT 0,
            gs_num_diesel INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS postcode_location (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_code INTEGER UNIQUE NOT NULL,
            label TEXT NOT NULL,
            population INTEGER NOT NULL,
            square_km REAL NOT NULL,
            center_longitude REAL,
            center_latitude REAL,
            county_data_id INTEGER REFERENCES county_data(id),
            state_data_id INTEGER REFERENCES state_data(id)
        );

        CREATE TABLE IF NOT EXISTS county_time_slot (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            county_data_id INTEGER NOT NULL REFERENCES county_data(id),
            start_date TEXT NOT NULL,
            avg_e5 REAL NOT NULL,
            avg_e10 REAL NOT NULL,
            avg_diesel REAL NOT NULL,
            gs_num_e5 INTEGER NOT NULL,
            gs_num_e10 INTEGER NOT NULL,
            gs_num_diesel INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS gas_station (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            post_code TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS gas_price (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            gas_station_id TEXT NOT NULL,
            e5 REAL NOT NULL,
            e10 REAL NOT NULL,
            diesel REAL NOT NULL,
            date TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_county_name ON county_data(county);
        CREATE INDEX IF NOT EXISTS idx_state_name ON state_data(state);
        CREATE INDEX IF NOT EXISTS idx_location_label ON postcode_location(label);
        CREATE INDEX IF NOT EXISTS idx_time_slot_county ON county_time_slot(county_data_id, start_date);
        CREATE INDEX IF NOT EXISTS idx_station_post_code ON gas_station(post_code);
        CREATE INDEX IF NOT EXISTS idx_price_station_date ON gas_price(gas_station_id, date);",
    )?;

    Ok(())
}

// ============================================================================
// HELPERS
// ============================================================================

/// UTC timestamps are stored as RFC 3339 text with a fixed format,
/// so lexical order equals time order
pub(crate) fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn from_db_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

pub(crate) const LOCATION_COLUMNS: &str = "l.id, l.post_code, l.label, l.population, l.square_km,
     l.center_longitude, l.center_latitude, l.county_data_id, l.state_data_id";

const AGGREGATE_COLUMNS: &str = "avg_e5, avg_e10, avg_diesel, gs_num_e5, gs_num_e10, gs_num_diesel";

pub(crate) fn location_from_row(row: &Row<'_>) -> rusqlite::Result<PostcodeLocation> {
    let longitude: Option<f64> = row.get(5)?;
    let latitude: Option<f64> = row.get(6)?;

    Ok(PostcodeLocation {
        id: row.get(0)?,
        postcode: row.get(1)?,
        label: row.get(2)?,
        population: row.get(3)?,
        square_km: row.get(4)?,
        center_longitude: longitude.unwrap_or(f64::NAN),
        center_latitude: latitude.unwrap_or(f64::NAN),
        county_data_id: row.get(7)?,
        state_data_id: row.get(8)?,
    })
}

pub(crate) fn aggregates_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<PriceAggregates> {
    Ok(PriceAggregates {
        avg_e5: row.get(offset)?,
        avg_e10: row.get(offset + 1)?,
        avg_diesel: row.get(offset + 2)?,
        gs_num_e5: row.get(offset + 3)?,
        gs_num_e10: row.get(offset + 4)?,
        gs_num_diesel: row.get(offset + 5)?,
    })
}

/// Entity columns starting at `offset`: id, name, aggregates.
/// A NULL id (LEFT JOIN without match) yields `None`.
fn entity_from_row(
    row: &Row<'_>,
    offset: usize,
    level: HierarchyLevel,
) -> rusqlite::Result<Option<HierarchyEntity>> {
    let id: Option<i64> = row.get(offset)?;
    let Some(id) = id else {
        return Ok(None);
    };

    Ok(Some(HierarchyEntity {
        id,
        level,
        name: row.get(offset + 1)?,
        aggregates: aggregates_from_row(row, offset + 2)?,
    }))
}

// ============================================================================
// POSTCODE LOCATIONS
// ============================================================================

/// Location joined with its county and state (either may be missing)
#[derive(Debug, Clone, PartialEq)]
pub struct LocationWithHierarchy {
    pub location: PostcodeLocation,
    pub county: Option<HierarchyEntity>,
    pub state: Option<HierarchyEntity>,
}

impl LocationWithHierarchy {
    pub fn entity(&self, level: HierarchyLevel) -> Option<&HierarchyEntity> {
        match level {
            HierarchyLevel::County => self.county.as_ref(),
            HierarchyLevel::State => self.state.as_ref(),
        }
    }
}

fn joined_select(filter: &str) -> String {
    format!(
        "SELECT {loc},
                c.id, c.county, c.{agg_c},
                s.id, s.state, s.{agg_s}
         FROM postcode_location l
         LEFT JOIN county_data c ON c.id = l.county_data_id
         LEFT JOIN state_data s ON s.id = l.state_data_id
         {filter}
         ORDER BY l.post_code",
        loc = LOCATION_COLUMNS,
        agg_c = AGGREGATE_COLUMNS.replace(", ", ", c."),
        agg_s = AGGREGATE_COLUMNS.replace(", ", ", s."),
        filter = filter,
    )
}

fn joined_from_row(row: &Row<'_>) -> rusqlite::Result<LocationWithHierarchy> {
    Ok(LocationWithHierarchy {
        location: location_from_row(row)?,
        county: entity_from_row(row, 9, HierarchyLevel::County)?,
        state: entity_from_row(row, 17, HierarchyLevel::State)?,
    })
}

pub fn find_location(conn: &Connection, postcode: Postcode) -> Result<Option<PostcodeLocation>> {
    let location = conn
        .query_row(
            &format!(
                "SELECT {} FROM postcode_location l WHERE l.post_code = ?1",
                LOCATION_COLUMNS
            ),
            params![postcode],
            location_from_row,
        )
        .optional()?;

    Ok(location)
}

pub fn find_location_with_hierarchy(
    conn: &Connection,
    postcode: Postcode,
) -> Result<Option<LocationWithHierarchy>> {
    let location = conn
        .query_row(
            &joined_select("WHERE l.post_code = ?1"),
            params![postcode],
            joined_from_row,
        )
        .optional()?;

    Ok(location)
}

/// Insert a new location referencing the given county/state rows
pub fn insert_location(
    conn: &Connection,
    record: &PostcodeBoundaryRecord,
    county_data_id: Option<i64>,
    state_data_id: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO postcode_location (
            post_code, label, population, square_km,
            center_longitude, center_latitude, county_data_id, state_data_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.postcode,
            record.label,
            record.population,
            record.square_km,
            finite(record.center_longitude),
            finite(record.center_latitude),
            county_data_id,
            state_data_id,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Overwrite label, population, area and centroid; references untouched
pub fn update_location_values(conn: &Connection, location: &PostcodeLocation) -> Result<()> {
    conn.execute(
        "UPDATE postcode_location
         SET label = ?1, population = ?2, square_km = ?3,
             center_longitude = ?4, center_latitude = ?5
         WHERE id = ?6",
        params![
            location.label,
            location.population,
            location.square_km,
            finite(location.center_longitude),
            finite(location.center_latitude),
            location.id,
        ],
    )?;

    Ok(())
}

pub fn set_location_entity(
    conn: &Connection,
    location_id: i64,
    level: HierarchyLevel,
    entity_id: Option<i64>,
) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE postcode_location SET {} = ?1 WHERE id = ?2",
            level.location_column()
        ),
        params![entity_id, location_id],
    )?;

    Ok(())
}

pub fn all_locations_with_hierarchy(conn: &Connection) -> Result<Vec<LocationWithHierarchy>> {
    let mut stmt = conn.prepare(&joined_select(""))?;

    let locations = stmt
        .query_map([], joined_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(locations)
}

pub fn locations_with_hierarchy_by_postcodes(
    conn: &Connection,
    postcodes: &[Postcode],
) -> Result<Vec<LocationWithHierarchy>> {
    let mut locations = Vec::new();

    for chunk in postcodes.chunks(IN_CHUNK) {
        let sql = joined_select(&format!(
            "WHERE l.post_code IN ({})",
            placeholders(chunk.len())
        ));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter()), joined_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        locations.extend(rows);
    }

    // Duplicate postcodes in the input would show up once per chunk
    locations.sort_by_key(|l| l.location.postcode);
    locations.dedup_by_key(|l| l.location.postcode);

    Ok(locations)
}

pub fn count_locations(conn: &Connection) -> Result<i64> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM postcode_location", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// COUNTY / STATE ENTITIES
// ============================================================================

fn entity_select(level: HierarchyLevel, filter: &str) -> String {
    format!(
        "SELECT id, {name}, {agg} FROM {table} {filter}",
        name = level.name_column(),
        agg = AGGREGATE_COLUMNS,
        table = level.table(),
        filter = filter,
    )
}

/// Insert an entity; `None` creates an unnamed placeholder
pub fn insert_entity(conn: &Connection, level: HierarchyLevel, name: Option<&str>) -> Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES (?1)",
            level.table(),
            level.name_column()
        ),
        params![name],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn find_entity(
    conn: &Connection,
    level: HierarchyLevel,
    id: i64,
) -> Result<Option<HierarchyEntity>> {
    let entity = conn
        .query_row(&entity_select(level, "WHERE id = ?1"), params![id], |row| {
            entity_from_row(row, 0, level)
        })
        .optional()?
        .flatten();

    Ok(entity)
}

/// Oldest entity carrying `name`
pub fn find_entity_by_name(
    conn: &Connection,
    level: HierarchyLevel,
    name: &str,
) -> Result<Option<HierarchyEntity>> {
    let filter = format!("WHERE {} = ?1 ORDER BY id LIMIT 1", level.name_column());
    let entity = conn
        .query_row(&entity_select(level, &filter), params![name], |row| {
            entity_from_row(row, 0, level)
        })
        .optional()?
        .flatten();

    Ok(entity)
}

pub fn all_entities(conn: &Connection, level: HierarchyLevel) -> Result<Vec<HierarchyEntity>> {
    let mut stmt = conn.prepare(&entity_select(level, "ORDER BY id"))?;

    let entities = stmt
        .query_map([], |row| entity_from_row(row, 0, level))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entities.into_iter().flatten().collect())
}

pub fn rename_entity(conn: &Connection, level: HierarchyLevel, id: i64, name: &str) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET {} = ?1 WHERE id = ?2",
            level.table(),
            level.name_column()
        ),
        params![name, id],
    )?;

    Ok(())
}

pub fn update_entity_aggregates(
    conn: &Connection,
    level: HierarchyLevel,
    id: i64,
    aggregates: &PriceAggregates,
) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET avg_e5 = ?1, avg_e10 = ?2, avg_diesel = ?3,
                 gs_num_e5 = ?4, gs_num_e10 = ?5, gs_num_diesel = ?6
             WHERE id = ?7",
            level.table()
        ),
        params![
            aggregates.avg_e5,
            aggregates.avg_e10,
            aggregates.avg_diesel,
            aggregates.gs_num_e5,
            aggregates.gs_num_e10,
            aggregates.gs_num_diesel,
            id,
        ],
    )?;

    Ok(())
}

/// Orphan cleanup: detach and delete every entity whose name is NULL or "".
/// Returns the number of deleted rows.
pub fn delete_unnamed_entities(conn: &Connection, level: HierarchyLevel) -> Result<usize> {
    let unnamed = format!(
        "SELECT id FROM {table} WHERE {name} IS NULL OR {name} = ''",
        table = level.table(),
        name = level.name_column(),
    );

    conn.execute(
        &format!(
            "UPDATE postcode_location SET {column} = NULL WHERE {column} IN ({unnamed})",
            column = level.location_column(),
            unnamed = unnamed,
        ),
        [],
    )?;

    let deleted = conn.execute(
        &format!(
            "DELETE FROM {table} WHERE {name} IS NULL OR {name} = ''",
            table = level.table(),
            name = level.name_column(),
        ),
        [],
    )?;

    Ok(deleted)
}

pub fn count_entities(conn: &Connection, level: HierarchyLevel) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", level.table()),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// COUNTY TIME SLOTS (append-only)
// ============================================================================

pub fn insert_county_time_slot(
    conn: &Connection,
    county_data_id: i64,
    start_date: &DateTime<Utc>,
    aggregates: &PriceAggregates,
) -> Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO county_time_slot (county_data_id, start_date, {})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            AGGREGATE_COLUMNS
        ),
        params![
            county_data_id,
            to_db_time(start_date),
            aggregates.avg_e5,
            aggregates.avg_e10,
            aggregates.avg_diesel,
            aggregates.gs_num_e5,
            aggregates.gs_num_e10,
            aggregates.gs_num_diesel,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Time slots of one county, oldest first
pub fn county_time_slots(conn: &Connection, county_data_id: i64) -> Result<Vec<CountyTimeSlot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, county_data_id, start_date, {}
         FROM county_time_slot
         WHERE county_data_id = ?1
         ORDER BY start_date, id",
        AGGREGATE_COLUMNS
    ))?;

    let slots = stmt
        .query_map(params![county_data_id], |row| {
            Ok(CountyTimeSlot {
                id: row.get(0)?,
                county_data_id: row.get(1)?,
                start_date: from_db_time(row, 2)?,
                aggregates: aggregates_from_row(row, 3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(slots)
}
