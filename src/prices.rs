// ⛽ Price Source - gas stations and price observations
//
// The price tables are filled by the price crawler; this side only reads
// them. `PriceSource` is the seam the aggregation engine depends on, so
// tests can hand in fixed observations without touching SQLite.

use crate::entities::{GasPrice, GasStation, Postcode};
use crate::error::Result;
use crate::store::{from_db_time, placeholders, to_db_time, IN_CHUNK};
use chrono::{DateTime, Duration, Months, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// PRICE WINDOW
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowUnit {
    Day,
    Week,
    Month,
}

/// Closed time range of price observations taken into account
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PriceWindow {
    /// `size` units back from `end`
    pub fn trailing(end: DateTime<Utc>, size: u32, unit: WindowUnit) -> Self {
        let start = match unit {
            WindowUnit::Day => end.checked_sub_signed(Duration::days(size as i64)),
            WindowUnit::Week => end.checked_sub_signed(Duration::weeks(size as i64)),
            WindowUnit::Month => end.checked_sub_months(Months::new(size)),
        }
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

        PriceWindow { start, end }
    }
}

// ============================================================================
// PRICE SOURCE
// ============================================================================

pub trait PriceSource {
    /// Stations located in any of the given postcodes
    fn find_stations_by_postcodes(&self, postcodes: &[Postcode]) -> Result<Vec<GasStation>>;

    /// Observations of the given stations inside `window`, oldest first.
    /// With `latest_only` just the newest observation per station.
    fn find_prices_by_station_ids(
        &self,
        station_ids: &[String],
        window: &PriceWindow,
        latest_only: bool,
    ) -> Result<Vec<GasPrice>>;
}

/// Price source reading the `gas_station` / `gas_price` tables
pub struct SqlitePriceSource<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePriceSource<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        SqlitePriceSource { conn }
    }
}

fn price_from_row(row: &Row<'_>) -> rusqlite::Result<GasPrice> {
    Ok(GasPrice {
        gas_station_id: row.get(0)?,
        e5: row.get(1)?,
        e10: row.get(2)?,
        diesel: row.get(3)?,
        date: from_db_time(row, 4)?,
    })
}

impl PriceSource for SqlitePriceSource<'_> {
    fn find_stations_by_postcodes(&self, postcodes: &[Postcode]) -> Result<Vec<GasStation>> {
        // Stations keep the zero-padded text form of the postcode
        let mut codes: Vec<String> = postcodes.iter().map(|p| p.to_string()).collect();
        codes.sort();
        codes.dedup();

        let mut stations = Vec::new();
        for chunk in codes.chunks(IN_CHUNK) {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT id, name, post_code FROM gas_station
                 WHERE post_code IN ({}) ORDER BY id",
                placeholders(chunk.len())
            ))?;

            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok(GasStation {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        post_code: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            stations.extend(rows);
        }

        Ok(stations)
    }

    fn find_prices_by_station_ids(
        &self,
        station_ids: &[String],
        window: &PriceWindow,
        latest_only: bool,
    ) -> Result<Vec<GasPrice>> {
        let start = to_db_time(&window.start);
        let end = to_db_time(&window.end);

        let mut prices = Vec::new();
        for chunk in station_ids.chunks(IN_CHUNK) {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT gas_station_id, e5, e10, diesel, date FROM gas_price
                 WHERE gas_station_id IN ({}) AND date >= ? AND date <= ?
                 ORDER BY date, id",
                placeholders(chunk.len())
            ))?;

            let bound = chunk
                .iter()
                .map(String::as_str)
                .chain([start.as_str(), end.as_str()]);
            let rows = stmt
                .query_map(params_from_iter(bound), price_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            prices.extend(rows);
        }
        // Each chunk is ordered on its own; stable, so ties keep row order
        prices.sort_by_key(|p| p.date);

        if latest_only {
            // Walk newest first and keep the first hit per station
            let mut seen = HashSet::new();
            let mut latest: Vec<GasPrice> = prices
                .into_iter()
                .rev()
                .filter(|p| seen.insert(p.gas_station_id.clone()))
                .collect();
            latest.reverse();
            return Ok(latest);
        }

        Ok(prices)
    }
}

// ============================================================================
// WRITE HELPERS (fixtures, crawler hand-over)
// ============================================================================

pub fn insert_gas_station(conn: &Connection, station: &GasStation) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO gas_station (id, name, post_code) VALUES (?1, ?2, ?3)",
        params![station.id, station.name, station.post_code],
    )?;
    Ok(())
}

pub fn insert_gas_price(conn: &Connection, price: &GasPrice) -> Result<i64> {
    conn.execute(
        "INSERT INTO gas_price (gas_station_id, e5, e10, diesel, date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            price.gas_station_id,
            price.e5,
            price.e10,
            price.diesel,
            to_db_time(&price.date),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}
