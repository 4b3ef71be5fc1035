// 🔎 Read-side Queries
// Lookups used by the frontend: location search, price averages and the
// county price history of a postcode. Postcodes arrive as user text here,
// so invalid input yields empty results instead of errors.

use crate::entities::{CountyTimeSlot, Postcode, PostcodeLocation};
use crate::error::Result;
use crate::store::{self, location_from_row, LOCATION_COLUMNS};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::warn;

const SEARCH_LIMIT: usize = 20;

/// County and state averages of one postcode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GasPriceAverages {
    pub postcode: String,
    pub county: String,
    pub state: String,
    pub county_avg_diesel: f64,
    pub county_avg_e10: f64,
    pub county_avg_e5: f64,
    pub state_avg_diesel: f64,
    pub state_avg_e10: f64,
    pub state_avg_e5: f64,
}

/// Case-insensitive substring search on the location label
pub fn search_locations(conn: &Connection, text: &str) -> Result<Vec<PostcodeLocation>> {
    let pattern = format!("%{}%", text.trim().to_lowercase());

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM postcode_location l
         WHERE lower(l.label) LIKE ?1
         ORDER BY l.post_code
         LIMIT ?2",
        LOCATION_COLUMNS
    ))?;

    let locations = stmt
        .query_map(params![pattern, SEARCH_LIMIT as i64], location_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(locations)
}

/// Lenient postcode list parsing; invalid entries are logged and dropped
pub fn parse_postcodes<S: AsRef<str>>(values: &[S]) -> Vec<Postcode> {
    values
        .iter()
        .filter_map(|value| match value.as_ref().parse::<Postcode>() {
            Ok(postcode) => Some(postcode),
            Err(e) => {
                warn!(error = %e, "Failed to parse postcode");
                None
            }
        })
        .collect()
}

pub fn find_locations_by_postcodes<S: AsRef<str>>(
    conn: &Connection,
    values: &[S],
) -> Result<Vec<store::LocationWithHierarchy>> {
    store::locations_with_hierarchy_by_postcodes(conn, &parse_postcodes(values))
}

/// Averages for a postcode; zeros and empty names when it is unknown
pub fn find_averages_by_postcode(conn: &Connection, postcode: &str) -> Result<GasPriceAverages> {
    let mut averages = GasPriceAverages {
        postcode: postcode.to_string(),
        ..GasPriceAverages::default()
    };

    let Ok(parsed) = postcode.parse::<Postcode>() else {
        return Ok(averages);
    };
    let Some(entry) = store::find_location_with_hierarchy(conn, parsed)? else {
        return Ok(averages);
    };

    if let Some(county) = &entry.county {
        averages.county = county.name().to_string();
        averages.county_avg_diesel = county.aggregates.avg_diesel;
        averages.county_avg_e10 = county.aggregates.avg_e10;
        averages.county_avg_e5 = county.aggregates.avg_e5;
    }
    if let Some(state) = &entry.state {
        averages.state = state.name().to_string();
        averages.state_avg_diesel = state.aggregates.avg_diesel;
        averages.state_avg_e10 = state.aggregates.avg_e10;
        averages.state_avg_e5 = state.aggregates.avg_e5;
    }

    Ok(averages)
}

/// Price history of the postcode's county, oldest slot first
pub fn find_county_time_slots_by_postcode(
    conn: &Connection,
    postcode: &str,
) -> Result<Vec<CountyTimeSlot>> {
    let Ok(parsed) = postcode.parse::<Postcode>() else {
        return Ok(Vec::new());
    };

    match store::find_location(conn, parsed)?.and_then(|l| l.county_data_id) {
        Some(county_id) => store::county_time_slots(conn, county_id),
        None => Ok(Vec::new()),
    }
}
