// 🏛️ Hierarchy Table Parser
// Postcode -> county / state mapping from the compressed CSV table.
//
// Columns (0-based):  ..., ..., ..., 3: postcode, 4: county, 5: state
//
// The table is large and noisy, so bad rows are skipped silently:
//   - fewer than 5 fields
//   - rows the csv reader cannot read
//   - non-numeric postcode
// A blank county means the postcode belongs to an independent city
// ("Kreisfrei").

use crate::entities::{Postcode, INDEPENDENT_CITY};
use crate::error::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use tracing::{debug, info};

const POSTCODE_FIELD: usize = 3;
const COUNTY_FIELD: usize = 4;
const STATE_FIELD: usize = 5;
const MIN_FIELDS: usize = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct HierarchyTable {
    pub county_by_postcode: HashMap<Postcode, String>,
    pub state_by_postcode: HashMap<Postcode, String>,
    /// Postcodes in order of appearance
    pub postcodes: Vec<Postcode>,
    /// Rows per state name
    pub postcodes_per_state: BTreeMap<String, usize>,
    pub skipped_rows: usize,
}

impl HierarchyTable {
    pub fn county_for(&self, postcode: Postcode) -> Option<&str> {
        self.county_by_postcode.get(&postcode).map(String::as_str)
    }

    pub fn state_for(&self, postcode: Postcode) -> Option<&str> {
        self.state_by_postcode.get(&postcode).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.postcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postcodes.is_empty()
    }

    /// Add one mapping row; later rows for the same postcode win
    pub fn insert(&mut self, postcode: Postcode, county: &str, state: &str) {
        let county = if county.trim().is_empty() {
            INDEPENDENT_CITY
        } else {
            county
        };

        self.county_by_postcode.insert(postcode, county.to_string());
        self.state_by_postcode.insert(postcode, state.to_string());
        self.postcodes.push(postcode);
        *self
            .postcodes_per_state
            .entry(state.to_string())
            .or_insert(0) += 1;
    }
}

/// Parse the (already decompressed) table.
///
/// Only I/O failures of the underlying stream are errors; everything
/// wrong with a single row is skipped.
pub fn parse_table<R: Read>(reader: R) -> Result<HierarchyTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut table = HierarchyTable::default();

    for result in rdr.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => {
                return Err(match e.into_kind() {
                    csv::ErrorKind::Io(io) => io.into(),
                    other => std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("{:?}", other),
                    )
                    .into(),
                });
            }
            Err(e) => {
                debug!(error = %e, "Skipping unreadable hierarchy row");
                table.skipped_rows += 1;
                continue;
            }
        };

        if record.len() < MIN_FIELDS {
            table.skipped_rows += 1;
            continue;
        }

        let postcode = match record[POSTCODE_FIELD].parse::<Postcode>() {
            Ok(postcode) => postcode,
            Err(_) => {
                table.skipped_rows += 1;
                continue;
            }
        };

        let county = &record[COUNTY_FIELD];
        let state = record.get(STATE_FIELD).unwrap_or("");

        table.insert(postcode, county, state);
    }

    info!(
        postcodes = table.len(),
        states = table.postcodes_per_state.len(),
        skipped = table.skipped_rows,
        "Parsed hierarchy table"
    );

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::gz_bytes;
    use flate2::read::GzDecoder;

    const HEADER: &str = "osm_id,ags,ort,plz,landkreis,bundesland\n";

    #[test]
    fn test_parse_berlin_row() {
        let csv = format!("{}1,11000000,Berlin,10115,Mitte,Berlin\n", HEADER);

        let table = parse_table(csv.as_bytes()).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.county_for(Postcode(10115)), Some("Mitte"));
        assert_eq!(table.state_for(Postcode(10115)), Some("Berlin"));
        assert_eq!(table.postcodes, vec![Postcode(10115)]);

        println!("✅ Hierarchy parse test PASSED");
    }

    #[test]
    fn test_blank_county_is_independent_city() {
        let csv = format!(
            "{}1,1,Dresden,01067,,Sachsen\n2,2,Leipzig,04103,   ,Sachsen\n",
            HEADER
        );

        let table = parse_table(csv.as_bytes()).unwrap();

        assert_eq!(table.county_for(Postcode(1067)), Some(INDEPENDENT_CITY));
        assert_eq!(table.county_for(Postcode(4103)), Some("Kreisfrei"));
        assert_eq!(table.postcodes_per_state.get("Sachsen"), Some(&2));
    }

    #[test]
    fn test_short_and_malformed_rows_are_skipped() {
        let csv = format!(
            "{}1,2,3\n1,1,Ort,abcde,Kreis,Land\n\n1,1,Ort,80331,München,Bayern\n",
            HEADER
        );

        let table = parse_table(csv.as_bytes()).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.county_for(Postcode(80331)), Some("München"));
        assert_eq!(table.skipped_rows, 2);
    }

    #[test]
    fn test_five_field_row_has_empty_state() {
        let csv = format!("{}1,1,Ort,24103,Kiel\n", HEADER);

        let table = parse_table(csv.as_bytes()).unwrap();

        assert_eq!(table.county_for(Postcode(24103)), Some("Kiel"));
        assert_eq!(table.state_for(Postcode(24103)), Some(""));
    }

    #[test]
    fn test_header_only() {
        let table = parse_table(HEADER.as_bytes()).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.skipped_rows, 0);
    }

    #[test]
    fn test_duplicate_postcode_last_row_wins() {
        let csv = format!(
            "{}1,1,A,10115,Mitte,Berlin\n2,2,B,10115,Pankow,Berlin\n",
            HEADER
        );

        let table = parse_table(csv.as_bytes()).unwrap();

        assert_eq!(table.county_for(Postcode(10115)), Some("Pankow"));
        assert_eq!(table.postcodes.len(), 2);
    }

    #[test]
    fn test_gzip_table() {
        let bytes = gz_bytes(&format!("{}1,1,Ort,10115,Mitte,Berlin\n", HEADER));

        let table = parse_table(GzDecoder::new(&bytes[..])).unwrap();

        assert_eq!(table.state_for(Postcode(10115)), Some("Berlin"));
    }
}
