// 🧭 Boundary Stream Decoder
// Lazily decodes the postcode boundary file, one feature at a time.
//
// File layout (after gunzip):
//
//   [
//     { "type": "Feature",
//       "properties": { "plz": "10115", "note": "10115 Berlin Mitte",
//                       "einwohner": 500, "qkm": 2.3 },
//       "geometry": { "type": "Polygon",
//                     "coordinates": [ [ [13.37, 52.52], ... ] ] } },
//     ...
//   ]
//
// The array framing ('[', ',', ']') is consumed by hand; every element is
// handed to serde_json on its own, so the document is never held in memory.
// A malformed feature stops the import: the iterator yields that error once
// and is fused afterwards.

use crate::entities::{Postcode, PostcodeBoundaryRecord};
use crate::error::{ImportError, Result};
use crate::geometry::{self, Ring};
use serde::{Deserialize, Deserializer};
use std::io::BufRead;
use tracing::debug;

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Deserialize)]
struct BoundaryFeature {
    #[serde(rename = "type", default)]
    _kind: String,
    properties: BoundaryProperties,
    geometry: BoundaryGeometry,
}

#[derive(Debug, Deserialize)]
struct BoundaryProperties {
    #[serde(deserialize_with = "postcode_from_string")]
    plz: Postcode,
    note: String,
    einwohner: i64,
    qkm: f64,
}

#[derive(Debug, Deserialize)]
struct BoundaryGeometry {
    #[serde(rename = "type", default)]
    _kind: String,
    coordinates: Vec<Ring>,
}

/// `"plz": "01067"` - integer encoded as a JSON string
fn postcode_from_string<'de, D>(deserializer: D) -> std::result::Result<Postcode, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<Postcode>().map_err(serde::de::Error::custom)
}

impl BoundaryFeature {
    fn into_record(self) -> PostcodeBoundaryRecord {
        let summary = geometry::summarize(&self.geometry.coordinates);

        PostcodeBoundaryRecord {
            postcode: self.properties.plz,
            label: self.properties.note,
            population: self.properties.einwohner,
            square_km: self.properties.qkm,
            center_longitude: summary.centroid.longitude,
            center_latitude: summary.centroid.latitude,
        }
    }
}

// ============================================================================
// DECODER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Framing {
    /// Before the opening '['
    Start,
    /// After '[', no element read yet
    First,
    /// After an element, expecting ',' or ']'
    Next,
    Done,
}

pub struct BoundaryDecoder<R> {
    reader: R,
    framing: Framing,
    index: usize,
}

impl<R: BufRead> BoundaryDecoder<R> {
    pub fn new(reader: R) -> Self {
        BoundaryDecoder {
            reader,
            framing: Framing::Start,
            index: 0,
        }
    }

    /// Number of features decoded so far
    pub fn decoded(&self) -> usize {
        self.index
    }

    /// Next non-whitespace byte, left in the buffer
    fn peek_token(&mut self) -> Result<Option<u8>> {
        loop {
            let (skip, token) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(None);
                }
                match buf.iter().position(|b| !b.is_ascii_whitespace()) {
                    Some(pos) => (pos, Some(buf[pos])),
                    None => (buf.len(), None),
                }
            };
            self.reader.consume(skip);
            if token.is_some() {
                return Ok(token);
            }
        }
    }

    fn unexpected(&self, found: Option<u8>, expected: &str) -> ImportError {
        let message = match found {
            Some(b) => format!("expected {}, found {:?}", expected, b as char),
            None => format!("expected {}, found end of stream", expected),
        };
        ImportError::decode(self.index, message)
    }

    fn advance(&mut self) -> Result<Option<PostcodeBoundaryRecord>> {
        if self.framing == Framing::Start {
            match self.peek_token()? {
                Some(b'[') => self.reader.consume(1),
                other => return Err(self.unexpected(other, "'['")),
            }
            self.framing = Framing::First;
        }

        match self.framing {
            Framing::First => match self.peek_token()? {
                Some(b']') => {
                    self.reader.consume(1);
                    return Ok(None);
                }
                Some(_) => {}
                None => return Err(self.unexpected(None, "feature or ']'")),
            },
            Framing::Next => match self.peek_token()? {
                Some(b',') => self.reader.consume(1),
                Some(b']') => {
                    self.reader.consume(1);
                    return Ok(None);
                }
                other => return Err(self.unexpected(other, "',' or ']'")),
            },
            Framing::Start | Framing::Done => return Ok(None),
        }

        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        let feature = BoundaryFeature::deserialize(&mut de)
            .map_err(|e| ImportError::decode(self.index, e.to_string()))?;

        self.framing = Framing::Next;
        self.index += 1;

        Ok(Some(feature.into_record()))
    }
}

impl<R: BufRead> Iterator for BoundaryDecoder<R> {
    type Item = Result<PostcodeBoundaryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.framing == Framing::Done {
            return None;
        }

        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.framing = Framing::Done;
                debug!(features = self.index, "Boundary stream finished");
                None
            }
            Err(e) => {
                self.framing = Framing::Done;
                Some(Err(e))
            }
        }
    }
}

/// Decode a whole stream, stopping at the first malformed feature
pub fn decode_all<R: BufRead>(reader: R) -> Result<Vec<PostcodeBoundaryRecord>> {
    BoundaryDecoder::new(reader).collect()
}
