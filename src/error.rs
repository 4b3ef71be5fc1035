// ⚠️ Import Errors
// One enum for the whole pipeline; the job runner wraps it in anyhow.
//
// Taxonomy:
//   Resource    - source file missing/unreadable, not gzip
//   Stream      - I/O failure while reading an opened stream
//   Decode      - malformed boundary feature (fail-fast)
//   Persistence - SQLite failure, enclosing transaction rolled back
//   Config      - invalid configuration values
//
// Malformed hierarchy rows are NOT errors: the parser skips and counts them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to open import file {path}: {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Import stream failed: {0}")]
    Stream(#[from] std::io::Error),

    #[error("Malformed boundary feature #{index}: {message}")]
    Decode { index: usize, message: String },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ImportError {
    pub fn decode(index: usize, message: impl Into<String>) -> Self {
        ImportError::Decode {
            index,
            message: message.into(),
        }
    }

    /// Resource errors are reported to the job's log, not treated as crashes
    pub fn is_resource(&self) -> bool {
        matches!(self, ImportError::Resource { .. } | ImportError::Stream(_))
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_message() {
        let err = ImportError::decode(3, "missing field `plz`");
        assert_eq!(
            err.to_string(),
            "Malformed boundary feature #3: missing field `plz`"
        );
        assert!(!err.is_resource());
    }

    #[test]
    fn test_resource_error_keeps_path() {
        let err = ImportError::Resource {
            path: PathBuf::from("/data/plz.json.gz"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.is_resource());
        assert!(err.to_string().contains("/data/plz.json.gz"));

        println!("✅ Resource error test PASSED");
    }
}
