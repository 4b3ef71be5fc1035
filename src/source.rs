// 📂 Import File Source
// Resolves logical file names against the configured import directory and
// opens them as gzip-decompressed, buffered byte streams.
//
// The returned stream owns both the file handle and the decoder; dropping
// it releases both, whichever way the consumer exits.

use crate::error::{ImportError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Buffered gzip stream over an import file
pub type CompressedStream = BufReader<GzDecoder<BufReader<File>>>;

#[derive(Debug, Clone)]
pub struct ImportSource {
    base_path: PathBuf,
}

impl ImportSource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        ImportSource {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.base_path.join(file_name.trim())
    }

    /// Open `file_name` below the base path as a decompressed stream.
    ///
    /// The gzip header is read eagerly so that a missing file and a file
    /// that is not gzip at all are both reported here as resource errors.
    pub fn open(&self, file_name: &str) -> Result<CompressedStream> {
        let path = self.resolve(file_name);
        debug!(path = %path.display(), "Opening import file");

        let file = File::open(&path).map_err(|source| {
            warn!(path = %path.display(), error = %source, "Failed to open import file");
            ImportError::Resource {
                path: path.clone(),
                source,
            }
        })?;

        let mut stream = BufReader::new(GzDecoder::new(BufReader::new(file)));

        if let Err(source) = stream.fill_buf() {
            warn!(
                path = %path.display(),
                error = %source,
                "Failed to create gzip reader"
            );
            return Err(ImportError::Resource { path, source });
        }

        Ok(stream)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::write_gz;
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_open_decompresses() {
        let dir = tempdir().unwrap();
        write_gz(dir.path(), "plz.csv.gz", "header\nrow\n");

        let source = ImportSource::new(dir.path());
        let mut content = String::new();
        source
            .open(" plz.csv.gz ")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();

        assert_eq!(content, "header\nrow\n");
    }

    #[test]
    fn test_missing_file_is_resource_error() {
        let dir = tempdir().unwrap();
        let source = ImportSource::new(dir.path());

        let err = source.open("does-not-exist.json.gz").unwrap_err();

        assert!(err.is_resource());
        println!("✅ Missing file test PASSED: {}", err);
    }

    #[test]
    fn test_plain_file_is_resource_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("plain.csv"), "not gzip at all").unwrap();

        let source = ImportSource::new(dir.path());

        assert!(source.open("plain.csv").unwrap_err().is_resource());
    }
}
