//! File-based configuration source.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dict::NestedDict;
use crate::error::Result;

use super::source::ConfigSource;

/// A configuration source that loads a JSON, YAML or TOML file.
///
/// Files can be marked as required or optional. Required files that don't exist
/// cause an error; optional files that don't exist are skipped.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    required: bool,
}

impl FileSource {
    /// Creates a new file source. The format follows the file extension.
    pub fn new(path: impl AsRef<Path>, required: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            required,
        }
    }
}

impl ConfigSource for FileSource {
    fn overlay(&self, _current: &NestedDict) -> Result<Option<NestedDict>> {
        if !self.required && !self.path.exists() {
            debug!(path = %self.path.display(), "optional config file not found, skipping");
            return Ok(None);
        }
        NestedDict::load(&self.path).map(Some)
    }

    fn label(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;

    #[test]
    fn test_file_source_loads_valid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "key = \"value\"\n[server]\nport = 8080").unwrap();

        let source = FileSource::new(file.path(), true);
        let layer = source.overlay(&NestedDict::new()).unwrap().unwrap();

        assert_eq!(layer.get("key").unwrap(), "value");
        assert_eq!(layer.get("server.port").unwrap(), 8080);
    }

    #[test]
    fn test_file_source_required_missing() {
        let source = FileSource::new("/nonexistent/path/config.toml", true);
        let result = source.overlay(&NestedDict::new());

        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_file_source_optional_missing() {
        let source = FileSource::new("/nonexistent/path/config.toml", false);
        assert!(source.overlay(&NestedDict::new()).unwrap().is_none());
    }
}
