use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::env::EnvSource;
use super::file::FileSource;
use super::source::{ArgsSource, ConfigSource, DefaultsSource};
use crate::dict::NestedDict;
use crate::error::Result;

/// Builder for layering configuration from several sources.
///
/// Sources are merged in registration order, with later sources overriding
/// earlier ones. Mappings are merged recursively; other values (including
/// lists) are replaced entirely.
///
/// ## Variable References
///
/// String values can reference other config values using `${path.to.field}` syntax:
///
/// ```yaml
/// server:
///   host: localhost
///   port: 8080
///   url: "http://${server.host}:${server.port}/api"
/// ```
///
/// References are resolved once every layer is merged. A value that is
/// exactly one reference shares the referenced cell.
///
/// ## Example
///
/// ```no_run
/// use dragon_config::{ConfigBuilder, NestedDict};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct MyConfig {
///     name: String,
///     port: u16,
/// }
///
/// let defaults = NestedDict::from_pairs([("name", "demo")])?;
/// let config: MyConfig = ConfigBuilder::new()
///     .with_defaults(defaults)
///     .with_file("config/default.yaml", true)
///     .with_file("config/local.toml", false)
///     .build_into()?;
/// # Ok::<(), dragon_config::Error>(())
/// ```
#[derive(Debug)]
#[must_use = "builders do nothing until .build() is called"]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    interpolate: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Creates a builder with no sources; interpolation is on.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            interpolate: true,
        }
    }

    /// Adds an in-memory tree, typically the program defaults.
    pub fn with_defaults(self, tree: NestedDict) -> Self {
        self.with_source(DefaultsSource::new(tree))
    }

    /// Adds a JSON, YAML or TOML file to be loaded.
    ///
    /// If `required` is `true`, the build will fail if the file doesn't exist.
    /// Optional files that are missing are skipped.
    pub fn with_file(self, path: impl AsRef<Path>, required: bool) -> Self {
        self.with_source(FileSource::new(path, required))
    }

    /// Loads configuration from environment variables with the given prefix.
    ///
    /// Environment variables are mapped to config paths by:
    /// 1. Removing the prefix and separator
    /// 2. Splitting remaining segments on the separator
    /// 3. Converting path segments to lowercase
    ///
    /// Values are coerced like literals: numbers, booleans, null and
    /// flow-style lists or mappings, falling back to the raw string.
    ///
    /// ```no_run
    /// # use dragon_config::ConfigBuilder;
    /// // defaults -> env overrides -> local file overrides env
    /// let config = ConfigBuilder::new()
    ///     .with_file("config/default.yaml", true)
    ///     .with_env("MYAPP", "__")
    ///     .with_file("config/local.yaml", false)
    ///     .build()?;
    /// # Ok::<(), dragon_config::Error>(())
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `separator` is empty.
    pub fn with_env(self, prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        self.with_source(EnvSource::new(prefix, separator))
    }

    /// Adds command-line arguments (without the program name).
    ///
    /// Flags are typed after the tree merged from the earlier sources.
    pub fn with_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_source(ArgsSource::new(args))
    }

    /// Adds a custom source.
    pub fn with_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Turns `${...}` resolution after merging on or off.
    pub fn with_interpolation(mut self, enabled: bool) -> Self {
        self.interpolate = enabled;
        self
    }

    /// Loads and merges every source, then resolves references.
    pub fn build(self) -> Result<NestedDict> {
        let merged = NestedDict::new();

        for source in &self.sources {
            match source.overlay(&merged)? {
                Some(layer) => {
                    debug!(source = source.label(), keys = layer.len(), "merging config layer");
                    merged.merge(&layer)?;
                }
                None => debug!(source = source.label(), "config layer contributed nothing"),
            }
        }

        if self.interpolate {
            merged.interpolate()?;
        }
        Ok(merged)
    }

    /// Builds the tree and deserializes it into `T`.
    pub fn build_into<T: DeserializeOwned>(self) -> Result<T> {
        self.build()?.to_plain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::Variable;
    use serde::Deserialize;
    use std::fs;
    use tempfile::tempdir;

    #[derive(Debug, Deserialize)]
    struct Server {
        host: String,
        port: u16,
        url: String,
    }

    #[derive(Debug, Deserialize)]
    struct AppConfig {
        name: String,
        server: Server,
    }

    #[test]
    fn test_layers_apply_in_registration_order() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("default.yaml");
        let local = dir.path().join("local.toml");
        fs::write(&base, "name: demo\nserver:\n  host: localhost\n  port: 80\n").unwrap();
        fs::write(&local, "[server]\nport = 8080\n").unwrap();

        let config = ConfigBuilder::new()
            .with_file(&base, true)
            .with_file(&local, true)
            .with_file(dir.path().join("missing.yaml"), false)
            .with_source(EnvSource::from_vars("APP", "__", [("APP__SERVER__HOST", "example.org")]))
            .build()
            .unwrap();

        assert_eq!(config.get("name").unwrap(), "demo");
        assert_eq!(config.get("server.host").unwrap(), "example.org");
        assert_eq!(config.get("server.port").unwrap(), 8080);
    }

    #[test]
    fn test_build_into_typed_struct_after_interpolation() {
        let defaults = NestedDict::from_pairs([
            ("name", "demo"),
            ("server.host", "localhost"),
            ("server.url", "http://${server.host}:${server.port}/api"),
        ])
        .unwrap();
        let config: AppConfig = ConfigBuilder::new()
            .with_defaults(defaults)
            .with_args(["--server.port", "9000"])
            .build_into()
            .unwrap();

        assert_eq!(config.name, "demo");
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.url, "http://localhost:9000/api");
    }

    #[test]
    fn test_build_leaves_defaults_untouched() {
        let defaults = NestedDict::from_pairs([("server.host", "localhost"), ("server.url", "${server.host}")]).unwrap();
        let env = [("APP__SERVER__PORT", "9000"), ("APP__SERVER__HOST", "prod")];

        let config = ConfigBuilder::new()
            .with_defaults(defaults.clone())
            .with_source(EnvSource::from_vars("APP", "__", env))
            .build()
            .unwrap();
        assert_eq!(config.get("server.port").unwrap(), 9000);
        assert_eq!(config.get("server.url").unwrap(), "prod");

        assert!(!defaults.contains("server.port"));
        assert_eq!(defaults.get("server.host").unwrap(), "localhost");
        assert_eq!(defaults.get("server.url").unwrap(), "${server.host}");

        let again = ConfigBuilder::new().with_defaults(defaults).build().unwrap();
        assert!(!again.contains("server.port"));
        assert_eq!(again.get("server.url").unwrap(), "localhost");
    }

    #[test]
    fn test_interpolation_can_be_disabled() {
        let defaults = NestedDict::from_pairs([("a", "x"), ("b", "${a}")]).unwrap();
        let config = ConfigBuilder::new()
            .with_defaults(defaults)
            .with_interpolation(false)
            .build()
            .unwrap();
        assert_eq!(config.get("b").unwrap(), "${a}");
    }

    #[test]
    fn test_required_file_missing() {
        let result = ConfigBuilder::new()
            .with_file("/nonexistent/path/config.yaml", true)
            .build();
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_args_update_default_cells() {
        let epochs = Variable::builder().value(10).kind(crate::Kind::Int).build().unwrap();
        let defaults = NestedDict::new();
        defaults.set("train.epochs", &epochs).unwrap();

        let config = ConfigBuilder::new()
            .with_defaults(defaults)
            .with_args(["--train.epochs", "3"])
            .build()
            .unwrap();
        assert_eq!(config.get("train.epochs").unwrap(), 3);
        assert_eq!(epochs.get(), 3);

        let err = ConfigBuilder::new()
            .with_defaults(NestedDict::from_pairs([("epochs", 10)]).unwrap())
            .with_args(["--epochs", "many"])
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }
}
