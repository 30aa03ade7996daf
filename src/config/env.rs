use crate::dict::NestedDict;
use crate::error::Result;
use crate::literal;

use super::source::ConfigSource;

/// Environment variables named `PREFIX<sep>A<sep>B`, mapped to the path `a.b`.
///
/// Path segments are lower-cased and values are coerced with
/// [`literal::coerce`], so `8080` becomes an integer and `[1, 2]` a list.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
    separator: String,
    vars: Option<Vec<(String, String)>>,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        let separator = separator.into();
        assert!(!separator.is_empty(), "separator must not be empty");
        Self {
            prefix: prefix.into(),
            separator,
            vars: None,
        }
    }

    /// Reads from `vars` instead of the process environment.
    pub fn from_vars<I, K, V>(prefix: impl Into<String>, separator: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut source = Self::new(prefix, separator);
        source.vars = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        source
    }

    fn vars(&self) -> Vec<(String, String)> {
        let mut vars = match &self.vars {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        };
        vars.sort();
        vars
    }
}

impl ConfigSource for EnvSource {
    fn overlay(&self, current: &NestedDict) -> Result<Option<NestedDict>> {
        let prefix_with_sep = format!("{}{}", self.prefix, self.separator);
        let tree_separator = current.separator();
        let layer = NestedDict::new().with_separator(tree_separator.clone());

        for (name, value) in self.vars() {
            let Some(path_str) = name.strip_prefix(&prefix_with_sep) else {
                continue;
            };
            if path_str.is_empty() {
                continue;
            }
            let path = path_str
                .split(self.separator.as_str())
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join(tree_separator.as_str());
            layer
                .set_with(&path, literal::coerce(&value), Some(true))
                .map_err(|err| err.context(name.as_str()))?;
        }

        Ok((!layer.is_empty()).then_some(layer))
    }

    fn label(&self) -> &'static str {
        "env"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_source_maps_nested_paths() {
        let source = EnvSource::from_vars(
            "MYAPP",
            "__",
            [
                ("MYAPP__DATABASE__HOST", "localhost"),
                ("MYAPP__DATABASE__PORT", "5432"),
                ("MYAPP__DEBUG", "true"),
                ("MYAPP__", "ignored"),
                ("OTHER__NAME", "ignored"),
            ],
        );
        let layer = source.overlay(&NestedDict::new()).unwrap().unwrap();

        assert_eq!(layer.get("database.host").unwrap(), "localhost");
        assert_eq!(layer.get("database.port").unwrap(), 5432);
        assert_eq!(layer.get("debug").unwrap(), true);
        assert_eq!(layer.keys(), vec!["database".to_string(), "debug".to_string()]);
    }

    #[test]
    fn test_env_source_without_matches() {
        let source = EnvSource::from_vars("MYAPP", "_", [("HOME", "/root")]);
        assert!(source.overlay(&NestedDict::new()).unwrap().is_none());
    }

    #[test]
    #[should_panic(expected = "separator must not be empty")]
    fn test_env_source_rejects_empty_separator() {
        EnvSource::new("MYAPP", "");
    }
}
