//! Name-to-factory lookup for components described by configuration.
//!
//! ```
//! use dragon_config::{NestedDict, Registry};
//!
//! let mut optimizers: Registry<(String, f64)> = Registry::new();
//! optimizers.register("sgd", |args| Ok(("sgd".to_string(), args.get("lr")?.as_f64().unwrap_or(0.1))))?;
//!
//! let config = NestedDict::from_pairs([("optim.type", "sgd"), ("optim.lr", "0.5")])?;
//! let optim = config.child("optim")?;
//! let built = optimizers.build_from(&optim, &NestedDict::from_pairs([("lr", 0.01)])?)?;
//! assert_eq!(built, ("sgd".to_string(), 0.01));
//! # Ok::<(), dragon_config::Error>(())
//! ```

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::warn;

use crate::dict::{FlatDict, NestedDict};
use crate::error::{Error, Result};
use crate::value::{Kind, Value};

/// Builds a component from its arguments.
pub type Factory<T> = Rc<dyn Fn(&NestedDict) -> Result<T>>;

pub struct Registry<T> {
    components: IndexMap<String, Factory<T>>,
    default: Option<String>,
    allow_override: bool,
    key: String,
    case_sensitive: bool,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            components: self.components.clone(),
            default: self.default.clone(),
            allow_override: self.allow_override,
            key: self.key.clone(),
            case_sensitive: self.case_sensitive,
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            components: IndexMap::new(),
            default: None,
            allow_override: false,
            key: "type".to_string(),
            case_sensitive: true,
        }
    }

    /// Lets a registration replace an existing one instead of failing.
    pub fn with_override(mut self, allow: bool) -> Self {
        self.allow_override = allow;
        self
    }

    /// Field naming the component in [`Registry::build_from`]; may be dotted.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(&self.normalize(name))
    }

    /// Name of the component used when a lookup misses.
    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    fn normalize(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    /// Registers `factory` under `name`.
    ///
    /// Fails with [`Error::DuplicateName`] if the name is taken, unless
    /// overriding was allowed.
    pub fn register<F>(&mut self, name: impl AsRef<str>, factory: F) -> Result<&mut Self>
    where
        F: Fn(&NestedDict) -> Result<T> + 'static,
    {
        let name = self.normalize(name.as_ref());
        if self.components.contains_key(&name) {
            if !self.allow_override {
                return Err(Error::DuplicateName(name));
            }
            warn!(component = %name, "overriding registered component");
        }
        self.components.insert(name, Rc::new(factory));
        Ok(self)
    }

    /// Registers `factory` and makes it the fallback for unknown names.
    pub fn register_default<F>(&mut self, name: impl AsRef<str>, factory: F) -> Result<&mut Self>
    where
        F: Fn(&NestedDict) -> Result<T> + 'static,
    {
        self.register(name.as_ref(), factory)?;
        self.default = Some(self.normalize(name.as_ref()));
        Ok(self)
    }

    pub fn lookup(&self, name: &str) -> Result<Factory<T>> {
        if let Some(factory) = self.components.get(&self.normalize(name)) {
            return Ok(Rc::clone(factory));
        }
        let fallback = self
            .default
            .as_ref()
            .and_then(|default| self.components.get(default).map(|factory| (default, factory)));
        match fallback {
            Some((default, factory)) => {
                warn!(component = name, fallback = %default, "component is not registered, falling back");
                Ok(Rc::clone(factory))
            }
            None => Err(Error::KeyNotFound(name.to_string())),
        }
    }

    pub fn build(&self, name: &str, args: &NestedDict) -> Result<T> {
        let factory = self.lookup(name)?;
        factory(args)
    }

    /// Builds the component named by the `key` field of `config`.
    ///
    /// The factory receives a deep copy of `config` without that field,
    /// with `overrides` merged on top.
    pub fn build_from(&self, config: &NestedDict, overrides: &impl AsRef<FlatDict>) -> Result<T> {
        let args = config.deep_copy();
        let name = match args.pop(&self.key)?.resolved() {
            Value::Str(name) => name,
            other => {
                return Err(Error::TypeMismatch {
                    expected: Kind::Str,
                    value: other.to_string(),
                }
                .context(self.key.as_str()))
            }
        };
        args.merge(overrides)?;
        self.build(&name, &args)
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("default", &self.default)
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[derive(Debug, PartialEq)]
    struct Linear {
        inputs: i64,
        outputs: i64,
    }

    fn linear(args: &NestedDict) -> Result<Linear> {
        Ok(Linear {
            inputs: args.get("inputs")?.as_i64().unwrap_or_default(),
            outputs: args.get_or("outputs", 1).as_i64().unwrap_or_default(),
        })
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = Registry::new();
        registry.register("linear", linear).unwrap();
        let err = registry.register("linear", linear).unwrap_err();
        assert!(matches!(err, Error::DuplicateName(name) if name == "linear"));

        let mut registry = Registry::new().with_override(true);
        registry.register("linear", linear).unwrap();
        registry.register("linear", linear).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let mut registry = Registry::new().with_case_sensitive(false);
        registry.register("Linear", linear).unwrap();
        assert!(registry.contains("LINEAR"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["linear"]);

        let args = NestedDict::from_pairs([("inputs", 4)]).unwrap();
        let built = registry.build("linear", &args).unwrap();
        assert_eq!(built, Linear { inputs: 4, outputs: 1 });
    }

    #[test]
    fn test_lookup_falls_back_to_default() {
        let mut registry = Registry::new();
        assert_eq!(registry.lookup("conv").err().map(|err| err.kind()), Some(ErrorKind::KeyNotFound));

        registry.register_default("linear", linear).unwrap();
        assert_eq!(registry.default_name(), Some("linear"));
        let args = NestedDict::from_pairs([("inputs", 2), ("outputs", 3)]).unwrap();
        assert_eq!(registry.build("conv", &args).unwrap(), Linear { inputs: 2, outputs: 3 });
    }

    #[test]
    fn test_build_from_config() {
        let mut registry = Registry::new().with_key("layer.type");
        registry.register("linear", linear).unwrap();

        let config = NestedDict::from_pairs([
            ("layer.type", Value::from("linear")),
            ("inputs", Value::Int(8)),
            ("outputs", Value::Int(2)),
        ])
        .unwrap();
        let overrides = NestedDict::from_pairs([("outputs", 16)]).unwrap();
        let built = registry.build_from(&config, &overrides).unwrap();

        assert_eq!(built, Linear { inputs: 8, outputs: 16 });
        assert_eq!(config.get("layer.type").unwrap(), "linear");
    }

    #[test]
    fn test_build_from_requires_name() {
        let mut registry = Registry::new();
        registry.register("linear", linear).unwrap();

        let config = NestedDict::from_pairs([("inputs", 8)]).unwrap();
        let err = registry.build_from(&config, &NestedDict::new()).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(key) if key == "type"));

        let config = NestedDict::from_pairs([("type", 3)]).unwrap();
        let err = registry.build_from(&config, &NestedDict::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }
}
