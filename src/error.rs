use std::path::PathBuf;

use thiserror::Error;

use crate::value::Kind;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type for the dragon-config library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("referenced path not found: {0}")]
    ReferenceNotFound(String),

    #[error("cannot traverse '{path}': '{parent}' holds a {found} value, not a mapping")]
    NotAMapping {
        path: String,
        parent: String,
        found: Kind,
    },

    #[error("value {value} is not of type {expected}")]
    TypeMismatch { expected: Kind, value: String },

    #[error("unsupported operand kinds for {op}: {left} and {right}")]
    UnsupportedOperands {
        op: &'static str,
        left: Kind,
        right: Kind,
    },

    #[error("unsupported operand kind for {op}: {kind}")]
    UnsupportedOperand { op: &'static str, kind: Kind },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("value {value} is not in choices [{choices}]")]
    NotInChoices { value: String, choices: String },

    #[error("value is required but was never set")]
    Required,

    #[error("cannot interpolate non-scalar value: {0}")]
    NonScalarReference(String),

    #[error("unclosed reference (missing '}}') in {0:?}")]
    UnclosedReference(String),

    #[error("circular reference detected: {}", .0.join("->"))]
    CircularReference(Vec<String>),

    #[error("component with name '{0}' is already registered")]
    DuplicateName(String),

    #[error("attempting to alter a frozen container at '{0}'")]
    Frozen(String),

    #[error("unsupported file format '{0}', expected one of json, yaml, yml, toml")]
    FileFormat(String),

    #[error("required config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("cannot encode as TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("environment variable '{0}' is not set")]
    EnvNotSet(String),

    #[error("{0} is expected on the command line but was not given")]
    MissingArgument(String),

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("'{key}': {source}")]
    Context {
        key: String,
        #[source]
        source: Box<Error>,
    },
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    KeyNotFound,
    Type,
    Value,
    Required,
    FileFormat,
    CircularReference,
    DuplicateName,
    Frozen,
    Io,
    Cli,
}

impl Error {
    /// Returns the taxonomy bucket this error belongs to.
    ///
    /// Errors wrapped in [`Error::Context`] report the kind of their source.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyNotFound(_) | Error::ReferenceNotFound(_) | Error::MissingArgument(_) => {
                ErrorKind::KeyNotFound
            }
            Error::TypeMismatch { .. }
            | Error::UnsupportedOperands { .. }
            | Error::UnsupportedOperand { .. } => ErrorKind::Type,
            Error::NotAMapping { .. }
            | Error::InvalidValue(_)
            | Error::NotInChoices { .. }
            | Error::NonScalarReference(_)
            | Error::UnclosedReference(_)
            | Error::EnvNotSet(_)
            | Error::Yaml(_)
            | Error::Json(_)
            | Error::TomlDe(_)
            | Error::TomlSer(_) => ErrorKind::Value,
            Error::Required => ErrorKind::Required,
            Error::CircularReference(_) => ErrorKind::CircularReference,
            Error::DuplicateName(_) => ErrorKind::DuplicateName,
            Error::Frozen(_) => ErrorKind::Frozen,
            Error::FileFormat(_) => ErrorKind::FileFormat,
            Error::FileNotFound(_)
            | Error::ReadError { .. }
            | Error::WriteError { .. }
            | Error::Io(_) => ErrorKind::Io,
            Error::Cli(_) => ErrorKind::Cli,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Wraps the error with the key or path it occurred at.
    pub(crate) fn context(self, key: impl Into<String>) -> Self {
        Error::Context {
            key: key.into(),
            source: Box::new(self),
        }
    }

    /// Strips any [`Error::Context`] layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_reports_source_kind() {
        let err = Error::Required.context("model.name");
        assert_eq!(err.kind(), ErrorKind::Required);
        assert!(matches!(err.root(), Error::Required));
        assert_eq!(
            err.to_string(),
            "'model.name': value is required but was never set"
        );
    }

    #[test]
    fn test_circular_reference_message() {
        let err = Error::CircularReference(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "circular reference detected: a->b->a");
        assert_eq!(err.kind(), ErrorKind::CircularReference);
    }
}
