//! Document codecs: format dispatch, reading and rendering.

mod yaml;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::dict::FlatDict;
use crate::error::{Error, Result};
use crate::value::Value;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    /// Maps a file extension (without the dot) to a format.
    pub fn from_extension(extension: &str) -> Result<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            "toml" => Ok(Format::Toml),
            other => Err(Error::FileFormat(other.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
        Self::from_extension(extension)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
        }
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Reads a file, mapping a missing file to [`Error::FileNotFound`].
pub(crate) fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound(path.to_path_buf())
        } else {
            Error::ReadError {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

pub(crate) fn write_file(path: &Path, text: &str) -> Result<()> {
    debug!(path = %path.display(), bytes = text.len(), "saving config file");
    fs::write(path, text).map_err(|source| Error::WriteError {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn load_file(path: &Path) -> Result<FlatDict> {
    let value = Loader::default().load(path)?;
    root_mapping(value)
}

/// Parses text; YAML includes resolve against the working directory.
pub(crate) fn parse_str(text: &str, format: Format) -> Result<FlatDict> {
    let value = Loader::default().parse(text, format, Path::new(""))?;
    root_mapping(value)
}

pub(crate) fn render(dict: &FlatDict, format: Format, indent: usize) -> Result<String> {
    let text = match format {
        Format::Json if indent == 0 => serde_json::to_string(dict)?,
        Format::Json => {
            let pad = " ".repeat(indent);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
            let mut buffer = Vec::new();
            let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
            dict.serialize(&mut serializer)?;
            String::from_utf8(buffer).map_err(|err| Error::InvalidValue(err.to_string()))?
        }
        Format::Yaml => serde_yaml::to_string(dict)?,
        Format::Toml => toml::to_string_pretty(dict)?,
    };
    Ok(text)
}

fn root_mapping(value: Value) -> Result<FlatDict> {
    match value {
        Value::Flat(dict) => Ok(dict),
        Value::Null => Ok(FlatDict::new()),
        other => Err(Error::InvalidValue(format!(
            "document root must be a mapping, found {}",
            other.kind()
        ))),
    }
}

/// Loads documents while tracking the chain of YAML includes.
#[derive(Default)]
pub(crate) struct Loader {
    stack: Vec<PathBuf>,
}

impl Loader {
    pub(crate) fn load(&mut self, path: &Path) -> Result<Value> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.stack.contains(&key) {
            let mut cycle: Vec<String> = self.stack.iter().map(|p| p.display().to_string()).collect();
            cycle.push(key.display().to_string());
            return Err(Error::CircularReference(cycle));
        }
        let format = Format::from_path(path)?;
        let text = read_text(path)?;
        debug!(path = %path.display(), %format, "loading config file");

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.stack.push(key);
        let result = self.parse(&text, format, &base);
        self.stack.pop();
        result
    }

    fn parse(&mut self, text: &str, format: Format, base: &Path) -> Result<Value> {
        match format {
            Format::Json => {
                let document: serde_json::Value = serde_json::from_str(text)?;
                Ok(Value::from(document))
            }
            Format::Toml => {
                let table: toml::Table = toml::from_str(text)?;
                Ok(from_toml(toml::Value::Table(table)))
            }
            Format::Yaml => {
                let document: serde_yaml::Value = serde_yaml::from_str(text)?;
                yaml::convert(document, self, base)
            }
        }
    }
}

fn from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::Str(s),
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::Str(dt.to_string()),
        toml::Value::Array(items) => Value::List(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(table) => Value::Flat(
            table
                .into_iter()
                .map(|(key, value)| (key, from_toml(value)))
                .collect(),
        ),
    }
}
