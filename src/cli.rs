//! Command-line overrides derived from the shape of a tree.
//!
//! Every leaf of a bound tree becomes a `--dotted.key` flag. Raw strings are
//! coerced after the leaf they override, then the result is merged over the
//! tree with the command line taking precedence.
//!
//! ```no_run
//! use dragon_config::{ArgParser, NestedDict};
//!
//! let config = NestedDict::from_pairs([("model.layers", 4), ("lr", 1)])?;
//! ArgParser::new().parse_into(&config, std::env::args().skip(1))?;
//! # Ok::<(), dragon_config::Error>(())
//! ```

use clap::{Arg, ArgAction, Command};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::dict::{FlatDict, NestedDict};
use crate::error::{Error, Result};
use crate::literal;
use crate::value::{Kind, Value};

/// What to do when a default config flag was configured but not passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDefaultConfig {
    #[default]
    Raise,
    Warn,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Bool,
    Int,
    Float,
    Str,
    List,
    Untyped,
}

impl Shape {
    fn of(kind: Kind) -> Self {
        match kind {
            Kind::Bool => Shape::Bool,
            Kind::Int => Shape::Int,
            Kind::Float => Shape::Float,
            Kind::Str => Shape::Str,
            Kind::List => Shape::List,
            Kind::Null | Kind::Dict | Kind::Variable => Shape::Untyped,
        }
    }
}

#[derive(Debug, Clone)]
struct ArgSpec {
    shape: Shape,
    help: Option<String>,
}

/// Parses `--dotted.key value` arguments into a [`NestedDict`] of overrides.
#[derive(Debug, Clone)]
pub struct ArgParser {
    name: String,
    strict: bool,
    default_config: Option<(String, MissingDefaultConfig)>,
    specs: IndexMap<String, ArgSpec>,
}

impl Default for ArgParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ArgParser {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            strict: false,
            default_config: None,
            specs: IndexMap::new(),
        }
    }

    /// Program name shown in usage and error messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Rejects flags that were not bound from a tree.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Names a flag whose value is a config file merged under the command
    /// line values. `missing` decides what happens when the flag is absent.
    pub fn with_default_config(mut self, key: impl Into<String>, missing: MissingDefaultConfig) -> Self {
        let key = key.into();
        self.specs.insert(
            key.clone(),
            ArgSpec {
                shape: Shape::Str,
                help: Some("config file merged under the command line".to_string()),
            },
        );
        self.default_config = Some((key, missing));
        self
    }

    /// Declares one flag per leaf of `tree`, typed after the leaf.
    ///
    /// A leaf holding a [`Variable`](crate::Variable) is typed after the
    /// cell's declared kind and contributes its help text.
    pub fn bind(&mut self, tree: &NestedDict) -> &mut Self {
        for (key, value) in tree.all_items() {
            if self.specs.contains_key(&key) {
                continue;
            }
            let spec = match value.as_variable() {
                Some(cell) => ArgSpec {
                    shape: Shape::of(cell.declared_kind().unwrap_or_else(|| cell.dtype())),
                    help: cell.help(),
                },
                None => ArgSpec {
                    shape: Shape::of(value.kind()),
                    help: None,
                },
            };
            self.specs.insert(key, spec);
        }
        self
    }

    /// Parses `args` (without the program name) into a tree of overrides.
    pub fn parse<I, S>(&self, args: I) -> Result<NestedDict>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut specs = self.specs.clone();
        if !self.strict {
            for (key, count) in scan_flags(&args) {
                let shape = match count {
                    0 => Shape::Bool,
                    1 => Shape::Untyped,
                    _ => Shape::List,
                };
                specs.entry(key).or_insert(ArgSpec { shape, help: None });
            }
        }

        let matches = self.command(&specs).try_get_matches_from(&args)?;
        let parsed = NestedDict::new();
        for (key, spec) in &specs {
            let Some(raw) = matches.get_many::<String>(key.as_str()) else {
                continue;
            };
            let raw: Vec<&String> = raw.collect();
            let value = coerce(spec.shape, &raw).map_err(|err| err.context(format!("--{key}")))?;
            parsed.set_with(key, value, Some(true))?;
        }

        match &self.default_config {
            Some((key, missing)) => merge_default_config(parsed, key, *missing),
            None => Ok(parsed),
        }
    }

    /// Binds `tree`, parses `args` and merges the result over `tree`.
    pub fn parse_into<I, S>(&self, tree: &NestedDict, args: I) -> Result<NestedDict>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parser = self.clone();
        parser.bind(tree);
        let overrides = parser.parse(args)?;
        merge_parsed_arguments(tree, &overrides)
    }

    fn command(&self, specs: &IndexMap<String, ArgSpec>) -> Command {
        let mut command = Command::new(self.name.clone())
            .no_binary_name(true)
            .args_override_self(true);
        if specs.contains_key("help") {
            command = command.disable_help_flag(true);
        }
        for (key, spec) in specs {
            let mut arg = Arg::new(key.clone())
                .long(key.clone())
                .value_parser(clap::value_parser!(String))
                .allow_negative_numbers(true)
                .action(ArgAction::Set);
            arg = match spec.shape {
                Shape::List => arg.num_args(1..),
                Shape::Bool => arg.num_args(0..=1).default_missing_value("true"),
                _ => arg.num_args(1),
            };
            if let Some(help) = &spec.help {
                arg = arg.help(help.clone());
            }
            command = command.arg(arg);
        }
        command
    }
}

/// Overlays `overrides` on `tree`; override values win.
///
/// Keys of `overrides` may be dotted. A slot holding a cell receives the new
/// value through the cell, so its checks apply.
pub fn merge_parsed_arguments(tree: &NestedDict, overrides: &impl AsRef<FlatDict>) -> Result<NestedDict> {
    tree.merge(overrides)?;
    Ok(tree.clone())
}

fn merge_default_config(parsed: NestedDict, key: &str, missing: MissingDefaultConfig) -> Result<NestedDict> {
    match parsed.get_opt(key) {
        Some(Value::Str(path)) => {
            info!(flag = key, path = %path, "merging default config file under command line values");
            let base = NestedDict::load(&path)?;
            base.merge(&parsed)?;
            Ok(base)
        }
        _ => {
            match missing {
                MissingDefaultConfig::Raise => return Err(Error::MissingArgument(format!("--{key}"))),
                MissingDefaultConfig::Warn => {
                    warn!(flag = key, "default config flag was not given on the command line")
                }
                MissingDefaultConfig::Ignore => {}
            }
            Ok(parsed)
        }
    }
}

/// Counts the values following each `--flag` up to the next flag.
fn scan_flags(args: &[String]) -> Vec<(String, usize)> {
    let mut flags: Vec<(String, usize)> = Vec::new();
    for arg in args {
        if arg == "--" {
            break;
        }
        if let Some(flag) = arg.strip_prefix("--") {
            match flag.split_once('=') {
                Some((key, _)) => flags.push((key.to_string(), 1)),
                None => flags.push((flag.to_string(), 0)),
            }
        } else if let Some((_, count)) = flags.last_mut() {
            *count += 1;
        }
    }
    flags
}

fn coerce(shape: Shape, raw: &[&String]) -> Result<Value> {
    if shape == Shape::List {
        return Ok(Value::List(raw.iter().map(|item| literal::coerce(item)).collect()));
    }
    let Some(text) = raw.last() else {
        return Ok(Value::Null);
    };
    let value = match shape {
        Shape::Bool => Value::Bool(literal::parse_bool(text)?),
        Shape::Int => Value::Int(text.trim().parse().map_err(|_| Error::TypeMismatch {
            expected: Kind::Int,
            value: text.to_string(),
        })?),
        Shape::Float => Value::Float(text.trim().parse().map_err(|_| Error::TypeMismatch {
            expected: Kind::Float,
            value: text.to_string(),
        })?),
        Shape::Str => Value::Str(text.to_string()),
        Shape::List | Shape::Untyped => literal::coerce(text),
    };
    Ok(value)
}
