//! Hierarchical configuration trees addressed by dotted paths.
//!
//! A [`NestedDict`] stores values under paths such as `model.encoder.layers`,
//! creating intermediate levels on write. A [`Variable`] placed at several
//! paths is one shared cell, so updating it through any path is seen through
//! all of them.
//!
//! ```
//! use dragon_config::{BinaryOp, NestedDict, Variable};
//!
//! let width = Variable::new(64);
//! let config = NestedDict::new();
//! config.set("encoder.width", &width)?;
//! config.set("decoder.width", &width)?;
//!
//! if let Some(cell) = config.get("encoder.width")?.as_variable() {
//!     cell.update(BinaryOp::Add, 1)?;
//! }
//! assert_eq!(config.get("decoder.width")?, 65);
//! # Ok::<(), dragon_config::Error>(())
//! ```
//!
//! Trees load from and save to JSON, YAML and TOML, take command-line
//! overrides through [`ArgParser`] and can be layered from several sources
//! with [`ConfigBuilder`].

pub mod cli;
pub mod config;
pub mod dict;
mod error;
pub mod io;
pub mod literal;
pub mod registry;
pub mod value;
pub mod variable;

pub use cli::{merge_parsed_arguments, ArgParser, MissingDefaultConfig};
pub use config::{ConfigBuilder, ConfigSource};
pub use dict::{find_circular_reference, find_placeholders, FlatDict, NestedDict};
pub use error::{Error, ErrorKind, Result};
pub use io::Format;
pub use registry::Registry;
pub use value::{BinaryOp, Kind, List, UnaryOp, Value};
pub use variable::{Variable, VariableBuilder};
