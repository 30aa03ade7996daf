//! Layered configuration loading.

mod builder;
mod env;
mod file;
mod source;

pub use builder::ConfigBuilder;
pub use env::EnvSource;
pub use file::FileSource;
pub use source::{ArgsSource, ConfigSource, DefaultsSource};
