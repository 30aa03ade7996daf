use std::fmt::Debug;

use crate::cli::ArgParser;
use crate::dict::{FlatDict, NestedDict};
use crate::error::Result;
use crate::value::Value;

/// One layer of the loading pipeline.
///
/// `current` is the tree merged from every earlier layer. A source returns
/// the tree to overlay on it, or `None` when it has nothing to contribute.
pub trait ConfigSource: Debug {
    fn overlay(&self, current: &NestedDict) -> Result<Option<NestedDict>>;

    /// Short label used in log records.
    fn label(&self) -> &'static str;
}

/// An in-memory tree, usually the program defaults.
///
/// Cells held by the tree are shared with the built configuration. Its
/// containers are copied, so later layers never write into the tree itself.
#[derive(Debug, Clone)]
pub struct DefaultsSource {
    tree: NestedDict,
}

impl DefaultsSource {
    pub fn new(tree: NestedDict) -> Self {
        Self { tree }
    }
}

impl ConfigSource for DefaultsSource {
    fn overlay(&self, _current: &NestedDict) -> Result<Option<NestedDict>> {
        Ok(Some(NestedDict::wrap(detach(self.tree.as_flat()))))
    }

    fn label(&self) -> &'static str {
        "defaults"
    }
}

/// Copies every container below `storage`, keeping cells and scalars as they are.
fn detach(storage: &FlatDict) -> FlatDict {
    let copy = storage.empty_like();
    for (key, value) in storage.items() {
        copy.store(key, detach_value(value));
    }
    copy
}

fn detach_value(value: Value) -> Value {
    match value {
        Value::Nested(child) => Value::Nested(NestedDict::wrap(detach(child.as_flat()))),
        Value::Flat(child) => Value::Flat(detach(&child)),
        Value::List(list) => Value::List(list.iter().map(detach_value).collect::<Vec<_>>().into()),
        other => other,
    }
}

/// Command-line arguments, typed after the layers merged before them.
#[derive(Debug, Clone)]
pub struct ArgsSource {
    args: Vec<String>,
    parser: ArgParser,
}

impl ArgsSource {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_parser(args, ArgParser::new())
    }

    pub fn with_parser<I, S>(args: I, parser: ArgParser) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            parser,
        }
    }
}

impl ConfigSource for ArgsSource {
    fn overlay(&self, current: &NestedDict) -> Result<Option<NestedDict>> {
        let mut parser = self.parser.clone();
        parser.bind(current);
        parser.parse(self.args.iter().cloned()).map(Some)
    }

    fn label(&self) -> &'static str {
        "args"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Variable;

    #[test]
    fn test_args_source_typed_after_current_tree() {
        let current = NestedDict::from_pairs([("port", 80)]).unwrap();
        let source = ArgsSource::new(["--port", "8080", "--host", "example.org"]);
        let layer = source.overlay(&current).unwrap().unwrap();

        assert_eq!(layer.get("port").unwrap(), 8080);
        assert_eq!(layer.get("host").unwrap(), "example.org");
    }

    #[test]
    fn test_defaults_source_copies_containers_but_shares_cells() {
        let cell = Variable::new(1);
        let defaults = NestedDict::from_pairs([("server.host", "localhost")]).unwrap();
        defaults.set("server.workers", &cell).unwrap();
        defaults.set("ports", vec![80]).unwrap();

        let layer = DefaultsSource::new(defaults.clone()).overlay(&NestedDict::new()).unwrap().unwrap();
        layer.set("server.host", "prod").unwrap();
        layer.set("server.port", 9000).unwrap();
        layer.get("ports").unwrap().as_list().unwrap().push(443);
        layer.set("server.workers", 4).unwrap();

        assert_eq!(defaults.get("server.host").unwrap(), "localhost");
        assert!(!defaults.contains("server.port"));
        assert_eq!(defaults.get("ports").unwrap().as_list().unwrap().len(), 1);
        assert_eq!(cell.get(), 4);
    }

    #[test]
    fn test_args_source_rejects_mistyped_value() {
        let current = NestedDict::from_pairs([("port", 80)]).unwrap();
        let source = ArgsSource::new(["--port", "http"]);
        assert!(source.overlay(&current).is_err());
    }
}
