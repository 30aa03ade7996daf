use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

/// Factory called when a missing key is read.
pub type DefaultFactory = Rc<dyn Fn() -> Value>;

/// Side-channel attributes of a container. They never appear as data.
#[derive(Clone)]
pub(crate) struct Attributes {
    pub(crate) indent: usize,
    pub(crate) separator: String,
    pub(crate) convert_mapping: bool,
    pub(crate) auto_vivify: bool,
    pub(crate) fallback: bool,
    pub(crate) parse_literals: bool,
    pub(crate) frozen: bool,
    pub(crate) default_factory: Option<DefaultFactory>,
    pub(crate) extra: IndexMap<String, Value>,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            indent: 2,
            separator: ".".to_string(),
            convert_mapping: false,
            auto_vivify: true,
            fallback: false,
            parse_literals: false,
            frozen: false,
            default_factory: None,
            extra: IndexMap::new(),
        }
    }
}

impl Attributes {
    /// Attributes handed to empty-like copies and auto-created children.
    pub(crate) fn inherited(&self) -> Self {
        Self {
            frozen: false,
            ..self.clone()
        }
    }
}
