use std::fmt;
use std::io::Read;
use std::ops::Deref;
use std::path::Path;

use serde::ser::{Serialize, Serializer};
use tracing::debug;

use super::flat::annotate;
use super::iter::AllItems;
use super::FlatDict;
use crate::cli::ArgParser;
use crate::error::{Error, Result};
use crate::io::Format;
use crate::value::{Kind, Memo, Value};

/// A tree of containers addressed by delimited paths.
///
/// ```
/// use dragon_config::NestedDict;
///
/// let config = NestedDict::from_pairs([("i.d", 1013), ("f.n", 7)])?;
/// assert_eq!(config.get("i.d")?, 1013);
/// assert_eq!(config.child("f")?.get("n")?, 7);
/// # Ok::<(), dragon_config::Error>(())
/// ```
#[derive(Clone, Default)]
pub struct NestedDict {
    base: FlatDict,
}

impl NestedDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn wrap(base: FlatDict) -> Self {
        Self { base }
    }

    /// Builds a tree from a flat mapping, expanding dotted keys and
    /// converting inner mappings.
    pub fn from_flat(flat: &FlatDict) -> Result<Self> {
        let dict = Self::wrap(flat.empty_like());
        for (key, value) in flat.items() {
            dict.set_with(&key, value, Some(true))?;
        }
        Ok(dict)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let dict = Self::new();
        for (key, value) in pairs {
            dict.set_with(key.as_ref(), value, Some(true))?;
        }
        Ok(dict)
    }

    pub fn with_indent(self, indent: usize) -> Self {
        Self::wrap(self.base.with_indent(indent))
    }

    pub fn with_separator(self, separator: impl Into<String>) -> Self {
        Self::wrap(self.base.with_separator(separator))
    }

    pub fn with_convert_mapping(self, convert: bool) -> Self {
        Self::wrap(self.base.with_convert_mapping(convert))
    }

    pub fn with_auto_vivify(self, auto_vivify: bool) -> Self {
        Self::wrap(self.base.with_auto_vivify(auto_vivify))
    }

    pub fn with_fallback(self, fallback: bool) -> Self {
        Self::wrap(self.base.with_fallback(fallback))
    }

    pub fn with_literal_parsing(self, enabled: bool) -> Self {
        Self::wrap(self.base.with_literal_parsing(enabled))
    }

    pub fn with_default_factory(self, factory: impl Fn() -> Value + 'static) -> Self {
        Self::wrap(self.base.with_default_factory(factory))
    }

    /// The top-level storage of the tree.
    pub fn as_flat(&self) -> &FlatDict {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.base.keys()
    }

    pub fn values(&self) -> Vec<Value> {
        self.base.values()
    }

    pub fn items(&self) -> Vec<(String, Value)> {
        self.base.items()
    }

    pub fn indent(&self) -> usize {
        self.base.indent()
    }

    pub fn separator(&self) -> String {
        self.base.separator()
    }

    pub fn setattr(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.base.setattr(name, value);
    }

    pub fn getattr(&self, name: &str) -> Option<Value> {
        self.base.getattr(name)
    }

    pub fn delattr(&self, name: &str) -> Option<Value> {
        self.base.delattr(name)
    }

    pub fn hasattr(&self, name: &str) -> bool {
        self.base.hasattr(name)
    }

    pub fn ptr_eq(&self, other: &NestedDict) -> bool {
        self.base.ptr_eq(&other.base)
    }

    /// Reads `path`, running miss handlers along the way.
    ///
    /// With the `fallback` policy on, a missing leaf resolves to the same
    /// leaf name at the nearest ancestor level.
    pub fn get(&self, path: &str) -> Result<Value> {
        let fallback = self.base.read_attrs(|attrs| attrs.fallback);
        self.lookup(path, fallback)
    }

    pub fn get_fallback(&self, path: &str) -> Result<Value> {
        self.lookup(path, true)
    }

    fn lookup(&self, path: &str, fallback: bool) -> Result<Value> {
        let separator = self.separator();
        let leaf = path.rsplit(separator.as_str()).next().unwrap_or(path);
        let mut current = self.base.clone();
        let mut rest = path;
        let mut candidate = None;

        while let Some((head, tail)) = rest.split_once(separator.as_str()) {
            if fallback {
                if let Some(value) = current.get_opt(leaf) {
                    candidate = Some(value);
                }
            }
            let next = match current.get_opt(head) {
                Some(value) => value,
                None => match candidate.take() {
                    Some(value) => return Ok(value),
                    None => current
                        .missing_if(head, Value::is_mapping)
                        .map_err(|err| relabel(err, path))?,
                },
            };
            current = next
                .as_storage()
                .ok_or_else(|| Error::KeyNotFound(path.to_string()))?;
            rest = tail;
        }

        if let Some(value) = current.get_opt(rest) {
            return Ok(value);
        }
        if let Some(value) = candidate {
            return Ok(value);
        }
        current.missing(rest).map_err(|err| relabel(err, path))
    }

    /// Reads `path` without running miss handlers.
    pub fn get_opt(&self, path: &str) -> Option<Value> {
        let separator = self.separator();
        let mut current = self.base.clone();
        let mut rest = path;
        while let Some((head, tail)) = rest.split_once(separator.as_str()) {
            current = current.get_opt(head)?.as_storage()?;
            rest = tail;
        }
        current.get_opt(rest)
    }

    pub fn get_or(&self, path: &str, default: impl Into<Value>) -> Value {
        self.get_opt(path).unwrap_or_else(|| default.into())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get_opt(path).is_some()
    }

    /// Returns the container stored at `path`.
    pub fn child(&self, path: &str) -> Result<NestedDict> {
        let value = self.get(path)?;
        if let Some(nested) = value.as_nested() {
            return Ok(nested);
        }
        match value.as_storage() {
            Some(flat) => Ok(Self::wrap(flat)),
            None => Err(Error::TypeMismatch {
                expected: Kind::Dict,
                value: value.to_string(),
            }
            .context(path)),
        }
    }

    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.set_with(path, value, None)
    }

    /// Writes `value` at `path`, creating missing intermediates.
    ///
    /// `convert_mapping` overrides the container policy for this write.
    pub fn set_with(
        &self,
        path: &str,
        value: impl Into<Value>,
        convert_mapping: Option<bool>,
    ) -> Result<()> {
        let convert = convert_mapping.unwrap_or_else(|| self.base.read_attrs(|attrs| attrs.convert_mapping));
        let mut value = value.into();
        if convert {
            value = self.convert(value)?;
        }
        let (parent, leaf) = self.parent_for_write(path)?;
        parent.assign(leaf, value).map_err(|err| match err {
            Error::Frozen(_) => Error::Frozen(path.to_string()),
            err => annotate(err, path),
        })
    }

    fn parent_for_write(&self, path: &str) -> Result<(FlatDict, String)> {
        let separator = self.separator();
        if path.split(separator.as_str()).any(str::is_empty) {
            return Err(Error::InvalidValue(format!("empty segment in path {path:?}")));
        }
        let mut current = self.base.clone();
        let mut rest = path;
        while let Some((head, tail)) = rest.split_once(separator.as_str()) {
            let prefix = &path[..path.len() - rest.len() + head.len()];
            let next = match current.get_opt(head) {
                Some(value) => value,
                None => self.vivify(&current, head, prefix)?,
            };
            current = match next.as_storage() {
                Some(storage) => storage,
                None => {
                    return Err(Error::NotAMapping {
                        path: path.to_string(),
                        parent: prefix.to_string(),
                        found: next.kind(),
                    })
                }
            };
            rest = tail;
        }
        Ok((current, rest.to_string()))
    }

    fn vivify(&self, parent: &FlatDict, key: &str, prefix: &str) -> Result<Value> {
        let (auto_vivify, has_factory) =
            parent.read_attrs(|attrs| (attrs.auto_vivify, attrs.default_factory.is_some()));
        if !auto_vivify {
            return Err(Error::KeyNotFound(prefix.to_string()));
        }
        if has_factory {
            return parent.missing_if(key, Value::is_mapping);
        }
        let child = Value::Nested(Self::wrap(parent.empty_like()));
        parent.assign(key.to_string(), child.clone())?;
        Ok(child)
    }

    /// Turns plain mappings into child trees inheriting this tree's attributes.
    fn convert(&self, value: Value) -> Result<Value> {
        match value {
            Value::Flat(map) => {
                let child = self.empty_like();
                for (key, item) in map.items() {
                    child.set_with(&key, item, Some(true))?;
                }
                Ok(Value::Nested(child))
            }
            Value::List(list) => {
                for (index, item) in list.to_vec().into_iter().enumerate() {
                    if matches!(item, Value::Flat(_) | Value::List(_)) {
                        list.set(index, self.convert(item)?)?;
                    }
                }
                Ok(Value::List(list))
            }
            other => Ok(other),
        }
    }

    /// Returns the value at `path`, storing `value` there first if absent.
    #[doc(alias = "setdefault")]
    pub fn get_or_insert(&self, path: &str, value: impl Into<Value>) -> Result<Value> {
        if let Some(existing) = self.get_opt(path) {
            return Ok(existing);
        }
        self.set(path, value)?;
        self.get(path)
    }

    fn parent_of(&self, path: &str) -> Result<(FlatDict, String)> {
        let separator = self.separator();
        let mut current = self.base.clone();
        let mut rest = path;
        while let Some((head, tail)) = rest.split_once(separator.as_str()) {
            current = current
                .get_opt(head)
                .and_then(|value| value.as_storage())
                .ok_or_else(|| Error::KeyNotFound(path.to_string()))?;
            rest = tail;
        }
        Ok((current, rest.to_string()))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.pop(path).map(|_| ())
    }

    pub fn pop(&self, path: &str) -> Result<Value> {
        let (parent, leaf) = self.parent_of(path)?;
        parent.pop(&leaf).map_err(|err| relabel(err, path))
    }

    /// Like [`NestedDict::pop`], but a missing leaf yields `default`.
    /// A missing intermediate is still an error.
    pub fn pop_or(&self, path: &str, default: impl Into<Value>) -> Result<Value> {
        let (parent, leaf) = self.parent_of(path)?;
        parent.pop_or(&leaf, default)
    }

    pub fn all_items(&self) -> AllItems {
        AllItems::new(self)
    }

    pub fn all_keys(&self) -> impl Iterator<Item = String> {
        self.all_items().map(|(key, _)| key)
    }

    pub fn all_values(&self) -> impl Iterator<Item = Value> {
        self.all_items().map(|(_, value)| value)
    }

    /// Calls `f` on every descendant tree, children before parents, then on
    /// this tree.
    pub fn apply<F: FnMut(&NestedDict)>(&self, mut f: F) -> &Self {
        let mut visit = |dict: &NestedDict| -> Result<()> {
            f(dict);
            Ok(())
        };
        // infallible
        let _ = self.visit(&mut visit);
        self
    }

    pub fn try_apply<F>(&self, mut f: F) -> Result<&Self>
    where
        F: FnMut(&NestedDict) -> Result<()>,
    {
        self.visit(&mut f)?;
        Ok(self)
    }

    fn visit(&self, f: &mut dyn FnMut(&NestedDict) -> Result<()>) -> Result<()> {
        for value in self.values() {
            visit_value(&value, f)?;
        }
        f(self)
    }

    pub fn merge(&self, other: &impl AsRef<FlatDict>) -> Result<&Self> {
        self.merge_with(other, true)
    }

    /// Merges `other` into this tree.
    ///
    /// Keys of `other` may be dotted. Where both sides hold a mapping the
    /// merge recurses; otherwise the incoming value is written (converted)
    /// unless `overwrite` is false and the path already exists.
    #[doc(alias = "union")]
    pub fn merge_with(&self, other: &impl AsRef<FlatDict>, overwrite: bool) -> Result<&Self> {
        let other = other.as_ref();
        if self.base.ptr_eq(other) {
            return Ok(self);
        }
        for (key, value) in other.items() {
            match self.get_opt(&key) {
                Some(current) if current.is_mapping() && value.is_mapping() => {
                    super::merge_value(&current, &value, overwrite).map_err(|err| annotate(err, &key))?;
                }
                Some(_) if !overwrite => {}
                _ => self.set_with(&key, value, Some(true))?,
            }
        }
        Ok(self)
    }

    /// Loads a document and merges it over this tree.
    pub fn merge_file(&self, path: impl AsRef<Path>) -> Result<&Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "merging config file");
        let other = Self::load(path)?;
        self.merge(&other)
    }

    pub fn difference(&self, other: &impl AsRef<FlatDict>) -> Result<NestedDict> {
        self.difference_with(other, true)
    }

    /// Pairs of `other` that are absent here or hold a different value.
    ///
    /// With `recursive`, child trees are compared level by level and only
    /// the differing leaves are kept.
    pub fn difference_with(&self, other: &impl AsRef<FlatDict>, recursive: bool) -> Result<NestedDict> {
        let other = self.normalize(other.as_ref())?;
        let result = self.empty_like();
        for (key, value) in other.items() {
            let mine = self.base.get_opt(&key);
            if recursive {
                if let (Some(Value::Nested(child)), Some(theirs)) = (&mine, value.as_storage()) {
                    let diff = child.difference_with(&theirs, true)?;
                    if !diff.is_empty() {
                        result.base.store(key, Value::Nested(diff));
                    }
                    continue;
                }
            }
            if mine.as_ref() != Some(&value) {
                result.base.store(key, value);
            }
        }
        Ok(result)
    }

    pub fn intersection(&self, other: &impl AsRef<FlatDict>) -> Result<NestedDict> {
        self.intersection_with(other, true)
    }

    /// Pairs of `other` that are present here with an equal value.
    pub fn intersection_with(&self, other: &impl AsRef<FlatDict>, recursive: bool) -> Result<NestedDict> {
        let other = self.normalize(other.as_ref())?;
        let result = self.empty_like();
        for (key, value) in other.items() {
            let mine = self.base.get_opt(&key);
            if recursive {
                if let (Some(Value::Nested(child)), Some(theirs)) = (&mine, value.as_storage()) {
                    let common = child.intersection_with(&theirs, true)?;
                    if !common.is_empty() {
                        result.base.store(key, Value::Nested(common));
                    }
                    continue;
                }
            }
            if mine.as_ref() == Some(&value) {
                result.base.store(key, value);
            }
        }
        Ok(result)
    }

    fn normalize(&self, other: &FlatDict) -> Result<NestedDict> {
        let dict = self.empty_like();
        for (key, value) in other.items() {
            dict.set_with(&key, value, Some(true))?;
        }
        Ok(dict)
    }

    /// New top-level storage sharing every child handle.
    pub fn copy(&self) -> NestedDict {
        Self::wrap(self.base.copy())
    }

    pub fn deep_copy(&self) -> NestedDict {
        self.deep_copy_in(&mut Memo::default())
    }

    pub(crate) fn deep_copy_in(&self, memo: &mut Memo) -> NestedDict {
        Self::wrap(self.base.deep_copy_in(memo))
    }

    pub fn empty_like(&self) -> NestedDict {
        Self::wrap(self.base.empty_like())
    }

    /// Validates every cell in the tree, annotating failures with their path.
    pub fn validate(&self) -> Result<()> {
        for (path, value) in self.all_items() {
            let result = match &value {
                Value::Var(cell) => cell.validate(),
                Value::Flat(flat) => flat.validate(),
                _ => Ok(()),
            };
            result.map_err(|err| err.context(path.as_str()))?;
        }
        Ok(())
    }

    /// Rejects writes at every level until [`NestedDict::defrost`].
    pub fn freeze(&self) -> &Self {
        set_frozen(&self.base, true);
        self
    }

    pub fn defrost(&self) -> &Self {
        set_frozen(&self.base, false);
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.base.is_frozen()
    }

    /// Temporarily defrosts a frozen tree; it is refrozen when the guard drops.
    pub fn unlocked(&self) -> Unlocked<'_> {
        let was_frozen = self.is_frozen();
        if was_frozen {
            self.defrost();
        }
        Unlocked {
            dict: self,
            was_frozen,
        }
    }

    pub fn sort_keys(&self, recursive: bool) -> &Self {
        if recursive {
            self.apply(|dict| {
                dict.base.sort_keys();
            })
        } else {
            self.base.sort_keys();
            self
        }
    }

    /// Removes null leaves at every level.
    pub fn drop_null(&self) -> &Self {
        self.apply(|dict| {
            dict.base.drop_null();
        })
    }

    /// Flattened view keyed by dotted paths.
    pub fn to_flat(&self) -> FlatDict {
        let flat = self.base.empty_like();
        for (path, value) in self.all_items() {
            flat.store(path, value);
        }
        flat
    }

    pub fn to_plain<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        self.base.to_plain()
    }

    pub fn to_text(&self, format: Format) -> Result<String> {
        self.base.to_text(format)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.base.save(path)
    }

    pub fn write_to<W: std::io::Write>(&self, writer: W, format: Format) -> Result<()> {
        self.base.write_to(writer, format)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<NestedDict> {
        Self::from_flat(&FlatDict::load(path)?)
    }

    pub fn parse(text: &str, format: Format) -> Result<NestedDict> {
        Self::from_flat(&FlatDict::parse(text, format)?)
    }

    pub fn read_from<R: Read>(reader: R, format: Format) -> Result<NestedDict> {
        Self::from_flat(&FlatDict::read_from(reader, format)?)
    }

    /// Overlays command-line arguments shaped after this tree.
    pub fn parse_args<I, S>(&self, args: I) -> Result<&Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ArgParser::new().parse_into(self, args)?;
        Ok(self)
    }
}

fn visit_value(value: &Value, f: &mut dyn FnMut(&NestedDict) -> Result<()>) -> Result<()> {
    match value {
        Value::Nested(dict) => dict.visit(f),
        Value::Var(cell) if cell.wraps_type() => visit_value(&cell.get(), f),
        Value::List(list) => {
            for item in list.iter() {
                visit_value(&item, f)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Sets the frozen flag on `storage` and every container a path write can reach from it.
fn set_frozen(storage: &FlatDict, frozen: bool) {
    if frozen {
        storage.freeze();
    } else {
        storage.defrost();
    }
    for value in storage.values() {
        match value.resolved() {
            Value::List(list) => {
                for item in list.iter() {
                    if let Some(child) = item.as_storage() {
                        set_frozen(&child, frozen);
                    }
                }
            }
            other => {
                if let Some(child) = other.as_storage() {
                    set_frozen(&child, frozen);
                }
            }
        }
    }
}

fn relabel(err: Error, path: &str) -> Error {
    match err {
        Error::KeyNotFound(_) => Error::KeyNotFound(path.to_string()),
        other => other,
    }
}

/// Guard returned by [`NestedDict::unlocked`].
pub struct Unlocked<'a> {
    dict: &'a NestedDict,
    was_frozen: bool,
}

impl Deref for Unlocked<'_> {
    type Target = NestedDict;

    fn deref(&self) -> &NestedDict {
        self.dict
    }
}

impl Drop for Unlocked<'_> {
    fn drop(&mut self) {
        if self.was_frozen {
            self.dict.freeze();
        }
    }
}

impl fmt::Debug for NestedDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.items()).finish()
    }
}

impl PartialEq for NestedDict {
    fn eq(&self, other: &Self) -> bool {
        self.base.content_eq(&other.base)
    }
}

impl PartialEq<FlatDict> for NestedDict {
    fn eq(&self, other: &FlatDict) -> bool {
        self.base.content_eq(other)
    }
}

impl AsRef<FlatDict> for NestedDict {
    fn as_ref(&self) -> &FlatDict {
        &self.base
    }
}

impl Serialize for NestedDict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.base.serialize(serializer)
    }
}

impl TryFrom<serde_json::Value> for NestedDict {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match Value::from(value) {
            Value::Flat(flat) => Self::from_flat(&flat),
            other => Err(Error::TypeMismatch {
                expected: Kind::Dict,
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::value::BinaryOp;
    use crate::Variable;
    use serde_json::json;

    #[test]
    fn test_dotted_construction() {
        let dict = NestedDict::from_pairs([("i.d", Value::Int(1013)), ("f.n", Value::from("chang"))]).unwrap();
        assert_eq!(dict.get("i.d").unwrap(), 1013);
        let f = dict.child("f").unwrap();
        assert_eq!(f.get("n").unwrap(), "chang");
        assert!(matches!(dict.get_opt("f"), Some(Value::Nested(_))));
    }

    #[test]
    fn test_set_then_get() {
        let dict = NestedDict::new();
        dict.set("a.b.c", 5).unwrap();
        assert_eq!(dict.get("a.b.c").unwrap(), 5);
        assert!(dict.contains("a.b"));
        assert!(!dict.contains("a.x.c"));
        assert!(!dict.contains("a.b.c.d"));
    }

    #[test]
    fn test_missing_path_reports_full_path() {
        let dict = NestedDict::new();
        dict.set("a.b", 1).unwrap();
        assert!(matches!(dict.get("a.x.y"), Err(Error::KeyNotFound(p)) if p == "a.x.y"));
        assert!(matches!(dict.get("a.b.c"), Err(Error::KeyNotFound(p)) if p == "a.b.c"));
    }

    #[test]
    fn test_write_through_scalar_fails() {
        let dict = NestedDict::new();
        dict.set("a", 1).unwrap();
        let err = dict.set("a.b", 2).unwrap_err();
        assert!(matches!(err, Error::NotAMapping { ref parent, found: Kind::Int, .. } if parent == "a"));
    }

    #[test]
    fn test_auto_vivify_off() {
        let dict = NestedDict::new().with_auto_vivify(false);
        assert!(matches!(dict.set("a.b", 1), Err(Error::KeyNotFound(p)) if p == "a"));
        dict.set("a", NestedDict::new()).unwrap();
        dict.set("a.b", 1).unwrap();
        assert_eq!(dict.get("a.b").unwrap(), 1);
    }

    #[test]
    fn test_vivified_children_inherit_attributes() {
        let dict = NestedDict::new().with_indent(8).with_separator("/");
        dict.set("a/b", 1).unwrap();
        let child = dict.child("a").unwrap();
        assert_eq!(child.indent(), 8);
        assert_eq!(child.separator(), "/");
    }

    #[test]
    fn test_default_factory_on_read() {
        let dict = NestedDict::new().with_default_factory(|| Value::Int(0));
        assert_eq!(dict.get("hits").unwrap(), 0);
        assert!(dict.contains("hits"));
        assert_eq!(dict.get_or("other", 5), 5);
        assert!(!dict.contains("other"));
    }

    #[test]
    fn test_scalar_from_factory_is_not_stored_as_intermediate() {
        let dict = NestedDict::new().with_default_factory(|| Value::Int(0));
        assert_eq!(dict.get("a.b").unwrap_err().kind(), ErrorKind::KeyNotFound);
        assert!(dict.is_empty());
        assert!(matches!(dict.set("a.b", 1), Err(Error::NotAMapping { .. })));
        assert!(dict.is_empty());

        let dict = NestedDict::new().with_default_factory(|| Value::Nested(NestedDict::new()));
        dict.set("a.b", 1).unwrap();
        assert_eq!(dict.get("a.b").unwrap(), 1);
    }

    #[test]
    fn test_empty_path_segments_rejected() {
        let dict = NestedDict::new();
        assert_eq!(dict.set("a..b", 1).unwrap_err().kind(), ErrorKind::Value);
        assert_eq!(dict.set("", 2).unwrap_err().kind(), ErrorKind::Value);
        assert_eq!(dict.set("a.", 3).unwrap_err().kind(), ErrorKind::Value);
        assert!(dict.is_empty());
    }

    #[test]
    fn test_convert_mapping_policy() {
        let plain = NestedDict::new();
        plain.set("a", Value::from(json!({"b": 1}))).unwrap();
        assert!(matches!(plain.get_opt("a"), Some(Value::Flat(_))));
        assert_eq!(plain.get("a.b").unwrap(), 1);

        let converting = NestedDict::new().with_convert_mapping(true).with_indent(3);
        converting.set("a", Value::from(json!({"b.c": 1}))).unwrap();
        assert_eq!(converting.get("a.b.c").unwrap(), 1);
        assert_eq!(converting.child("a").unwrap().indent(), 3);
    }

    #[test]
    fn test_merge_nested_and_dotted() {
        let dict = NestedDict::new();
        dict.set("a.b.c", Value::from(json!({"d": 3, "e": {"f": 4}}))).unwrap();
        let other = NestedDict::from_pairs([("a.b.c.d", 3), ("a.b.c.e.f", 4)]).unwrap();
        dict.merge(&other).unwrap();
        let plain: serde_json::Value = dict.to_plain().unwrap();
        assert_eq!(plain, json!({"a": {"b": {"c": {"d": 3, "e": {"f": 4}}}}}));
    }

    #[test]
    fn test_merge_without_overwrite() {
        let dict = NestedDict::from_pairs([("a.b", 1)]).unwrap();
        let other = NestedDict::from_pairs([("a.b", 2), ("a.c", 3)]).unwrap();
        dict.merge_with(&other, false).unwrap();
        assert_eq!(dict.get("a.b").unwrap(), 1);
        assert_eq!(dict.get("a.c").unwrap(), 3);
    }

    #[test]
    fn test_difference_and_intersection() {
        let dict = NestedDict::from_pairs([("a", 1), ("b", 2), ("c", 3)]).unwrap();
        let other = NestedDict::from_pairs([("b", "b"), ("c", "c"), ("d", "d")]).unwrap();
        assert!(dict.intersection(&other).unwrap().is_empty());
        assert_eq!(dict.difference(&other).unwrap(), other);
    }

    #[test]
    fn test_recursive_difference_keeps_changed_leaves() {
        let dict = NestedDict::from_pairs([("m.x", 1), ("m.y", 2)]).unwrap();
        let other: FlatDict = [("m.x", 1), ("m.y", 5)].into_iter().collect();

        let diff = dict.difference(&other).unwrap();
        assert_eq!(diff.all_keys().collect::<Vec<_>>(), vec!["m.y"]);
        let shallow = dict.difference_with(&other, false).unwrap();
        assert_eq!(shallow.get("m.x").unwrap(), 1);

        let common = dict.intersection(&other).unwrap();
        assert_eq!(common.all_keys().collect::<Vec<_>>(), vec!["m.x"]);
    }

    #[test]
    fn test_copy_shares_children_deep_copy_does_not() {
        let dict = NestedDict::from_pairs([("top", Value::Int(1)), ("a.b", Value::Int(1))]).unwrap();
        dict.set("list", vec![1, 2]).unwrap();

        let shallow = dict.copy();
        assert_eq!(shallow, dict);
        shallow.set("top", 2).unwrap();
        shallow.set("a.b", 2).unwrap();
        assert_eq!(dict.get("top").unwrap(), 1);
        assert_eq!(dict.get("a.b").unwrap(), 2);
        shallow.get("list").unwrap().as_list().unwrap().push(3);
        assert_eq!(dict.get("list").unwrap().as_list().unwrap().len(), 3);

        let deep = dict.deep_copy();
        assert_eq!(deep, dict);
        deep.set("a.b", 3).unwrap();
        deep.get("list").unwrap().as_list().unwrap().push(4);
        assert_eq!(dict.get("a.b").unwrap(), 2);
        assert_eq!(dict.get("list").unwrap().as_list().unwrap().len(), 3);
    }

    #[test]
    fn test_shared_variable_across_trees() {
        let cell = Variable::new(1);
        let first = NestedDict::new();
        let second = NestedDict::new();
        first.set("x", cell.clone()).unwrap();
        second.set("y.z", cell).unwrap();

        first.get("x").unwrap().as_variable().unwrap().update(BinaryOp::Add, 1).unwrap();
        assert_eq!(second.get("y.z").unwrap(), 2);

        first.set("x", 10).unwrap();
        assert_eq!(second.get("y.z").unwrap(), 10);
    }

    #[test]
    fn test_pop_semantics() {
        let dict = NestedDict::from_pairs([("a.b", 1)]).unwrap();
        assert_eq!(dict.pop_or("a.zz", 7).unwrap(), 7);
        assert_eq!(dict.pop_or("x.zz", 7).unwrap_err().kind(), ErrorKind::KeyNotFound);
        assert_eq!(dict.pop("a.b").unwrap(), 1);
        assert!(dict.child("a").unwrap().is_empty());
        assert!(dict.delete("a.b").is_err());
    }

    #[test]
    fn test_fallback_lookup() {
        let dict = NestedDict::from_pairs([("lr", Value::Float(0.1)), ("model.encoder.dim", Value::Int(8))]).unwrap();
        assert!(dict.get("model.encoder.lr").is_err());
        assert_eq!(dict.get_fallback("model.encoder.lr").unwrap(), 0.1);

        let dict = dict.with_fallback(true);
        assert_eq!(dict.get("model.encoder.lr").unwrap(), 0.1);
    }

    #[test]
    fn test_apply_is_post_order() {
        let dict = NestedDict::from_pairs([("a.b.c", 1), ("d", 2)]).unwrap();
        let mut sizes = Vec::new();
        dict.apply(|d| sizes.push(d.len()));
        assert_eq!(sizes, vec![1, 1, 2]);
    }

    #[test]
    fn test_freeze_defrost_and_unlocked() {
        let dict = NestedDict::from_pairs([("a.b", 1)]).unwrap();
        dict.freeze();
        assert!(matches!(dict.set("a.b", 2), Err(Error::Frozen(p)) if p == "a.b"));
        {
            let unlocked = dict.unlocked();
            unlocked.set("a.b", 3).unwrap();
        }
        assert!(dict.is_frozen());
        assert!(dict.set("a.c", 1).is_err());
        dict.defrost();
        dict.set("a.c", 1).unwrap();
    }

    #[test]
    fn test_freeze_reaches_containers_behind_cells() {
        let dict = NestedDict::new();
        let model = NestedDict::from_pairs([("x", 1)]).unwrap();
        dict.set("m", Variable::new(model.clone())).unwrap();
        let plain: FlatDict = [("y", 1)].into_iter().collect();
        let inner: FlatDict = [("z", 1)].into_iter().collect();
        plain.set("inner", inner.clone()).unwrap();
        dict.set("p", plain).unwrap();
        assert_eq!(dict.all_keys().collect::<Vec<_>>(), vec!["m.x", "p"]);

        dict.freeze();
        assert!(matches!(dict.set("m.x", 2), Err(Error::Frozen(p)) if p == "m.x"));
        assert!(model.is_frozen());
        assert!(inner.is_frozen());
        let mut frozen = Vec::new();
        dict.apply(|d| frozen.push(d.is_frozen()));
        assert_eq!(frozen, vec![true, true]);

        dict.defrost();
        dict.set("m.x", 2).unwrap();
        assert_eq!(model.get("x").unwrap(), 2);
        assert!(!inner.is_frozen());
    }

    #[test]
    fn test_validate_reports_path() {
        let cell = Variable::builder().required(true).build().unwrap();
        let dict = NestedDict::new();
        dict.set("model.name", cell).unwrap();
        let err = dict.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Required);
        assert!(err.to_string().starts_with("'model.name'"));
    }

    #[test]
    fn test_sort_drop_null_and_flatten() {
        let dict = NestedDict::from_pairs([("z.b", Value::Int(1)), ("z.a", Value::Null), ("y", Value::Int(2))]).unwrap();
        dict.drop_null();
        dict.sort_keys(true);
        assert_eq!(dict.keys(), vec!["y".to_string(), "z".to_string()]);
        let flat = dict.to_flat();
        assert_eq!(flat.keys(), vec!["y".to_string(), "z.b".to_string()]);
    }

    #[test]
    fn test_try_from_json() {
        let dict = NestedDict::try_from(json!({"a": {"b": [1, {"c": 2}]}})).unwrap();
        let list = dict.get("a.b").unwrap().as_list().unwrap();
        assert!(matches!(list.get(1), Some(Value::Nested(_))));
        assert!(NestedDict::try_from(json!([1, 2])).is_err());
    }

    #[test]
    fn test_get_or_insert() {
        let dict = NestedDict::new();
        assert_eq!(dict.get_or_insert("a.b", 1).unwrap(), 1);
        assert_eq!(dict.get_or_insert("a.b", 2).unwrap(), 1);
    }
}
