use std::cell::RefCell;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::warn;

use super::attrs::{Attributes, DefaultFactory};
use super::NestedDict;
use crate::error::{Error, Result};
use crate::io::{self, Format};
use crate::literal;
use crate::value::{Memo, Value};

#[derive(Default)]
struct Storage {
    entries: IndexMap<String, Value>,
    attrs: Attributes,
}

/// An ordered, single-level mapping from string keys to [`Value`]s.
///
/// `FlatDict` is a handle: clones share storage. Use [`FlatDict::copy`] or
/// [`FlatDict::deep_copy`] for independent storage.
#[derive(Clone, Default)]
pub struct FlatDict {
    inner: Rc<RefCell<Storage>>,
}

impl FlatDict {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_storage(entries: IndexMap<String, Value>, attrs: Attributes) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Storage { entries, attrs })),
        }
    }

    /// Sets the JSON indentation width used by [`FlatDict::to_text`].
    pub fn with_indent(self, indent: usize) -> Self {
        self.inner.borrow_mut().attrs.indent = indent;
        self
    }

    /// Sets the delimiter nested containers split paths on.
    ///
    /// # Panics
    ///
    /// Panics if `separator` is empty.
    pub fn with_separator(self, separator: impl Into<String>) -> Self {
        let separator = separator.into();
        assert!(!separator.is_empty(), "separator must not be empty");
        self.inner.borrow_mut().attrs.separator = separator;
        self
    }

    pub fn with_convert_mapping(self, convert: bool) -> Self {
        self.inner.borrow_mut().attrs.convert_mapping = convert;
        self
    }

    pub fn with_auto_vivify(self, auto_vivify: bool) -> Self {
        self.inner.borrow_mut().attrs.auto_vivify = auto_vivify;
        self
    }

    pub fn with_fallback(self, fallback: bool) -> Self {
        self.inner.borrow_mut().attrs.fallback = fallback;
        self
    }

    /// Parses textual assignments as literals when enabled.
    pub fn with_literal_parsing(self, enabled: bool) -> Self {
        self.inner.borrow_mut().attrs.parse_literals = enabled;
        self
    }

    /// Registers the factory used when a missing key is read.
    pub fn with_default_factory(self, factory: impl Fn() -> Value + 'static) -> Self {
        let factory: DefaultFactory = Rc::new(factory);
        self.inner.borrow_mut().attrs.default_factory = Some(factory);
        self
    }

    pub fn indent(&self) -> usize {
        self.inner.borrow().attrs.indent
    }

    pub fn separator(&self) -> String {
        self.inner.borrow().attrs.separator.clone()
    }

    pub(crate) fn attrs(&self) -> Attributes {
        self.inner.borrow().attrs.clone()
    }

    pub(crate) fn read_attrs<T>(&self, read: impl FnOnce(&Attributes) -> T) -> T {
        read(&self.inner.borrow().attrs)
    }

    pub(crate) fn set_attrs(&self, attrs: Attributes) {
        self.inner.borrow_mut().attrs = attrs;
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().entries.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.inner.borrow().entries.values().cloned().collect()
    }

    /// Snapshot of the entries in insertion order.
    pub fn items(&self) -> Vec<(String, Value)> {
        self.inner
            .borrow()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.borrow().entries.contains_key(key)
    }

    /// Returns the stored value without running the miss handler.
    pub fn get_opt(&self, key: &str) -> Option<Value> {
        self.inner.borrow().entries.get(key).cloned()
    }

    /// Returns the stored value, or the result of the default factory.
    pub fn get(&self, key: &str) -> Result<Value> {
        match self.get_opt(key) {
            Some(value) => Ok(value),
            None => self.missing(key),
        }
    }

    /// Returns the stored value or `default`, storing nothing.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.get_opt(key).unwrap_or_else(|| default.into())
    }

    pub(crate) fn missing(&self, key: &str) -> Result<Value> {
        self.missing_if(key, |_| true)
    }

    /// Runs the default factory for `key`, storing the result only when
    /// `keep` accepts it.
    pub(crate) fn missing_if(&self, key: &str, keep: impl FnOnce(&Value) -> bool) -> Result<Value> {
        let factory = self.inner.borrow().attrs.default_factory.clone();
        let Some(factory) = factory else {
            return Err(Error::KeyNotFound(key.to_string()));
        };
        let value = self.adopt(factory());
        if keep(&value) {
            self.assign(key.to_string(), value.clone())?;
        }
        Ok(value)
    }

    /// Hands this container's attributes to a freshly produced child.
    pub(crate) fn adopt(&self, value: Value) -> Value {
        if let Some(child) = value.as_storage() {
            if !child.ptr_eq(self) {
                child.set_attrs(self.attrs().inherited());
            }
        }
        value
    }

    /// Assigns `value` to `key`.
    ///
    /// Text is parsed as a literal when literal parsing is enabled, and a
    /// plain value written over a [`Variable`](crate::Variable) updates the
    /// cell in place. Assigning a cell replaces the slot.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        self.assign(key.clone(), value.into())
            .map_err(|err| annotate(err, &key))
    }

    pub(crate) fn assign(&self, key: String, value: Value) -> Result<()> {
        let (frozen, parse_literals) = {
            let storage = self.inner.borrow();
            (storage.attrs.frozen, storage.attrs.parse_literals)
        };
        if frozen {
            return Err(Error::Frozen(key));
        }
        let value = match value {
            Value::Str(text) if parse_literals => {
                literal::parse_literal(&text).unwrap_or(Value::Str(text))
            }
            value => value,
        };
        let slot = self.get_opt(&key);
        if let Some(Value::Var(cell)) = slot {
            if !matches!(value, Value::Var(_)) {
                return cell.set(value);
            }
        }
        self.store(key, value);
        Ok(())
    }

    /// Inserts without policies; used when building containers internally.
    pub(crate) fn store(&self, key: String, value: Value) {
        self.inner.borrow_mut().entries.insert(key, value);
    }

    fn check_unfrozen(&self, key: &str) -> Result<()> {
        if self.inner.borrow().attrs.frozen {
            return Err(Error::Frozen(key.to_string()));
        }
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.pop(key).map(|_| ())
    }

    pub fn pop(&self, key: &str) -> Result<Value> {
        self.check_unfrozen(key)?;
        let removed = self.inner.borrow_mut().entries.shift_remove(key);
        removed.ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    pub fn pop_or(&self, key: &str, default: impl Into<Value>) -> Result<Value> {
        self.check_unfrozen(key)?;
        let removed = self.inner.borrow_mut().entries.shift_remove(key);
        Ok(removed.unwrap_or_else(|| default.into()))
    }

    pub fn clear(&self) -> Result<()> {
        self.check_unfrozen("")?;
        self.inner.borrow_mut().entries.clear();
        Ok(())
    }

    pub fn sort_keys(&self) -> &Self {
        self.inner.borrow_mut().entries.sort_keys();
        self
    }

    /// Removes every entry whose value is null.
    pub fn drop_null(&self) -> &Self {
        let nulls: Vec<String> = self
            .items()
            .into_iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k)
            .collect();
        let mut storage = self.inner.borrow_mut();
        for key in nulls {
            storage.entries.shift_remove(&key);
        }
        drop(storage);
        self
    }

    pub fn freeze(&self) -> &Self {
        self.inner.borrow_mut().attrs.frozen = true;
        self
    }

    pub fn defrost(&self) -> &Self {
        self.inner.borrow_mut().attrs.frozen = false;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.borrow().attrs.frozen
    }

    pub fn merge(&self, other: &impl AsRef<FlatDict>) -> Result<&Self> {
        self.merge_with(other, true)
    }

    /// Merges `other` into this container.
    ///
    /// When both sides hold a mapping under the same key the mappings are
    /// merged recursively; otherwise the incoming value replaces the current
    /// one, unless `overwrite` is false and the key already exists.
    #[doc(alias = "union")]
    pub fn merge_with(&self, other: &impl AsRef<FlatDict>, overwrite: bool) -> Result<&Self> {
        let other = other.as_ref();
        if self.ptr_eq(other) {
            return Ok(self);
        }
        for (key, value) in other.items() {
            match self.get_opt(&key) {
                Some(current) if current.is_mapping() && value.is_mapping() => {
                    super::merge_value(&current, &value, overwrite).map_err(|err| annotate(err, &key))?;
                }
                Some(_) if !overwrite => {}
                _ => self.set(key, value)?,
            }
        }
        Ok(self)
    }

    /// Pairs of `other` whose key is absent here or whose value differs.
    pub fn difference(&self, other: &impl AsRef<FlatDict>) -> FlatDict {
        let result = self.empty_like();
        for (key, value) in other.as_ref().items() {
            if self.get_opt(&key).as_ref() != Some(&value) {
                result.store(key, value);
            }
        }
        result
    }

    /// Pairs of `other` whose key is present here with an equal value.
    pub fn intersection(&self, other: &impl AsRef<FlatDict>) -> FlatDict {
        let result = self.empty_like();
        for (key, value) in other.as_ref().items() {
            if self.get_opt(&key).as_ref() == Some(&value) {
                result.store(key, value);
            }
        }
        result
    }

    /// New storage holding the same value handles.
    pub fn copy(&self) -> FlatDict {
        let storage = self.inner.borrow();
        Self::with_storage(storage.entries.clone(), storage.attrs.clone())
    }

    pub fn deep_copy(&self) -> FlatDict {
        self.deep_copy_in(&mut Memo::default())
    }

    pub(crate) fn deep_copy_in(&self, memo: &mut Memo) -> FlatDict {
        if let Some(copy) = memo.dicts.get(&self.id()) {
            return copy.clone();
        }
        let copy = Self::with_storage(IndexMap::new(), self.attrs());
        memo.dicts.insert(self.id(), copy.clone());
        for (key, value) in self.items() {
            let value = value.deep_copy_in(memo);
            copy.store(key, value);
        }
        copy
    }

    /// Empty container carrying the same attributes.
    pub fn empty_like(&self) -> FlatDict {
        Self::with_storage(IndexMap::new(), self.attrs().inherited())
    }

    /// Validates every cell, annotating failures with their key.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in self.items() {
            let result = match &value {
                Value::Var(cell) => cell.validate(),
                Value::Flat(dict) => dict.validate(),
                Value::Nested(dict) => dict.validate(),
                _ => Ok(()),
            };
            result.map_err(|err| err.context(key.as_str()))?;
        }
        Ok(())
    }

    /// Stores a free-form attribute outside the data entries.
    pub fn setattr(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if self.contains_key(&name) {
            warn!(attribute = %name, "attribute shadows a data key of the same name");
        }
        self.inner.borrow_mut().attrs.extra.insert(name, value);
    }

    pub fn getattr(&self, name: &str) -> Option<Value> {
        self.inner.borrow().attrs.extra.get(name).cloned()
    }

    pub fn delattr(&self, name: &str) -> Option<Value> {
        self.inner.borrow_mut().attrs.extra.shift_remove(name)
    }

    pub fn hasattr(&self, name: &str) -> bool {
        self.inner.borrow().attrs.extra.contains_key(name)
    }

    pub fn ptr_eq(&self, other: &FlatDict) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// Order-insensitive comparison of the data entries.
    pub(crate) fn content_eq(&self, other: &FlatDict) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let mine = self.items();
        mine.len() == other.len()
            && mine
                .iter()
                .all(|(key, value)| other.get_opt(key).is_some_and(|theirs| *value == theirs))
    }

    /// Deserializes the contents into any serde target.
    pub fn to_plain<T: DeserializeOwned>(&self) -> Result<T> {
        let json = serde_json::to_value(self)?;
        Ok(serde_json::from_value(json)?)
    }

    pub fn to_text(&self, format: Format) -> Result<String> {
        io::render(self, format, self.indent())
    }

    /// Writes the container to `path`, choosing the format by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = self.to_text(Format::from_path(path)?)?;
        io::write_file(path, &text)
    }

    pub fn write_to<W: Write>(&self, mut writer: W, format: Format) -> Result<()> {
        let text = self.to_text(format)?;
        writer.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Loads a document, choosing the format by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<FlatDict> {
        io::load_file(path.as_ref())
    }

    pub fn parse(text: &str, format: Format) -> Result<FlatDict> {
        io::parse_str(text, format)
    }

    pub fn read_from<R: Read>(mut reader: R, format: Format) -> Result<FlatDict> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::parse(&text, format)
    }
}

/// Adds the key to an error unless the error already names it.
pub(crate) fn annotate(err: Error, key: &str) -> Error {
    match err {
        Error::Frozen(_) | Error::KeyNotFound(_) | Error::NotAMapping { .. } => err,
        err => err.context(key),
    }
}

impl fmt::Debug for FlatDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.items()).finish()
    }
}

impl PartialEq for FlatDict {
    fn eq(&self, other: &Self) -> bool {
        self.content_eq(other)
    }
}

impl PartialEq<NestedDict> for FlatDict {
    fn eq(&self, other: &NestedDict) -> bool {
        self.content_eq(other.as_flat())
    }
}

impl AsRef<FlatDict> for FlatDict {
    fn as_ref(&self) -> &FlatDict {
        self
    }
}

impl Serialize for FlatDict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let items = self.items();
        let mut map = serializer.serialize_map(Some(items.len()))?;
        for (key, value) in &items {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FlatDict {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::with_storage(entries, Attributes::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::Variable;
    use tempfile::tempdir;

    fn sample() -> FlatDict {
        [("a", Value::Int(1)), ("b", Value::Int(2)), ("c", Value::Int(3))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_get_missing_without_factory() {
        let dict = FlatDict::new();
        assert!(matches!(dict.get("x"), Err(Error::KeyNotFound(k)) if k == "x"));
        assert_eq!(dict.get_or("x", 5), 5);
        assert!(!dict.contains_key("x"));
    }

    #[test]
    fn test_default_factory_stores_and_inherits() {
        let dict = FlatDict::new()
            .with_indent(4)
            .with_default_factory(|| Value::Flat(FlatDict::new()));
        let child = dict.get("child").unwrap();
        assert!(dict.contains_key("child"));
        assert_eq!(child.as_storage().unwrap().indent(), 4);
    }

    #[test]
    fn test_set_routes_into_variable() {
        let cell = Variable::new(1);
        let dict = FlatDict::new();
        dict.set("x", cell.clone()).unwrap();
        dict.set("x", 7).unwrap();
        assert_eq!(cell.get(), 7);
        assert!(matches!(dict.get_opt("x"), Some(Value::Var(v)) if v.ptr_eq(&cell)));
    }

    #[test]
    fn test_literal_parsing_policy() {
        let dict = FlatDict::new().with_literal_parsing(true);
        dict.set("n", "42").unwrap();
        dict.set("s", "hello").unwrap();
        assert_eq!(dict.get_opt("n").unwrap(), Value::Int(42));
        assert_eq!(dict.get_opt("s").unwrap(), "hello");

        let plain = FlatDict::new();
        plain.set("n", "42").unwrap();
        assert_eq!(plain.get_opt("n").unwrap(), "42");
    }

    #[test]
    fn test_pop_and_delete() {
        let dict = sample();
        assert_eq!(dict.pop("a").unwrap(), 1);
        assert_eq!(dict.pop_or("a", 9).unwrap(), 9);
        assert_eq!(dict.delete("zzz").unwrap_err().kind(), ErrorKind::KeyNotFound);
        assert_eq!(dict.keys(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_merge_precedence() {
        let dict = sample();
        let other: FlatDict = [("a", 10), ("d", 4)].into_iter().collect();

        let kept = dict.copy();
        kept.merge_with(&other, false).unwrap();
        assert_eq!(kept.get_opt("a").unwrap(), 1);
        assert_eq!(kept.get_opt("d").unwrap(), 4);

        dict.merge(&other).unwrap();
        assert_eq!(dict.get_opt("a").unwrap(), 10);
    }

    #[test]
    fn test_difference_and_intersection() {
        let dict = sample();
        let other: FlatDict = [("a", 1), ("b", 5), ("d", 4)].into_iter().collect();
        let diff = dict.difference(&other);
        assert_eq!(diff.keys(), vec!["b".to_string(), "d".to_string()]);
        let common = dict.intersection(&other);
        assert_eq!(common.keys(), vec!["a".to_string()]);
    }

    #[test]
    fn test_copy_semantics() {
        let inner: FlatDict = [("x", 1)].into_iter().collect();
        let dict = FlatDict::new();
        dict.set("inner", inner.clone()).unwrap();
        dict.set("top", 1).unwrap();
        dict.set("list", vec![1, 2]).unwrap();

        let shallow = dict.copy();
        assert_eq!(shallow, dict);
        shallow.set("top", 2).unwrap();
        assert_eq!(dict.get_opt("top").unwrap(), 1);
        shallow.get("inner").unwrap().as_storage().unwrap().set("x", 2).unwrap();
        assert_eq!(inner.get_opt("x").unwrap(), 2);
        shallow.get("list").unwrap().as_list().unwrap().push(3);
        assert_eq!(dict.get("list").unwrap().as_list().unwrap().len(), 3);

        let deep = dict.deep_copy();
        assert_eq!(deep, dict);
        deep.get("inner").unwrap().as_storage().unwrap().set("x", 3).unwrap();
        assert_eq!(inner.get_opt("x").unwrap(), 2);
    }

    #[test]
    fn test_deep_copy_keeps_aliases() {
        let cell = Variable::new(1);
        let dict = FlatDict::new();
        dict.set("a", cell.clone()).unwrap();
        dict.set("b", cell).unwrap();

        let copy = dict.deep_copy();
        copy.set("a", 5).unwrap();
        assert_eq!(copy.get_opt("b").unwrap(), 5);
        assert_eq!(dict.get_opt("b").unwrap(), 1);
    }

    #[test]
    fn test_attributes_are_not_data() {
        let dict = sample();
        dict.setattr("name", "demo");
        assert!(dict.hasattr("name"));
        assert_eq!(dict.getattr("name").unwrap(), "demo");
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.empty_like().getattr("name").unwrap(), "demo");
        assert_eq!(dict.delattr("name").unwrap(), "demo");
        assert!(!dict.hasattr("name"));
    }

    #[test]
    fn test_frozen_rejects_writes() {
        let dict = sample();
        dict.freeze();
        assert!(matches!(dict.set("a", 2), Err(Error::Frozen(_))));
        assert!(matches!(dict.pop("a"), Err(Error::Frozen(_))));
        dict.defrost();
        dict.set("a", 2).unwrap();
    }

    #[test]
    fn test_to_plain_struct() {
        #[derive(serde::Deserialize)]
        struct Plain {
            a: i64,
            c: u8,
        }
        let plain: Plain = sample().to_plain().unwrap();
        assert_eq!(plain.a, 1);
        assert_eq!(plain.c, 3);
    }

    #[test]
    fn test_json_indent_and_round_trip() {
        let dict: FlatDict = [("b", 1), ("a", 2)].into_iter().collect();
        let dict = dict.with_indent(4);
        assert_eq!(dict.to_text(Format::Json).unwrap(), "{\n    \"b\": 1,\n    \"a\": 2\n}");

        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.yaml");
        dict.save(&path).unwrap();
        let loaded = FlatDict::load(&path).unwrap();
        assert_eq!(loaded, dict);
        assert_eq!(loaded.keys(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_unknown_extension() {
        let dir = tempdir().unwrap();
        let err = sample().save(dir.path().join("dump.ini")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileFormat);
    }

    #[test]
    fn test_drop_null() {
        let dict: FlatDict = [("a", Value::Null), ("b", Value::Int(1))].into_iter().collect();
        dict.drop_null();
        assert_eq!(dict.keys(), vec!["b".to_string()]);
    }
}
