//! The dynamic value type held by every container slot.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::dict::{FlatDict, NestedDict};
use crate::error::{Error, Result};
use crate::variable::Variable;

/// Coarse type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Dict,
    Variable,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Str => "str",
            Kind::List => "list",
            Kind::Dict => "dict",
            Kind::Variable => "variable",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A configuration value.
///
/// Lists and dictionaries are reference handles: cloning a `Value` that holds
/// one aliases the same storage, the way a document tree shares its children.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(List),
    Flat(FlatDict),
    Nested(NestedDict),
    Var(Variable),
}

/// Binary operators understood by [`Value::binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// True division, always producing a float.
    Div,
    FloorDiv,
    /// Remainder with the sign of the divisor.
    Rem,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::Abs => "abs",
        }
    }
}

impl Value {
    /// Returns the kind of the value.
    ///
    /// A [`Variable`] reports the kind of its boxed value unless it has been
    /// told to stop masquerading (see [`Variable::unwrapped`]).
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Str(_) => Kind::Str,
            Value::List(_) => Kind::List,
            Value::Flat(_) | Value::Nested(_) => Kind::Dict,
            Value::Var(cell) => cell.kind(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.resolved(), Value::Null)
    }

    /// Returns the value with any [`Variable`] indirection removed.
    pub fn resolved(&self) -> Value {
        match self {
            Value::Var(cell) => cell.get().resolved(),
            other => other.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.resolved() {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.resolved() {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self.resolved() {
            Value::Int(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self.resolved() {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<List> {
        match self.resolved() {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Value::Var(cell) => Some(cell),
            _ => None,
        }
    }

    /// Returns the nested container held by this value, looking through cells.
    pub fn as_nested(&self) -> Option<NestedDict> {
        match self {
            Value::Nested(dict) => Some(dict.clone()),
            Value::Var(cell) => cell.get().as_nested(),
            _ => None,
        }
    }

    /// Returns the single-level storage of any mapping value.
    ///
    /// Flat and nested containers share the same storage type, and a cell
    /// holding a container exposes the container.
    pub fn as_storage(&self) -> Option<FlatDict> {
        match self {
            Value::Flat(dict) => Some(dict.clone()),
            Value::Nested(dict) => Some(dict.as_flat().clone()),
            Value::Var(cell) => cell.get().as_storage(),
            _ => None,
        }
    }

    pub fn is_mapping(&self) -> bool {
        self.as_storage().is_some()
    }

    /// The nested container a depth-first traversal descends into.
    ///
    /// Cells only count while they masquerade as their boxed value.
    pub(crate) fn nested(&self) -> Option<NestedDict> {
        match self {
            Value::Nested(dict) => Some(dict.clone()),
            Value::Var(cell) if cell.wraps_type() => cell.get().nested(),
            _ => None,
        }
    }

    /// Text used when the value is substituted into a string.
    pub(crate) fn scalar_text(&self) -> Option<String> {
        match self.resolved() {
            Value::List(_) | Value::Flat(_) | Value::Nested(_) => None,
            Value::Str(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    pub fn deep_copy(&self) -> Value {
        self.deep_copy_in(&mut Memo::default())
    }

    pub(crate) fn deep_copy_in(&self, memo: &mut Memo) -> Value {
        match self {
            Value::List(list) => Value::List(list.deep_copy_in(memo)),
            Value::Flat(dict) => Value::Flat(dict.deep_copy_in(memo)),
            Value::Nested(dict) => Value::Nested(dict.deep_copy_in(memo)),
            Value::Var(cell) => Value::Var(cell.deep_copy_in(memo)),
            scalar => scalar.clone(),
        }
    }

    /// Applies a binary operator, looking through cells on both sides.
    pub fn binary(&self, op: BinaryOp, rhs: &Value) -> Result<Value> {
        let left = self.resolved();
        let right = rhs.resolved();
        let unsupported = || Error::UnsupportedOperands {
            op: op.symbol(),
            left: left.kind(),
            right: right.kind(),
        };
        let overflow = || Error::InvalidValue(format!("integer overflow in {left} {} {right}", op.symbol()));

        match (op, &left, &right) {
            (BinaryOp::Add, Value::Int(a), Value::Int(b)) => {
                a.checked_add(*b).map(Value::Int).ok_or_else(overflow)
            }
            (BinaryOp::Sub, Value::Int(a), Value::Int(b)) => {
                a.checked_sub(*b).map(Value::Int).ok_or_else(overflow)
            }
            (BinaryOp::Mul, Value::Int(a), Value::Int(b)) => {
                a.checked_mul(*b).map(Value::Int).ok_or_else(overflow)
            }
            (BinaryOp::Div, _, _) => {
                let (a, b) = numeric_pair(&left, &right).ok_or_else(unsupported)?;
                if b == 0.0 {
                    return Err(division_by_zero());
                }
                Ok(Value::Float(a / b))
            }
            (BinaryOp::FloorDiv, Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(division_by_zero());
                }
                let quotient = a.checked_div(*b).ok_or_else(overflow)?;
                let adjust = (a % b != 0) && ((*a < 0) != (*b < 0));
                Ok(Value::Int(if adjust { quotient - 1 } else { quotient }))
            }
            (BinaryOp::Rem, Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(division_by_zero());
                }
                let rem = a.checked_rem(*b).ok_or_else(overflow)?;
                let adjust = rem != 0 && ((rem < 0) != (*b < 0));
                Ok(Value::Int(if adjust { rem + b } else { rem }))
            }
            (BinaryOp::Pow, Value::Int(a), Value::Int(b)) => {
                if *b < 0 {
                    return Ok(Value::Float((*a as f64).powf(*b as f64)));
                }
                u32::try_from(*b)
                    .ok()
                    .and_then(|exp| a.checked_pow(exp))
                    .map(Value::Int)
                    .ok_or_else(overflow)
            }
            (BinaryOp::BitAnd, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a & b)),
            (BinaryOp::BitOr, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)),
            (BinaryOp::BitXor, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a ^ b)),
            (BinaryOp::BitAnd, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a & b)),
            (BinaryOp::BitOr, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a | b)),
            (BinaryOp::BitXor, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a ^ b)),
            (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (BinaryOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.to_vec();
                items.extend(b.to_vec());
                Ok(Value::List(List::from(items)))
            }
            (BinaryOp::Mul, Value::Str(s), Value::Int(n))
            | (BinaryOp::Mul, Value::Int(n), Value::Str(s)) => {
                Ok(Value::Str(s.repeat(usize::try_from(*n).unwrap_or(0))))
            }
            (BinaryOp::Mul, Value::List(list), Value::Int(n))
            | (BinaryOp::Mul, Value::Int(n), Value::List(list)) => {
                let items = list.to_vec();
                let times = usize::try_from(*n).unwrap_or(0);
                let repeated: Vec<Value> = (0..times).flat_map(|_| items.iter().cloned()).collect();
                Ok(Value::List(List::from(repeated)))
            }
            _ => {
                let (a, b) = numeric_pair(&left, &right).ok_or_else(unsupported)?;
                match op {
                    BinaryOp::Add => Ok(Value::Float(a + b)),
                    BinaryOp::Sub => Ok(Value::Float(a - b)),
                    BinaryOp::Mul => Ok(Value::Float(a * b)),
                    BinaryOp::FloorDiv if b == 0.0 => Err(division_by_zero()),
                    BinaryOp::FloorDiv => Ok(Value::Float((a / b).floor())),
                    BinaryOp::Rem if b == 0.0 => Err(division_by_zero()),
                    BinaryOp::Rem => Ok(Value::Float(a - b * (a / b).floor())),
                    BinaryOp::Pow => Ok(Value::Float(a.powf(b))),
                    _ => Err(unsupported()),
                }
            }
        }
    }

    pub fn unary(&self, op: UnaryOp) -> Result<Value> {
        let value = self.resolved();
        let overflow = || Error::InvalidValue(format!("integer overflow in {}{value}", op.symbol()));
        match (op, &value) {
            (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Not, Value::Int(i)) => Ok(Value::Int(!i)),
            (UnaryOp::Abs, Value::Int(i)) => i.checked_abs().map(Value::Int).ok_or_else(overflow),
            (UnaryOp::Abs, Value::Float(f)) => Ok(Value::Float(f.abs())),
            _ => Err(Error::UnsupportedOperand {
                op: op.symbol(),
                kind: value.kind(),
            }),
        }
    }
}

fn numeric_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    let number = |value: &Value| match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    };
    Some((number(left)?, number(right)?))
}

fn division_by_zero() -> Error {
    Error::InvalidValue("division by zero".into())
}

fn format_float(f: f64, out: &mut fmt::Formatter<'_>) -> fmt::Result {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        write!(out, "{f:.1}")
    } else {
        write!(out, "{f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => format_float(*x, f),
            Value::Str(s) => f.write_str(s),
            Value::Var(cell) => write!(f, "{}", cell.get()),
            container => {
                let text = serde_json::to_string(container).map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(list) => fmt::Debug::fmt(list, f),
            Value::Flat(dict) => fmt::Debug::fmt(dict, f),
            Value::Nested(dict) => fmt::Debug::fmt(dict, f),
            Value::Var(cell) => fmt::Debug::fmt(cell, f),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Var(a), Value::Var(b)) => a.ptr_eq(b) || a.get() == b.get(),
            (Value::Var(a), b) => a.get() == *b,
            (a, Value::Var(b)) => *a == b.get(),
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (a, b) => match (a.as_storage(), b.as_storage()) {
                (Some(x), Some(y)) => x.content_eq(&y),
                _ => false,
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.resolved(), other.resolved()) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(&b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(&b),
            (Value::Int(a), Value::Float(b)) => (a as f64).partial_cmp(&b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(&b),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(&b),
            (Value::List(a), Value::List(b)) => a.to_vec().partial_cmp(&b.to_vec()),
            _ => None,
        }
    }
}

macro_rules! eq_scalar {
    ($($ty:ty),*) => {
        $(
            impl PartialEq<$ty> for Value {
                fn eq(&self, other: &$ty) -> bool {
                    *self == Value::from(other.clone())
                }
            }
        )*
    };
}

eq_scalar!(bool, i32, i64, f64, &str, String);

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(list) => list.serialize(serializer),
            Value::Flat(dict) => dict.serialize(serializer),
            Value::Nested(dict) => dict.serialize(serializer),
            Value::Var(cell) => cell.get().serialize(serializer),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Value::List(list)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Value::List(items.into_iter().collect())
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(value: Option<V>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<FlatDict> for Value {
    fn from(dict: FlatDict) -> Self {
        Value::Flat(dict)
    }
}

impl From<NestedDict> for Value {
    fn from(dict: NestedDict) -> Self {
        Value::Nested(dict)
    }
}

impl From<Variable> for Value {
    fn from(cell: Variable) -> Self {
        Value::Var(cell)
    }
}

impl From<&Variable> for Value {
    fn from(cell: &Variable) -> Self {
        Value::Var(cell.clone())
    }
}

/// Document objects become flat mappings; nested containers are created
/// by the container that adopts them.
impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().collect()),
            serde_json::Value::Object(map) => Value::Flat(map.into_iter().collect()),
        }
    }
}

/// A shared, mutable list of values.
#[derive(Clone, Default)]
pub struct List {
    items: Rc<RefCell<Vec<Value>>>,
}

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Replaces the element at `index`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut items = self.items.borrow_mut();
        let len = items.len();
        let slot = items
            .get_mut(index)
            .ok_or_else(|| Error::KeyNotFound(format!("index {index} out of range for list of length {len}")))?;
        *slot = value;
        Ok(())
    }

    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.items.borrow_mut().push(value);
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.to_vec().into_iter()
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Rc::ptr_eq(&self.items, &other.items)
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.items) as usize
    }

    pub(crate) fn deep_copy_in(&self, memo: &mut Memo) -> List {
        if let Some(copy) = memo.lists.get(&self.id()) {
            return copy.clone();
        }
        let copy = List::new();
        memo.lists.insert(self.id(), copy.clone());
        for item in self.to_vec() {
            let item = item.deep_copy_in(memo);
            copy.items.borrow_mut().push(item);
        }
        copy
    }
}

impl From<Vec<Value>> for List {
    fn from(items: Vec<Value>) -> Self {
        Self {
            items: Rc::new(RefCell::new(items)),
        }
    }
}

impl<V: Into<Value>> FromIterator<V> for List {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        List::from(iter.into_iter().map(Into::into).collect::<Vec<Value>>())
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.to_vec() == other.to_vec()
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

impl Serialize for List {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let items = self.to_vec();
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in &items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

/// Identity memo for deep copies, keyed by storage address.
///
/// Each storage is registered before its contents are copied, so shared and
/// cyclic references map onto a single copy.
#[derive(Default)]
pub(crate) struct Memo {
    pub(crate) dicts: HashMap<usize, FlatDict>,
    pub(crate) lists: HashMap<usize, List>,
    pub(crate) vars: HashMap<usize, Variable>,
}
