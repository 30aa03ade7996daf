//! Shared mutable scalar cells.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::literal;
use crate::value::{BinaryOp, Kind, Memo, UnaryOp, Value};

/// Predicate run against every value a [`Variable`] accepts.
pub type Validator = Rc<dyn Fn(&Value) -> bool>;

#[derive(Clone)]
struct Cell {
    value: Option<Value>,
    kind: Option<Kind>,
    choices: Option<Vec<Value>>,
    validator: Option<Validator>,
    required: bool,
    help: Option<String>,
    wrap_type: bool,
}

impl Cell {
    fn new(value: Option<Value>) -> Self {
        Self {
            value,
            kind: None,
            choices: None,
            validator: None,
            required: false,
            help: None,
            wrap_type: true,
        }
    }
}

/// A mutable cell that can be placed at several locations of a tree.
///
/// Cloning a `Variable` yields another handle to the same cell, so an update
/// through any location is observed through all of them. Every write runs the
/// kind check, then the validator, then the choices check.
///
/// ```
/// use dragon_config::{NestedDict, Variable, BinaryOp};
///
/// let shared = Variable::new(1013);
/// let config = NestedDict::new();
/// config.set("model.dim", shared.clone())?;
/// config.set("head.dim", shared.clone())?;
///
/// shared.update(BinaryOp::Add, 1)?;
/// assert_eq!(config.get("head.dim")?, 1014);
/// # Ok::<(), dragon_config::Error>(())
/// ```
#[derive(Clone)]
pub struct Variable {
    cell: Rc<RefCell<Cell>>,
}

impl Variable {
    pub fn new(value: impl Into<Value>) -> Self {
        let value = match value.into() {
            Value::Var(other) => other.get(),
            value => value,
        };
        Self::from_cell(Cell::new(Some(value)))
    }

    /// Creates a cell with no value.
    pub fn unset() -> Self {
        Self::from_cell(Cell::new(None))
    }

    pub fn builder() -> VariableBuilder {
        VariableBuilder::default()
    }

    fn from_cell(cell: Cell) -> Self {
        Self {
            cell: Rc::new(RefCell::new(cell)),
        }
    }

    /// Returns the boxed value, or [`Value::Null`] when unset.
    pub fn get(&self) -> Value {
        self.cell.borrow().value.clone().unwrap_or_default()
    }

    pub fn is_set(&self) -> bool {
        self.cell.borrow().value.is_some()
    }

    /// Replaces the boxed value. A `Variable` argument contributes its value.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let value = match value.into() {
            Value::Var(other) => other.get(),
            value => value,
        };
        self.check(&value)?;
        self.cell.borrow_mut().value = Some(value);
        Ok(())
    }

    fn check(&self, value: &Value) -> Result<()> {
        let (kind, validator, choices) = {
            let cell = self.cell.borrow();
            (cell.kind, cell.validator.clone(), cell.choices.clone())
        };
        if let Some(expected) = kind {
            if value.kind() != expected {
                return Err(Error::TypeMismatch {
                    expected,
                    value: value.to_string(),
                });
            }
        }
        if let Some(validator) = validator {
            if !validator(value) {
                return Err(Error::InvalidValue(format!("value {value} failed validation")));
            }
        }
        if let Some(choices) = choices {
            if !choices.contains(value) {
                return Err(Error::NotInChoices {
                    value: value.to_string(),
                    choices: choices.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                });
            }
        }
        Ok(())
    }

    /// Checks the current state: a required cell must be set, and a set
    /// value must pass every check.
    pub fn validate(&self) -> Result<()> {
        let (required, value) = {
            let cell = self.cell.borrow();
            (cell.required, cell.value.clone())
        };
        match value {
            None if required => Err(Error::Required),
            None => Ok(()),
            Some(value) => self.check(&value),
        }
    }

    pub fn declared_kind(&self) -> Option<Kind> {
        self.cell.borrow().kind
    }

    /// Kind of the boxed value.
    pub fn dtype(&self) -> Kind {
        self.get().kind()
    }

    /// Kind this cell reports to containers.
    pub fn kind(&self) -> Kind {
        if self.wraps_type() {
            self.dtype()
        } else {
            Kind::Variable
        }
    }

    pub fn choices(&self) -> Option<Vec<Value>> {
        self.cell.borrow().choices.clone()
    }

    pub fn is_required(&self) -> bool {
        self.cell.borrow().required
    }

    pub fn help(&self) -> Option<String> {
        self.cell.borrow().help.clone()
    }

    pub fn wraps_type(&self) -> bool {
        self.cell.borrow().wrap_type
    }

    pub fn set_wrap_type(&self, wrap: bool) {
        self.cell.borrow_mut().wrap_type = wrap;
    }

    /// Makes the cell report [`Kind::Variable`] until the guard is dropped.
    pub fn unwrapped(&self) -> Unwrapped<'_> {
        let previous = self.wraps_type();
        self.set_wrap_type(false);
        Unwrapped {
            variable: self,
            previous,
        }
    }

    /// Applies `op` and returns the result in a fresh cell.
    pub fn combine(&self, op: BinaryOp, rhs: impl Into<Value>) -> Result<Variable> {
        let result = self.get().binary(op, &rhs.into())?;
        Ok(Variable::new(result))
    }

    /// Applies `op` in place; every alias observes the result.
    pub fn update(&self, op: BinaryOp, rhs: impl Into<Value>) -> Result<()> {
        let result = self.get().binary(op, &rhs.into())?;
        self.set(result)
    }

    pub fn unary(&self, op: UnaryOp) -> Result<Variable> {
        Ok(Variable::new(self.get().unary(op)?))
    }

    /// Converts the boxed value in place.
    pub fn convert(&self, kind: Kind) -> Result<()> {
        let value = self.get();
        let invalid = || Error::TypeMismatch {
            expected: kind,
            value: value.to_string(),
        };
        let converted = match (kind, &value) {
            (Kind::Int, Value::Int(_))
            | (Kind::Float, Value::Float(_))
            | (Kind::Str, Value::Str(_))
            | (Kind::Bool, Value::Bool(_)) => value.clone(),
            (Kind::Int, Value::Float(f)) => Value::Int(f.trunc() as i64),
            (Kind::Int, Value::Bool(b)) => Value::Int(i64::from(*b)),
            (Kind::Int, Value::Str(s)) => Value::Int(s.trim().parse().map_err(|_| invalid())?),
            (Kind::Float, Value::Int(i)) => Value::Float(*i as f64),
            (Kind::Float, Value::Bool(b)) => Value::Float(f64::from(u8::from(*b))),
            (Kind::Float, Value::Str(s)) => Value::Float(s.trim().parse().map_err(|_| invalid())?),
            (Kind::Bool, Value::Int(i)) => Value::Bool(*i != 0),
            (Kind::Bool, Value::Str(s)) => Value::Bool(literal::parse_bool(s)?),
            (Kind::Str, other) => Value::Str(other.to_string()),
            _ => return Err(invalid()),
        };
        self.set(converted)
    }

    /// New cell sharing the boxed value and the same checks.
    pub fn copy(&self) -> Variable {
        let cell = self.cell.borrow().clone();
        Self::from_cell(cell)
    }

    pub fn deep_copy(&self) -> Variable {
        self.deep_copy_in(&mut Memo::default())
    }

    pub(crate) fn deep_copy_in(&self, memo: &mut Memo) -> Variable {
        if let Some(copy) = memo.vars.get(&self.id()) {
            return copy.clone();
        }
        let (mut cell, value) = {
            let cell = self.cell.borrow();
            (cell.clone(), cell.value.clone())
        };
        cell.value = None;
        let copy = Self::from_cell(cell);
        memo.vars.insert(self.id(), copy.clone());
        if let Some(value) = value {
            let value = value.deep_copy_in(memo);
            copy.cell.borrow_mut().value = Some(value);
        }
        copy
    }

    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.cell) as usize
    }
}

impl Default for Variable {
    fn default() -> Self {
        Self::unset()
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cell.borrow().value {
            Some(value) => write!(f, "Variable({value:?})"),
            None => f.write_str("Variable(<unset>)"),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.get() == other.get()
    }
}

impl PartialEq<Value> for Variable {
    fn eq(&self, other: &Value) -> bool {
        self.get() == *other
    }
}

impl PartialOrd for Variable {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.get().partial_cmp(&other.get())
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Value>> ops::$trait<T> for &Variable {
            type Output = Result<Variable>;

            fn $method(self, rhs: T) -> Self::Output {
                self.combine($op, rhs)
            }
        }
    };
}

binary_operator!(Add, add, BinaryOp::Add);
binary_operator!(Sub, sub, BinaryOp::Sub);
binary_operator!(Mul, mul, BinaryOp::Mul);
binary_operator!(Div, div, BinaryOp::Div);
binary_operator!(Rem, rem, BinaryOp::Rem);
binary_operator!(BitAnd, bitand, BinaryOp::BitAnd);
binary_operator!(BitOr, bitor, BinaryOp::BitOr);
binary_operator!(BitXor, bitxor, BinaryOp::BitXor);

impl ops::Neg for &Variable {
    type Output = Result<Variable>;

    fn neg(self) -> Self::Output {
        self.unary(UnaryOp::Neg)
    }
}

impl ops::Not for &Variable {
    type Output = Result<Variable>;

    fn not(self) -> Self::Output {
        self.unary(UnaryOp::Not)
    }
}

/// Guard returned by [`Variable::unwrapped`].
pub struct Unwrapped<'a> {
    variable: &'a Variable,
    previous: bool,
}

impl ops::Deref for Unwrapped<'_> {
    type Target = Variable;

    fn deref(&self) -> &Variable {
        self.variable
    }
}

impl Drop for Unwrapped<'_> {
    fn drop(&mut self) {
        self.variable.set_wrap_type(self.previous);
    }
}

/// Builder for cells with declared kind, choices, validator or help.
#[derive(Default)]
#[must_use = "builders do nothing until .build() is called"]
pub struct VariableBuilder {
    value: Option<Value>,
    kind: Option<Kind>,
    choices: Option<Vec<Value>>,
    validator: Option<Validator>,
    required: bool,
    help: Option<String>,
}

impl VariableBuilder {
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn validator(mut self, validator: impl Fn(&Value) -> bool + 'static) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Builds the cell, checking the initial value if one was given.
    pub fn build(self) -> Result<Variable> {
        let variable = Variable::from_cell(Cell {
            value: None,
            kind: self.kind,
            choices: self.choices,
            validator: self.validator,
            required: self.required,
            help: self.help,
            wrap_type: true,
        });
        if let Some(value) = self.value {
            variable.set(value)?;
        }
        Ok(variable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_clone_aliases_cell() {
        let a = Variable::new(1);
        let b = a.clone();
        a.update(BinaryOp::Add, 1).unwrap();
        assert_eq!(b.get(), 2);
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_combine_returns_new_cell() {
        let a = Variable::new(10);
        let b = (&a + 5).unwrap();
        assert_eq!(b.get(), 15);
        assert_eq!(a.get(), 10);
        assert!(!a.ptr_eq(&b));

        let c = (&a * &b).unwrap();
        assert_eq!(c.get(), 150);
        assert_eq!((-&a).unwrap().get(), -10);
    }

    #[test]
    fn test_check_order_kind_then_validator_then_choices() {
        let var = Variable::builder()
            .kind(Kind::Int)
            .validator(|v| v.as_i64().is_some_and(|i| i > 0))
            .choices([1, 2, 3])
            .build()
            .unwrap();

        assert_eq!(var.set("one").unwrap_err().kind(), ErrorKind::Type);
        assert!(matches!(var.set(-1).unwrap_err(), Error::InvalidValue(_)));
        assert!(matches!(var.set(4).unwrap_err(), Error::NotInChoices { .. }));
        var.set(2).unwrap();
        assert_eq!(var.get(), 2);
    }

    #[test]
    fn test_builder_validates_initial_value() {
        let result = Variable::builder().value("x").kind(Kind::Int).build();
        assert!(matches!(result, Err(Error::TypeMismatch { expected: Kind::Int, .. })));
    }

    #[test]
    fn test_required_unset_fails_validation() {
        let var = Variable::builder().required(true).build().unwrap();
        assert!(matches!(var.validate(), Err(Error::Required)));
        var.set("ready").unwrap();
        assert!(var.validate().is_ok());
    }

    #[test]
    fn test_unwrapped_guard_restores_masquerade() {
        let var = Variable::new(1.5);
        assert_eq!(Value::Var(var.clone()).kind(), Kind::Float);
        {
            let guard = var.unwrapped();
            assert_eq!(guard.kind(), Kind::Variable);
        }
        assert_eq!(var.kind(), Kind::Float);
    }

    #[test]
    fn test_set_unwraps_variable_argument() {
        let source = Variable::new("hello");
        let target = Variable::new("x");
        target.set(source.clone()).unwrap();
        assert!(!target.ptr_eq(&source));
        assert_eq!(target.get(), "hello");
    }

    #[test]
    fn test_convert() {
        let var = Variable::new(1013);
        var.convert(Kind::Float).unwrap();
        assert_eq!(var.dtype(), Kind::Float);
        var.convert(Kind::Str).unwrap();
        assert_eq!(var.get(), "1013.0");

        let typed = Variable::builder().value(3).kind(Kind::Int).build().unwrap();
        assert!(typed.convert(Kind::Str).is_err());
    }

    #[test]
    fn test_copy_and_deep_copy() {
        let list = Value::from(vec![1, 2]);
        let var = Variable::new(list);
        let shallow = var.copy();
        let deep = var.deep_copy();
        var.get().as_list().unwrap().push(3);

        assert_eq!(shallow.get().as_list().unwrap().len(), 3);
        assert_eq!(deep.get().as_list().unwrap().len(), 2);
    }
}
