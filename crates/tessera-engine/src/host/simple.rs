//! In-memory host runtime
//!
//! A deliberately small object model: enough to drive every context
//! operation end to end (numbers, strings, lists, functions, exception types).

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_sdk::{Constant, ObjectRef};

use super::{HostError, HostResult, HostRuntime};

type NativeFn = dyn Fn(&[ObjectRef]) -> HostResult<ObjectRef> + Send + Sync;

/// Named callable backed by a Rust closure
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    func: Arc<NativeFn>,
}

impl HostFunction {
    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, args: &[ObjectRef]) -> HostResult<ObjectRef> {
        (self.func)(args)
    }
}

/// Object representation used by `SimpleHost`
pub enum HostValue {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    Str(String),
    /// Mutable list
    List(Mutex<Vec<ObjectRef>>),
    /// Callable
    Function(HostFunction),
    /// Type object (builtin types and exception types)
    Type {
        /// Which constant this type is
        constant: Constant,
        /// Parent type, `None` for a root
        base: Option<Constant>,
    },
    /// `NotImplemented`
    NotImplemented,
    /// `Ellipsis`
    Ellipsis,
}

impl HostValue {
    /// Wrap a closure as a callable object
    pub fn function<F>(name: impl Into<String>, func: F) -> ObjectRef
    where
        F: Fn(&[ObjectRef]) -> HostResult<ObjectRef> + Send + Sync + 'static,
    {
        ObjectRef::new(HostValue::Function(HostFunction {
            name: name.into(),
            func: Arc::new(func),
        }))
    }

    /// Build a list object
    pub fn list(items: Vec<ObjectRef>) -> ObjectRef {
        ObjectRef::new(HostValue::List(Mutex::new(items)))
    }

    fn type_name(&self) -> &'static str {
        match self {
            HostValue::None => "NoneType",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "float",
            HostValue::Str(_) => "str",
            HostValue::List(_) => "list",
            HostValue::Function(_) => "function",
            HostValue::Type { .. } => "type",
            HostValue::NotImplemented => "NotImplementedType",
            HostValue::Ellipsis => "ellipsis",
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::None => f.write_str("None"),
            HostValue::Bool(true) => f.write_str("True"),
            HostValue::Bool(false) => f.write_str("False"),
            HostValue::Int(i) => write!(f, "{}", i),
            HostValue::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            HostValue::Float(x) => write!(f, "{}", x),
            HostValue::Str(s) => write!(f, "'{}'", s),
            HostValue::List(items) => match items.try_lock() {
                Some(items) => {
                    f.write_str("[")?;
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{:?}", item)?;
                    }
                    f.write_str("]")
                }
                // list reachable from itself
                None => f.write_str("[...]"),
            },
            HostValue::Function(func) => write!(f, "<function {}>", func.name),
            HostValue::Type { constant, .. } => write!(f, "<class '{}'>", constant.name()),
            HostValue::NotImplemented => f.write_str("NotImplemented"),
            HostValue::Ellipsis => f.write_str("Ellipsis"),
        }
    }
}

fn base_of(constant: Constant) -> Option<Constant> {
    match constant {
        Constant::BaseException | Constant::BaseObjectType => None,
        Constant::Exception => Some(Constant::BaseException),
        Constant::TypeError
        | Constant::ValueError
        | Constant::IndexError
        | Constant::KeyError
        | Constant::MemoryError
        | Constant::SystemError
        | Constant::OverflowError
        | Constant::ZeroDivisionError
        | Constant::RuntimeError => Some(Constant::Exception),
        _ => Some(Constant::BaseObjectType),
    }
}

fn value(obj: &ObjectRef) -> Option<&HostValue> {
    obj.downcast_ref::<HostValue>()
}

/// Host runtime with `HostValue` objects and cached singletons
pub struct SimpleHost {
    constants: Vec<ObjectRef>,
}

impl SimpleHost {
    /// Create a host with all constants preallocated
    pub fn new() -> Self {
        let constants = Constant::ALL
            .iter()
            .map(|&c| {
                ObjectRef::new(match c {
                    Constant::None => HostValue::None,
                    Constant::True => HostValue::Bool(true),
                    Constant::False => HostValue::Bool(false),
                    Constant::NotImplemented => HostValue::NotImplemented,
                    Constant::Ellipsis => HostValue::Ellipsis,
                    _ => HostValue::Type {
                        constant: c,
                        base: base_of(c),
                    },
                })
            })
            .collect();
        SimpleHost { constants }
    }

    fn expect_list<'a>(&self, obj: &'a ObjectRef) -> HostResult<&'a Mutex<Vec<ObjectRef>>> {
        match value(obj) {
            Some(HostValue::List(items)) => Ok(items),
            _ => Err(HostError::type_error(format!(
                "expected list, got '{}'",
                self.type_name(obj)
            ))),
        }
    }
}

impl Default for SimpleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimpleHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleHost")
            .field("constants", &self.constants.len())
            .finish()
    }
}

impl HostRuntime for SimpleHost {
    fn constant(&self, constant: Constant) -> ObjectRef {
        self.constants[constant.id()].clone()
    }

    fn int_from_i64(&self, value: i64) -> ObjectRef {
        ObjectRef::new(HostValue::Int(value))
    }

    fn int_as_i64(&self, obj: &ObjectRef) -> HostResult<i64> {
        match value(obj) {
            Some(HostValue::Int(i)) => Ok(*i),
            Some(HostValue::Bool(b)) => Ok(*b as i64),
            _ => Err(HostError::type_error(format!(
                "an integer is required (got type {})",
                self.type_name(obj)
            ))),
        }
    }

    fn float_from_f64(&self, value: f64) -> ObjectRef {
        ObjectRef::new(HostValue::Float(value))
    }

    fn float_as_f64(&self, obj: &ObjectRef) -> HostResult<f64> {
        match value(obj) {
            Some(HostValue::Float(x)) => Ok(*x),
            Some(HostValue::Int(i)) => Ok(*i as f64),
            Some(HostValue::Bool(b)) => Ok(*b as i64 as f64),
            _ => Err(HostError::type_error(format!(
                "must be real number, not {}",
                self.type_name(obj)
            ))),
        }
    }

    fn str_from(&self, s: &str) -> ObjectRef {
        ObjectRef::new(HostValue::Str(s.to_string()))
    }

    fn str_as_string(&self, obj: &ObjectRef) -> HostResult<String> {
        match value(obj) {
            Some(HostValue::Str(s)) => Ok(s.clone()),
            _ => Err(HostError::type_error(format!(
                "expected str, got '{}'",
                self.type_name(obj)
            ))),
        }
    }

    fn add(&self, a: &ObjectRef, b: &ObjectRef) -> HostResult<ObjectRef> {
        use HostValue::*;
        let result = match (value(a), value(b)) {
            (Some(Int(x)), Some(Int(y))) => Int(x.checked_add(*y).ok_or_else(|| {
                HostError::new(Constant::OverflowError, "integer addition overflowed")
            })?),
            (Some(Float(x)), Some(Float(y))) => Float(x + y),
            (Some(Int(x)), Some(Float(y))) => Float(*x as f64 + y),
            (Some(Float(x)), Some(Int(y))) => Float(x + *y as f64),
            (Some(Str(x)), Some(Str(y))) => Str(format!("{}{}", x, y)),
            (Some(List(x)), Some(List(y))) => {
                let mut items = x.lock().clone();
                items.extend(y.lock().iter().cloned());
                List(Mutex::new(items))
            }
            _ => {
                return Err(HostError::type_error(format!(
                    "unsupported operand type(s) for +: '{}' and '{}'",
                    self.type_name(a),
                    self.type_name(b)
                )))
            }
        };
        Ok(ObjectRef::new(result))
    }

    fn repr(&self, obj: &ObjectRef) -> HostResult<String> {
        Ok(format!("{:?}", obj))
    }

    fn is_true(&self, obj: &ObjectRef) -> HostResult<bool> {
        Ok(match value(obj) {
            Some(HostValue::None) => false,
            Some(HostValue::Bool(b)) => *b,
            Some(HostValue::Int(i)) => *i != 0,
            Some(HostValue::Float(x)) => *x != 0.0,
            Some(HostValue::Str(s)) => !s.is_empty(),
            Some(HostValue::List(items)) => !items.lock().is_empty(),
            _ => true,
        })
    }

    fn type_name(&self, obj: &ObjectRef) -> String {
        value(obj).map_or("object", HostValue::type_name).to_string()
    }

    fn list_new(&self) -> ObjectRef {
        HostValue::list(Vec::new())
    }

    fn list_append(&self, list: &ObjectRef, item: ObjectRef) -> HostResult<()> {
        self.expect_list(list)?.lock().push(item);
        Ok(())
    }

    fn length(&self, obj: &ObjectRef) -> HostResult<usize> {
        match value(obj) {
            Some(HostValue::Str(s)) => Ok(s.chars().count()),
            Some(HostValue::List(items)) => Ok(items.lock().len()),
            _ => Err(HostError::type_error(format!(
                "object of type '{}' has no len()",
                self.type_name(obj)
            ))),
        }
    }

    fn get_item(&self, obj: &ObjectRef, index: usize) -> HostResult<ObjectRef> {
        match value(obj) {
            Some(HostValue::List(items)) => items
                .lock()
                .get(index)
                .cloned()
                .ok_or_else(|| HostError::new(Constant::IndexError, "list index out of range")),
            Some(HostValue::Str(s)) => s
                .chars()
                .nth(index)
                .map(|c| self.str_from(c.encode_utf8(&mut [0; 4])))
                .ok_or_else(|| HostError::new(Constant::IndexError, "string index out of range")),
            _ => Err(HostError::type_error(format!(
                "'{}' object is not subscriptable",
                self.type_name(obj)
            ))),
        }
    }

    fn is_callable(&self, obj: &ObjectRef) -> bool {
        matches!(value(obj), Some(HostValue::Function(_)))
    }

    fn call(&self, callable: &ObjectRef, args: &[ObjectRef]) -> HostResult<ObjectRef> {
        match value(callable) {
            Some(HostValue::Function(func)) => func.invoke(args),
            _ => Err(HostError::type_error(format!(
                "'{}' object is not callable",
                self.type_name(callable)
            ))),
        }
    }

    fn exception_matches(&self, raised: &ObjectRef, kind: &ObjectRef) -> bool {
        let mut current = Some(raised.clone());
        while let Some(ty) = current {
            if ObjectRef::ptr_eq(&ty, kind) {
                return true;
            }
            current = match value(&ty) {
                Some(HostValue::Type { base: Some(base), .. }) => Some(self.constant(*base)),
                _ => None,
            };
        }
        false
    }

    fn exception_name(&self, kind: &ObjectRef) -> HostResult<String> {
        let base = self.constant(Constant::BaseException);
        match value(kind) {
            Some(HostValue::Type { constant, .. }) if self.exception_matches(kind, &base) => {
                Ok(constant.name().to_string())
            }
            _ => Err(HostError::type_error("exceptions must derive from BaseException")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_singletons() {
        let host = SimpleHost::new();
        let a = host.constant(Constant::None);
        let b = host.constant(Constant::None);
        assert!(ObjectRef::ptr_eq(&a, &b));
        assert_eq!(host.repr(&host.constant(Constant::TypeError)).unwrap(), "<class 'TypeError'>");
    }

    #[test]
    fn test_add() {
        let host = SimpleHost::new();
        let r = host.add(&host.int_from_i64(2), &host.int_from_i64(3)).unwrap();
        assert_eq!(host.int_as_i64(&r).unwrap(), 5);

        let s = host.add(&host.str_from("ab"), &host.str_from("c")).unwrap();
        assert_eq!(host.str_as_string(&s).unwrap(), "abc");

        let err = host.add(&host.int_from_i64(1), &host.str_from("x")).unwrap_err();
        assert_eq!(err.kind, Constant::TypeError);

        let err = host.add(&host.int_from_i64(i64::MAX), &host.int_from_i64(1)).unwrap_err();
        assert_eq!(err.kind, Constant::OverflowError);
    }

    #[test]
    fn test_repr() {
        let host = SimpleHost::new();
        let list = host.list_new();
        host.list_append(&list, host.int_from_i64(1)).unwrap();
        host.list_append(&list, host.str_from("a")).unwrap();
        host.list_append(&list, host.float_from_f64(2.0)).unwrap();
        host.list_append(&list, host.constant(Constant::None)).unwrap();
        assert_eq!(host.repr(&list).unwrap(), "[1, 'a', 2.0, None]");
    }

    #[test]
    fn test_exception_hierarchy() {
        let host = SimpleHost::new();
        let type_error = host.constant(Constant::TypeError);
        let exception = host.constant(Constant::Exception);
        let value_error = host.constant(Constant::ValueError);
        assert!(host.exception_matches(&type_error, &exception));
        assert!(host.exception_matches(&type_error, &type_error));
        assert!(!host.exception_matches(&type_error, &value_error));
        assert!(!host.exception_matches(&exception, &type_error));

        assert_eq!(host.exception_name(&type_error).unwrap(), "TypeError");
        assert!(host.exception_name(&host.constant(Constant::LongType)).is_err());
        assert!(host.exception_name(&host.int_from_i64(3)).is_err());
    }

    #[test]
    fn test_call() {
        let host = SimpleHost::new();
        let f = HostValue::function("first", |args| Ok(args[0].clone()));
        assert!(host.is_callable(&f));
        let arg = host.int_from_i64(9);
        let r = host.call(&f, &[arg.clone()]).unwrap();
        assert!(ObjectRef::ptr_eq(&r, &arg));

        let err = host.call(&arg, &[]).unwrap_err();
        assert_eq!(err.message, "'int' object is not callable");
    }

    #[test]
    fn test_get_item_and_length() {
        let host = SimpleHost::new();
        let list = HostValue::list(vec![host.int_from_i64(4)]);
        assert_eq!(host.length(&list).unwrap(), 1);
        assert_eq!(host.int_as_i64(&host.get_item(&list, 0).unwrap()).unwrap(), 4);
        assert_eq!(host.get_item(&list, 1).unwrap_err().kind, Constant::IndexError);
        assert_eq!(host.length(&host.int_from_i64(1)).unwrap_err().kind, Constant::TypeError);
    }
}
