//! Runtime value representation
//!
//! Values are a tagged enum; strings are interned `Rc<str>` materialized
//! from the constant table on demand, objects carry a dispatch view class
//! alongside the instance so SUPER and receiver shifting only touch the
//! stack slot.

use std::fmt;
use std::rc::Rc;

use koala_types::TypeDesc;

use crate::object::{ClassRef, InstanceRef, ModuleRef};

/// A runtime value
#[derive(Clone)]
pub enum Value {
    /// Nil
    Nil,
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Interned string
    Str(Rc<str>),
    /// A loaded module
    Module(ModuleRef),
    /// An instance plus the class the next dispatch starts from
    Object {
        /// The instance
        obj: InstanceRef,
        /// Dispatch view; normally the instance's own class
        view: ClassRef,
    },
}

impl Value {
    /// Short type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Module(_) => "module",
            Value::Object { .. } => "object",
        }
    }

    /// Whether this value can inhabit a slot of declared type `desc`
    ///
    /// Nil inhabits anything; `any` accepts everything; objects match by
    /// class name along the dispatch chain.
    pub fn matches(&self, desc: &TypeDesc) -> bool {
        if desc.is_any() {
            return true;
        }
        match (self, desc) {
            (Value::Nil, _) => true,
            (Value::Int(_), d) => d.check(&TypeDesc::int()),
            (Value::Float(_), d) => d.check(&TypeDesc::float()),
            (Value::Bool(_), d) => d.check(&TypeDesc::bool()),
            (Value::Str(_), d) => d.check(&TypeDesc::string()),
            (Value::Object { view, .. }, TypeDesc::UserDef { name, dims: 0, .. }) => {
                let mut cur = Some(view.clone());
                while let Some(class) = cur {
                    if class.name == *name {
                        return true;
                    }
                    cur = class.super_.clone();
                }
                false
            }
            _ => false,
        }
    }

    /// Structural equality used by EQ/NEQ
    pub fn eq_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object { obj: a, .. }, Value::Object { obj: b, .. }) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Module(m) => write!(f, "<module {}>", m.borrow().name),
            Value::Object { view, .. } => write!(f, "<{} instance>", view.name),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_matching() {
        assert!(Value::Int(1).matches(&TypeDesc::int()));
        assert!(!Value::Int(1).matches(&TypeDesc::float()));
        assert!(Value::Nil.matches(&TypeDesc::string()));
        assert!(Value::Str("x".into()).matches(&TypeDesc::any()));
    }

    #[test]
    fn test_equality() {
        assert!(Value::Int(3).eq_value(&Value::Int(3)));
        assert!(!Value::Int(3).eq_value(&Value::Float(3.0)));
        assert!(Value::Str("a".into()).eq_value(&Value::Str("a".into())));
        assert!(Value::Nil.eq_value(&Value::Nil));
    }
}
