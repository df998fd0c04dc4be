//! Runtime values posted into waits
//!
//! Items flowing through a fiber are a tagged union so the whole stack
//! stays serializable. Values the native encoder cannot carry (host
//! objects, shared documents) ride in the `Opaque` variant and are
//! persisted through the surrogate registry.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A host value carried opaquely through a fiber.
///
/// Opaque values declare a list of type tags, most specific first; a wait
/// expecting any tag in the list accepts the value. Persistence goes
/// through a surrogate provider that recognizes the concrete type.
pub trait OpaqueValue: fmt::Debug + 'static {
    fn as_any(&self) -> &dyn Any;

    /// Type tags, most specific first.
    fn type_tags(&self) -> &[&'static str];
}

/// Runtime value type.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Obj(HashMap<String, Value>),
    /// A host value persisted via the surrogate registry.
    Opaque(Arc<dyn OpaqueValue>),
}

/// Discriminant of a [`Value`], used for type expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Num,
    Str,
    List,
    Obj,
    Opaque,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Num => "num",
            ValueKind::Str => "str",
            ValueKind::List => "list",
            ValueKind::Obj => "obj",
            ValueKind::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

/// What a continuation declares about the item it waits for.
///
/// `post` tries a static kind match first, then type-tag dispatch for
/// opaque values; anything else is an invalid-type failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeExpect {
    /// Accept any posted value.
    Any,
    /// Accept values of one kind.
    Kind(ValueKind),
    /// Accept an opaque value carrying this type tag.
    Tag(String),
}

impl TypeExpect {
    pub fn tag(tag: impl Into<String>) -> Self {
        TypeExpect::Tag(tag.into())
    }

    /// Whether `value` satisfies this expectation.
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            TypeExpect::Any => true,
            TypeExpect::Kind(kind) => value.kind() == *kind,
            TypeExpect::Tag(tag) => match value {
                Value::Opaque(inner) => inner.type_tags().iter().any(|t| t == tag),
                _ => false,
            },
        }
    }
}

impl fmt::Display for TypeExpect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpect::Any => f.write_str("any"),
            TypeExpect::Kind(kind) => write!(f, "{kind}"),
            TypeExpect::Tag(tag) => write!(f, "tag '{tag}'"),
        }
    }
}

impl Value {
    pub fn opaque(value: impl OpaqueValue) -> Self {
        Value::Opaque(Arc::new(value))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Num(_) => ValueKind::Num,
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
            Value::Obj(_) => ValueKind::Obj,
            Value::Opaque(_) => ValueKind::Opaque,
        }
    }

    /// Short description for diagnostics: the kind, plus tags for opaques.
    pub fn describe(&self) -> String {
        match self {
            Value::Opaque(inner) => format!("opaque[{}]", inner.type_tags().join(",")),
            other => other.kind().to_string(),
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the concrete type behind an `Opaque` value.
    pub fn downcast_opaque<T: OpaqueValue>(&self) -> Option<&T> {
        match self {
            Value::Opaque(inner) => inner.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a == b,
            // opaque values compare by identity
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Num(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Num(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Num(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Self {
        Value::Obj(v)
    }
}

/// A JSON document carried as an opaque value.
///
/// Persisted as compact JSON text by its dedicated surrogate provider.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonBlob(pub serde_json::Value);

impl JsonBlob {
    pub const TAG: &'static str = "json";
}

impl OpaqueValue for JsonBlob {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_tags(&self) -> &[&'static str] {
        &[Self::TAG]
    }
}

impl From<JsonBlob> for Value {
    fn from(blob: JsonBlob) -> Self {
        Value::opaque(blob)
    }
}
