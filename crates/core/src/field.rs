use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::message::Message;

/// A dynamically typed field value. This is the closed set of types a
/// message field can carry on the wire; application-defined message types
/// nest through the `Message` variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    V2([f32; 2]),
    String(String),
    Message(Box<Message>),
    /// Homogeneous array of any of the above. The element type is carried
    /// by the owning field's type name, suffixed `[]`.
    Array(Vec<FieldValue>),
}

impl FieldValue {
    /// The wire name of this value's type, e.g. `I32`, `F64[]` or the
    /// schema name for nested messages.
    pub fn type_name(&self) -> String {
        match self {
            FieldValue::I8(_) => "I8".into(),
            FieldValue::I16(_) => "I16".into(),
            FieldValue::I32(_) => "I32".into(),
            FieldValue::I64(_) => "I64".into(),
            FieldValue::U8(_) => "U8".into(),
            FieldValue::U16(_) => "U16".into(),
            FieldValue::U32(_) => "U32".into(),
            FieldValue::U64(_) => "U64".into(),
            FieldValue::F32(_) => "F32".into(),
            FieldValue::F64(_) => "F64".into(),
            FieldValue::Bool(_) => "Bool".into(),
            FieldValue::V2(_) => "V2".into(),
            FieldValue::String(_) => "String".into(),
            FieldValue::Message(m) => {
                if m.schema().is_empty() {
                    "Message".into()
                } else {
                    m.schema().to_string()
                }
            }
            FieldValue::Array(items) => match items.first() {
                Some(first) => format!("{}[]", first.type_name()),
                None => "[]".into(),
            },
        }
    }

    /// Check whether this value is assignable to a field declared with the
    /// given type name. Empty arrays are assignable to any array type.
    pub fn matches_type(&self, type_name: &str) -> bool {
        match self {
            FieldValue::Array(items) => {
                let Some(element) = type_name.strip_suffix("[]") else {
                    return false;
                };
                items.iter().all(|item| item.matches_type(element))
            }
            FieldValue::Message(m) => {
                type_name == "Message" || type_name == m.schema()
            }
            _ => self.type_name() == type_name,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            FieldValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            FieldValue::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            FieldValue::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::I8(v) => write!(f, "{v}"),
            FieldValue::I16(v) => write!(f, "{v}"),
            FieldValue::I32(v) => write!(f, "{v}"),
            FieldValue::I64(v) => write!(f, "{v}"),
            FieldValue::U8(v) => write!(f, "{v}"),
            FieldValue::U16(v) => write!(f, "{v}"),
            FieldValue::U32(v) => write!(f, "{v}"),
            FieldValue::U64(v) => write!(f, "{v}"),
            FieldValue::F32(v) => write!(f, "{v}"),
            FieldValue::F64(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::V2([x, y]) => write!(f, "({x}, {y})"),
            FieldValue::String(v) => write!(f, "{v:?}"),
            FieldValue::Message(m) => write!(f, "{m}"),
            FieldValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Compile-time mapping from Rust types to registered field-type names,
/// used by the template builders.
pub trait FieldKind {
    const TYPE_NAME: &'static str;
}

macro_rules! field_kind {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(impl FieldKind for $ty {
            const TYPE_NAME: &'static str = $name;
        })*
    };
}

field_kind!(
    i8 => "I8", i16 => "I16", i32 => "I32", i64 => "I64",
    u8 => "U8", u16 => "U16", u32 => "U32", u64 => "U64",
    f32 => "F32", f64 => "F64", bool => "Bool",
    [f32; 2] => "V2", String => "String",
);

macro_rules! from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for FieldValue {
            fn from(v: $ty) -> Self {
                FieldValue::$variant(v)
            }
        })*
    };
}

from_primitive!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, bool => Bool,
    String => String,
);

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<[f32; 2]> for FieldValue {
    fn from(v: [f32; 2]) -> Self {
        FieldValue::V2(v)
    }
}

impl From<Message> for FieldValue {
    fn from(v: Message) -> Self {
        FieldValue::Message(Box::new(v))
    }
}

/// A named, typed slot in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub type_name: String,
    pub value: FieldValue,
}

impl Field {
    pub fn valid(&self) -> bool {
        !self.name.is_empty() && !self.type_name.is_empty()
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} = {}", self.name, self.type_name, self.value)
    }
}

type CreateFn = Arc<dyn Fn() -> FieldValue + Send + Sync>;
type ToJsonFn = Arc<dyn Fn(&FieldValue) -> serde_json::Value + Send + Sync>;

/// A factory capable of instantiating one registered field type at runtime.
#[derive(Clone)]
pub struct FieldFactory {
    pub name: String,
    create: CreateFn,
    to_json: Option<ToJsonFn>,
}

impl FieldFactory {
    pub fn create(&self, field_name: &str) -> Field {
        Field {
            name: field_name.to_string(),
            type_name: self.name.clone(),
            value: (self.create)(),
        }
    }

    pub fn to_json(&self, value: &FieldValue) -> serde_json::Value {
        match &self.to_json {
            Some(f) => f(value),
            None => serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Process-wide registry mapping field-type names to factories.
///
/// Built-in primitives and their array forms are registered on first
/// access. Applications register custom message types before committing
/// any template that references them.
pub struct FieldRegistry {
    factories: DashMap<String, FieldFactory>,
}

static GLOBAL_REGISTRY: OnceLock<FieldRegistry> = OnceLock::new();

const BUILTIN_TYPES: &[&str] = &[
    "I8", "I16", "I32", "I64", "U8", "U16", "U32", "U64", "F32", "F64", "Bool", "V2", "String",
    "Message",
];

impl FieldRegistry {
    pub fn global() -> &'static FieldRegistry {
        GLOBAL_REGISTRY.get_or_init(|| {
            let registry = FieldRegistry {
                factories: DashMap::new(),
            };
            registry.register_builtins();
            registry
        })
    }

    fn register_builtins(&self) {
        for ty in BUILTIN_TYPES {
            let default = builtin_default(ty);
            self.register_type(ty, move || default.clone(), None);
            let array_ty = format!("{ty}[]");
            self.register_type(&array_ty, || FieldValue::Array(Vec::new()), None);
        }
    }

    /// Register a custom type. Re-registering a name overwrites the prior
    /// factory.
    pub fn register_type(
        &self,
        name: &str,
        create: impl Fn() -> FieldValue + Send + Sync + 'static,
        to_json: Option<ToJsonFn>,
    ) {
        if self.factories.contains_key(name) {
            tracing::warn!(type_name = %name, "Overwriting pre-existing field factory");
        }
        self.factories.insert(
            name.to_string(),
            FieldFactory {
                name: name.to_string(),
                create: Arc::new(create),
                to_json,
            },
        );
    }

    /// Register a custom message type whose default instance is produced
    /// from the given prototype.
    pub fn register_message_type(&self, name: &str, prototype: Message) {
        self.register_type(name, move || prototype.clone().into(), None);
        let array_name = format!("{name}[]");
        self.register_type(&array_name, || FieldValue::Array(Vec::new()), None);
    }

    pub fn query_type(&self, name: &str) -> Option<FieldFactory> {
        self.factories.get(name).map(|entry| entry.value().clone())
    }

    /// Instantiate a field of the given registered type.
    pub fn create_field(&self, name: &str, type_name: &str) -> Result<Field> {
        match self.query_type(type_name) {
            Some(factory) => Ok(factory.create(name)),
            None => Err(CoreError::UnknownFieldType(type_name.to_string())),
        }
    }
}

fn builtin_default(type_name: &str) -> FieldValue {
    match type_name {
        "I8" => FieldValue::I8(0),
        "I16" => FieldValue::I16(0),
        "I32" => FieldValue::I32(0),
        "I64" => FieldValue::I64(0),
        "U8" => FieldValue::U8(0),
        "U16" => FieldValue::U16(0),
        "U32" => FieldValue::U32(0),
        "U64" => FieldValue::U64(0),
        "F32" => FieldValue::F32(0.0),
        "F64" => FieldValue::F64(0.0),
        "Bool" => FieldValue::Bool(false),
        "V2" => FieldValue::V2([0.0, 0.0]),
        "String" => FieldValue::String(String::new()),
        "Message" => FieldValue::Message(Box::default()),
        other => unreachable!("not a builtin type: {other}"),
    }
}
