use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::field::{Field, FieldRegistry, FieldValue};
use crate::protocol::BdiLogLevel;

/// A named, ordered description of the fields a conforming [`Message`]
/// must carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub type_name: String,
    /// Value assigned on instantiation; the registry's type default is
    /// used when absent.
    pub default: Option<FieldValue>,
}

impl MessageSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            type_name: type_name.into(),
            default: None,
        });
        self
    }

    pub fn with_field_value(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        self.fields.push(FieldSpec {
            name: name.into(),
            type_name: value.type_name(),
            default: Some(value),
        });
        self
    }

    /// Instantiate a message conforming to this schema, fields set to their
    /// declared defaults or the registered type defaults.
    pub fn instantiate(&self) -> Result<Message> {
        let registry = FieldRegistry::global();
        let mut fields = Vec::with_capacity(self.fields.len());
        for spec in &self.fields {
            let field = match &spec.default {
                Some(value) => Field {
                    name: spec.name.clone(),
                    type_name: spec.type_name.clone(),
                    value: value.clone(),
                },
                None => registry.create_field(&spec.name, &spec.type_name)?,
            };
            fields.push(field);
        }
        Ok(Message {
            schema: self.name.clone(),
            fields,
            reasoning_level: None,
            reasoning: None,
        })
    }

    /// Check that a message conforms to this schema: same schema name and
    /// exactly this field set by name and type.
    pub fn verify(&self, message: &Message) -> Result<()> {
        if message.schema != self.name {
            return Err(CoreError::SchemaMismatch {
                schema: self.name.clone(),
                reason: format!("message carries schema '{}'", message.schema),
            });
        }
        if message.fields.len() != self.fields.len() {
            return Err(CoreError::SchemaMismatch {
                schema: self.name.clone(),
                reason: format!(
                    "expected {} field(s), message has {}",
                    self.fields.len(),
                    message.fields.len()
                ),
            });
        }
        for spec in &self.fields {
            let Some(field) = message.fields.iter().find(|f| f.name == spec.name) else {
                return Err(CoreError::SchemaMismatch {
                    schema: self.name.clone(),
                    reason: format!("missing field '{}'", spec.name),
                });
            };
            if field.type_name != spec.type_name {
                return Err(CoreError::SchemaMismatch {
                    schema: self.name.clone(),
                    reason: format!(
                        "field '{}' is {}, expected {}",
                        spec.name, field.type_name, spec.type_name
                    ),
                });
            }
        }
        Ok(())
    }

    /// Structural check for message queries: same field names and types,
    /// ignoring the schema name.
    pub fn verify_structure(&self, message: &Message) -> bool {
        message.fields.len() == self.fields.len()
            && self.fields.iter().all(|spec| {
                message
                    .fields
                    .iter()
                    .any(|f| f.name == spec.name && f.type_name == spec.type_name)
            })
    }
}

/// A typed record conforming to a committed [`MessageSchema`]. Beliefs,
/// goal parameters and action request/reply payloads are all messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    schema: String,
    fields: Vec<Field>,
    /// Optional annotation reported with action completions on the bus.
    pub reasoning_level: Option<BdiLogLevel>,
    pub reasoning: Option<String>,
}

impl Message {
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn valid(&self) -> bool {
        !self.schema.is_empty()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Set a field by name. The value's type must match the field's
    /// declared type; mismatches and unknown names are errors the caller
    /// may log and ignore.
    pub fn set_field(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        let value = value.into();
        let field = self
            .fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| CoreError::FieldNotFound(name.to_string()))?;
        if !value.matches_type(&field.type_name) {
            return Err(CoreError::FieldTypeMismatch {
                field: name.to_string(),
                expected: field.type_name.clone(),
                got: value.type_name(),
            });
        }
        field.value = value;
        Ok(())
    }

    /// Copy every same-named, same-typed field of `other` into this
    /// message.
    pub fn merge_from(&mut self, other: &Message) {
        for field in &other.fields {
            if let Some(own) = self
                .fields
                .iter_mut()
                .find(|f| f.name == field.name && f.type_name == field.type_name)
            {
                own.value = field.value.clone();
            }
        }
    }

    pub fn with_reasoning(mut self, level: BdiLogLevel, text: impl Into<String>) -> Self {
        self.reasoning_level = Some(level);
        self.reasoning = Some(text.into());
        self
    }
}

/// Messages compare by schema and field contents; reasoning annotations
/// are transport metadata and excluded.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.fields == other.fields
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.schema)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> MessageSchema {
        MessageSchema::new("Vehicle")
            .with_field_value("tasksCompleted", 0i32)
            .with_field("label", "String")
    }

    #[test]
    fn test_instantiate_uses_defaults() {
        let msg = schema().instantiate().unwrap();
        assert_eq!(msg.get_field("tasksCompleted"), Some(&FieldValue::I32(0)));
        assert_eq!(
            msg.get_field("label"),
            Some(&FieldValue::String(String::new()))
        );
    }

    #[test]
    fn test_set_field_type_checked() {
        let mut msg = schema().instantiate().unwrap();
        msg.set_field("tasksCompleted", 3i32).unwrap();
        assert_eq!(msg.get_field("tasksCompleted"), Some(&FieldValue::I32(3)));

        let err = msg.set_field("tasksCompleted", "nope");
        assert!(matches!(err, Err(CoreError::FieldTypeMismatch { .. })));

        let err = msg.set_field("missing", 1i32);
        assert!(matches!(err, Err(CoreError::FieldNotFound(_))));
    }

    #[test]
    fn test_verify_exact_field_set() {
        let s = schema();
        let msg = s.instantiate().unwrap();
        assert!(s.verify(&msg).is_ok());

        let other = MessageSchema::new("Vehicle")
            .with_field("tasksCompleted", "I64")
            .with_field("label", "String")
            .instantiate()
            .unwrap();
        assert!(s.verify(&other).is_err());
    }

    #[test]
    fn test_clone_equality() {
        let mut msg = schema().instantiate().unwrap();
        msg.set_field("label", "alpha").unwrap();
        let copy = msg.clone();
        assert_eq!(msg, copy);
    }
}
