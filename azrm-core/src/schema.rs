//! Schema - Define type schemas for resources
//!
//! Every resource type declares a static schema. The schema drives
//! configuration validation, default filling and diffing (computed and
//! force-new attributes).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// Ordered list
    List(Box<AttributeType>),
    /// Unordered collection; order is ignored when diffing
    Set(Box<AttributeType>),
    /// Map with string keys
    Map(Box<AttributeType>),
    /// Nested block with its own attributes
    Block(Vec<AttributeSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { base, validate, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|message| TypeError::ValidationFailed { message })
            }

            (AttributeType::List(inner) | AttributeType::Set(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Block(fields), Value::Map(map)) => {
                for field in fields {
                    if field.required && !map.contains_key(&field.name) {
                        return Err(TypeError::MissingRequired {
                            name: field.name.clone(),
                        });
                    }
                }
                for (k, v) in map {
                    let field = fields
                        .iter()
                        .find(|f| &f.name == k)
                        .ok_or_else(|| TypeError::UnknownAttribute { name: k.clone() })?;
                    field
                        .validate_value(v)
                        .map_err(|e| TypeError::BlockFieldError {
                            field: k.clone(),
                            inner: Box::new(e),
                        })?;
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name().to_string(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Set(inner) => format!("Set<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block(_) => "Block".to_string(),
        }
    }

    /// Compare two values under this type (sets ignore ordering)
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (self, a, b) {
            (AttributeType::Set(_), Value::List(left), Value::List(right)) => {
                if left.len() != right.len() {
                    return false;
                }
                let mut l: Vec<String> = left.iter().map(|v| v.to_json().to_string()).collect();
                let mut r: Vec<String> = right.iter().map(|v| v.to_json().to_string()).collect();
                l.sort();
                r.sort();
                l == r
            }
            (AttributeType::List(inner), Value::List(left), Value::List(right)) => {
                left.len() == right.len()
                    && left
                        .iter()
                        .zip(right.iter())
                        .all(|(x, y)| inner.values_equal(x, y))
            }
            (AttributeType::Block(fields), Value::Map(left), Value::Map(right)) => {
                fields.iter().all(|f| match (left.get(&f.name), right.get(&f.name)) {
                    (Some(x), Some(y)) => f.values_equal(x, y),
                    (None, None) => true,
                    // Unset optional+computed fields take whatever the remote reports,
                    // other unset fields stand for their default
                    (None, Some(y)) => {
                        f.computed || f.default.as_ref().is_some_and(|d| f.values_equal(d, y))
                    }
                    // Secrets are never echoed back
                    (Some(_), None) => f.sensitive,
                })
            }
            _ => a == b,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ComputedOnly { name: String },

    #[error("'{name}' conflicts with '{other}'")]
    Conflict { name: String, other: String },

    #[error("Attribute '{name}' allows at most {max} item(s), got {got}")]
    TooManyItems { name: String, max: usize, got: usize },

    #[error("{0}")]
    Rule(String),

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("Block field '{field}': {inner}")]
    BlockFieldError { field: String, inner: Box<TypeError> },
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// May be set in configuration
    pub optional: bool,
    /// Value may be filled in by the remote API
    pub computed: bool,
    /// Changing the value requires replacing the resource
    pub force_new: bool,
    /// Value is redacted from plan output
    pub sensitive: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub max_items: Option<usize>,
    pub conflicts_with: Vec<String>,
    /// Canonical form used when comparing desired and remote values
    pub normalize: Option<fn(&Value) -> Value>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            optional: true,
            computed: false,
            force_new: false,
            sensitive: false,
            default: None,
            description: None,
            max_items: None,
            conflicts_with: Vec::new(),
            normalize: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = false;
        self
    }

    /// Optional, but the remote API fills it in when unset
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Only ever set by the remote API
    pub fn read_only(mut self) -> Self {
        self.computed = true;
        self.optional = false;
        self.required = false;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn conflicts_with(mut self, names: &[&str]) -> Self {
        self.conflicts_with = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Compare values by `normalize` before comparing them, e.g. for
    /// locations ARM reports in a different spelling than configured
    pub fn normalized_with(mut self, normalize: fn(&Value) -> Value) -> Self {
        self.normalize = Some(normalize);
        self
    }

    /// Compare a desired and a remote value of this attribute
    pub fn values_equal(&self, desired: &Value, remote: &Value) -> bool {
        match self.normalize {
            Some(normalize) => self
                .attr_type
                .values_equal(&normalize(desired), &normalize(remote)),
            None => self.attr_type.values_equal(desired, remote),
        }
    }

    /// Whether the attribute can only be populated remotely
    pub fn is_read_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    fn validate_value(&self, value: &Value) -> Result<(), TypeError> {
        if let (Some(max), Value::List(items)) = (self.max_items, value)
            && items.len() > max
        {
            return Err(TypeError::TooManyItems {
                name: self.name.clone(),
                max,
                got: items.len(),
            });
        }
        self.attr_type.validate(value)
    }
}

/// Default operation timeouts for a resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(30 * 60),
        }
    }
}

/// Cross-attribute rule evaluated after per-attribute validation
pub type SchemaRule = fn(&HashMap<String, Value>) -> Result<(), String>;

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
    pub timeouts: Timeouts,
    pub rules: Vec<SchemaRule>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
            timeouts: Timeouts::default(),
            rules: Vec::new(),
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_rule(mut self, rule: SchemaRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Attribute names in a stable order
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.attributes.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Fill defaults for attributes that were not configured
    pub fn apply_defaults(&self, attributes: &mut HashMap<String, Value>) {
        for (name, schema) in &self.attributes {
            if let Some(default) = &schema.default
                && !attributes.contains_key(name)
            {
                attributes.insert(name.clone(), default.clone());
            }
        }
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        for (name, schema) in &self.attributes {
            if schema.required && !attributes.contains_key(name) && schema.default.is_none() {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
        }

        for (name, value) in attributes {
            let Some(schema) = self.attributes.get(name) else {
                errors.push(TypeError::UnknownAttribute { name: name.clone() });
                continue;
            };
            if schema.is_read_only() {
                errors.push(TypeError::ComputedOnly { name: name.clone() });
                continue;
            }
            if let Err(e) = schema.validate_value(value) {
                errors.push(e);
            }
            for other in &schema.conflicts_with {
                // Report each conflicting pair once
                if attributes.contains_key(other) && name < other {
                    errors.push(TypeError::Conflict {
                        name: name.clone(),
                        other: other.clone(),
                    });
                }
            }
        }

        if errors.is_empty() {
            for rule in &self.rules {
                if let Err(message) = rule(attributes) {
                    errors.push(TypeError::Rule(message));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if *n > 0 => Ok(()),
                Value::Int(_) => Err("Value must be positive".to_string()),
                _ => Err("Expected integer".to_string()),
            },
        }
    }

    /// String that must not be empty
    pub fn non_empty_string() -> AttributeType {
        AttributeType::Custom {
            name: "NonEmptyString".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) if !s.is_empty() => Ok(()),
                _ => Err("expected a non-empty string".to_string()),
            },
        }
    }

    /// Tags map (string values)
    pub fn tags() -> AttributeType {
        AttributeType::Map(Box::new(AttributeType::String))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_block() -> AttributeType {
        AttributeType::Block(vec![
            AttributeSchema::new("email", AttributeType::String),
            AttributeSchema::new("name", AttributeType::String).required(),
        ])
    }

    #[test]
    fn validate_string_type() {
        let t = AttributeType::String;
        assert!(t.validate(&Value::String("hello".to_string())).is_ok());
        assert!(t.validate(&Value::Int(42)).is_err());
    }

    #[test]
    fn validate_enum_type() {
        let t = AttributeType::Enum(vec!["http".to_string(), "soap".to_string()]);
        assert!(t.validate(&Value::String("http".to_string())).is_ok());
        assert!(t.validate(&Value::String("grpc".to_string())).is_err());
    }

    #[test]
    fn validate_positive_int() {
        let t = types::positive_int();
        assert!(t.validate(&Value::Int(1)).is_ok());
        assert!(t.validate(&Value::Int(0)).is_err());
        assert!(t.validate(&Value::Bool(true)).is_err());
    }

    #[test]
    fn validate_block_fields() {
        let t = contact_block();
        let mut ok = HashMap::new();
        ok.insert("name".to_string(), Value::from("Ops"));
        assert!(t.validate(&Value::Map(ok.clone())).is_ok());

        let mut missing = HashMap::new();
        missing.insert("email".to_string(), Value::from("ops@example.com"));
        assert!(matches!(
            t.validate(&Value::Map(missing)),
            Err(TypeError::MissingRequired { .. })
        ));

        ok.insert("phone".to_string(), Value::from("555"));
        assert!(matches!(
            t.validate(&Value::Map(ok)),
            Err(TypeError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn validate_resource_schema() {
        let schema = ResourceSchema::new("resource")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("count", types::positive_int()))
            .attribute(AttributeSchema::new("fqdn", AttributeType::String).read_only());

        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::from("my-resource"));
        attrs.insert("count".to_string(), Value::Int(5));
        assert!(schema.validate(&attrs).is_ok());

        attrs.insert("fqdn".to_string(), Value::from("x.example"));
        let errors = schema.validate(&attrs).unwrap_err();
        assert!(matches!(errors[0], TypeError::ComputedOnly { .. }));
    }

    #[test]
    fn missing_required_attribute() {
        let schema = ResourceSchema::new("zone")
            .attribute(AttributeSchema::new("name", AttributeType::String).required());
        assert!(schema.validate(&HashMap::new()).is_err());
    }

    #[test]
    fn conflicting_attributes() {
        let schema = ResourceSchema::new("api")
            .attribute(
                AttributeSchema::new("oauth2", AttributeType::List(Box::new(contact_block())))
                    .conflicts_with(&["openid"]),
            )
            .attribute(
                AttributeSchema::new("openid", AttributeType::List(Box::new(contact_block())))
                    .conflicts_with(&["oauth2"]),
            );

        let block = || {
            let mut m = HashMap::new();
            m.insert("name".to_string(), Value::from("x"));
            Value::List(vec![Value::Map(m)])
        };
        let mut attrs = HashMap::new();
        attrs.insert("oauth2".to_string(), block());
        attrs.insert("openid".to_string(), block());

        let errors = schema.validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], TypeError::Conflict { .. }));
    }

    #[test]
    fn max_items_enforced() {
        let schema = ResourceSchema::new("api").attribute(
            AttributeSchema::new("license", AttributeType::List(Box::new(contact_block())))
                .max_items(1),
        );
        let mut m = HashMap::new();
        m.insert("name".to_string(), Value::from("MIT"));
        let mut attrs = HashMap::new();
        attrs.insert(
            "license".to_string(),
            Value::List(vec![Value::Map(m.clone()), Value::Map(m)]),
        );
        let errors = schema.validate(&attrs).unwrap_err();
        assert!(matches!(errors[0], TypeError::TooManyItems { max: 1, got: 2, .. }));
    }

    #[test]
    fn rules_run_after_attribute_checks() {
        let schema = ResourceSchema::new("api")
            .attribute(AttributeSchema::new("version", AttributeType::String))
            .attribute(AttributeSchema::new("version_set_id", AttributeType::String))
            .with_rule(|attrs| {
                if attrs.contains_key("version") && !attrs.contains_key("version_set_id") {
                    Err("setting `version` without the required `version_set_id`".to_string())
                } else {
                    Ok(())
                }
            });

        let mut attrs = HashMap::new();
        attrs.insert("version".to_string(), Value::from("v1"));
        let errors = schema.validate(&attrs).unwrap_err();
        assert!(errors[0].to_string().contains("version_set_id"));

        attrs.insert("version_set_id".to_string(), Value::from("/x"));
        assert!(schema.validate(&attrs).is_ok());
    }

    #[test]
    fn apply_defaults_fills_unset() {
        let schema = ResourceSchema::new("api").attribute(
            AttributeSchema::new("subscription_required", AttributeType::Bool).with_default(true),
        );
        let mut attrs = HashMap::new();
        schema.apply_defaults(&mut attrs);
        assert_eq!(attrs.get("subscription_required"), Some(&Value::Bool(true)));
    }

    #[test]
    fn set_equality_ignores_order() {
        let t = AttributeType::Set(Box::new(AttributeType::String));
        let a = Value::List(vec![Value::from("https"), Value::from("http")]);
        let b = Value::List(vec![Value::from("http"), Value::from("https")]);
        assert!(t.values_equal(&a, &b));

        let l = AttributeType::List(Box::new(AttributeType::String));
        assert!(!l.values_equal(&a, &b));
    }

    #[test]
    fn block_ignores_secrets_missing_remotely() {
        let proxy = AttributeType::Block(vec![
            AttributeSchema::new("url", AttributeType::String).required(),
            AttributeSchema::new("password", AttributeType::String).sensitive(),
        ]);
        let desired = Value::Map(HashMap::from([
            ("url".to_string(), Value::from("http://proxy:8080")),
            ("password".to_string(), Value::from("secret")),
        ]));
        let remote = Value::Map(HashMap::from([(
            "url".to_string(),
            Value::from("http://proxy:8080"),
        )]));
        assert!(proxy.values_equal(&desired, &remote));

        let moved = Value::Map(HashMap::from([(
            "url".to_string(),
            Value::from("http://proxy:3128"),
        )]));
        assert!(!proxy.values_equal(&desired, &moved));
    }

    #[test]
    fn normalized_attributes_compare_canonical_forms() {
        let location = AttributeSchema::new("location", AttributeType::String).normalized_with(
            |v| match v {
                Value::String(s) => Value::String(s.replace(' ', "").to_lowercase()),
                other => other.clone(),
            },
        );
        assert!(location.values_equal(&Value::from("West Europe"), &Value::from("westeurope")));
        assert!(!location.values_equal(&Value::from("West Europe"), &Value::from("northeurope")));

        let plain = AttributeSchema::new("location", AttributeType::String);
        assert!(!plain.values_equal(&Value::from("West Europe"), &Value::from("westeurope")));
    }

    #[test]
    fn unset_block_field_compares_as_its_default() {
        let security = AttributeType::Block(vec![
            AttributeSchema::new("tls10_enabled", AttributeType::Bool).with_default(false),
            AttributeSchema::new("tls11_enabled", AttributeType::Bool).with_default(false),
        ]);
        let desired = Value::Map(HashMap::from([(
            "tls10_enabled".to_string(),
            Value::Bool(true),
        )]));
        let reported = |tls11: bool| {
            Value::Map(HashMap::from([
                ("tls10_enabled".to_string(), Value::Bool(true)),
                ("tls11_enabled".to_string(), Value::Bool(tls11)),
            ]))
        };

        assert!(security.values_equal(&desired, &reported(false)));
        assert!(!security.values_equal(&desired, &reported(true)));
    }
}
