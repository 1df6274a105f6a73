//! Typed input schemas and coercion of raw caller values into canonical circuit inputs.
//!
//! A schema lists the circuit's input fields in caller-facing order, each with a
//! [`FieldKind`]. [`coerce`] checks raw values against that schema and produces the
//! exact scalar strings the witness generator consumes.
//!
//! Boolean fields use an enumerated parse: `"true"`/`"1"` and `"false"`/`"0"`/`""`.
//! Plain truthiness would read the text `"false"` as true, so any other text is a
//! [`CoercionError::TypeMismatch`].

use std::{
    collections::{btree_map, BTreeMap},
    fmt,
    str::FromStr,
};

use num_bigint::BigInt;
use serde::{
    de::{MapAccess, Visitor},
    ser::{SerializeMap, Serializer},
    Deserialize, Deserializer, Serialize,
};
use serde_json::{Number, Value};
use tracing::debug;

use crate::{
    errors::{CoercionError, SchemaError},
    utils::parse_integer_literal,
};

/// Largest magnitude a JSON float can carry while still naming one exact integer.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Number,
    Text,
    Boolean,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Number => "number",
            FieldKind::Text => "text",
            FieldKind::Boolean => "boolean",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(FieldKind::Number),
            "text" => Ok(FieldKind::Text),
            "boolean" => Ok(FieldKind::Boolean),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub kind: FieldKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
}

impl FieldSpec {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            display_label: None,
            help_text: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.display_label = Some(label.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help_text = Some(help.into());
        self
    }
}

/// Field definition as published by circuit owners. Both the current key names
/// and the older `type`/`label`/`description` spelling are accepted.
#[derive(Debug, Deserialize)]
struct FieldDefinition {
    #[serde(alias = "type")]
    kind: String,
    #[serde(default, rename = "displayLabel", alias = "label")]
    display_label: Option<String>,
    #[serde(default, rename = "helpText", alias = "description")]
    help_text: Option<String>,
}

/// Ordered field name → [`FieldSpec`] mapping. Each name appears once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSchema {
    fields: Vec<(String, FieldSpec)>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`InputSchema::insert`].
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        spec: FieldSpec,
    ) -> Result<Self, SchemaError> {
        self.insert(name, spec)?;
        Ok(self)
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: FieldSpec) -> Result<(), SchemaError> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(SchemaError::DuplicateField(name));
        }
        self.fields.push((name, spec));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse schema text as published by circuit owners. A field name that
    /// appears twice is a [`SchemaError::DuplicateField`].
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let entries: SchemaEntries =
            serde_json::from_str(json).map_err(|err| SchemaError::Malformed(err.to_string()))?;
        Self::from_entries(entries.0)
    }

    /// Build a schema from an already parsed JSON object. The object has merged
    /// repeated keys by now, so prefer [`InputSchema::from_json_str`] for text.
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        let object = value
            .as_object()
            .ok_or_else(|| SchemaError::Malformed("expected an object".into()))?;
        Self::from_entries(
            object
                .iter()
                .map(|(name, definition)| (name.clone(), definition.clone())),
        )
    }

    fn from_entries(
        entries: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Self, SchemaError> {
        let mut schema = InputSchema::new();
        for (name, definition) in entries {
            let definition: FieldDefinition = serde_json::from_value(definition)
                .map_err(|err| SchemaError::Malformed(format!("field `{name}`: {err}")))?;
            let kind = match definition.kind.parse::<FieldKind>() {
                Ok(kind) => kind,
                Err(kind) => return Err(SchemaError::UnknownKind { field: name, kind }),
            };
            schema.insert(
                name,
                FieldSpec {
                    kind,
                    display_label: definition.display_label,
                    help_text: definition.help_text,
                },
            )?;
        }
        Ok(schema)
    }
}

/// Every key of a schema object in document order, repeats included.
struct SchemaEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for SchemaEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = SchemaEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of field definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<SchemaEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, definition)) = map.next_entry::<String, Value>()? {
                    entries.push((name, definition));
                }
                Ok(SchemaEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl Serialize for InputSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, spec) in &self.fields {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

/// A caller-supplied value before coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Boolean(bool),
    Number(Number),
    Text(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Boolean(value) => write!(f, "{value}"),
            RawValue::Number(value) => write!(f, "{value}"),
            RawValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Boolean(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Number(value.into())
    }
}

impl From<u64> for RawValue {
    fn from(value: u64) -> Self {
        RawValue::Number(value.into())
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

pub type RawInputs = BTreeMap<String, RawValue>;

/// Field name → scalar string, exactly the fields of the schema it was coerced against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalInputs(BTreeMap<String, String>);

impl CanonicalInputs {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CanonicalInputs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        )
    }
}

/// Check `raw` against `schema` and produce canonical inputs.
///
/// Fails on the first field (in schema order) that is missing or does not match
/// its kind. Raw entries the schema does not declare are dropped.
pub fn coerce(schema: &InputSchema, raw: &RawInputs) -> Result<CanonicalInputs, CoercionError> {
    let mut canonical = BTreeMap::new();

    for (field, spec) in schema.iter() {
        let value = raw.get(field).ok_or_else(|| CoercionError::MissingField {
            field: field.to_string(),
        })?;
        let coerced = coerce_field(field, spec.kind, value)?;
        canonical.insert(field.to_string(), coerced);
    }

    for extra in raw.keys().filter(|name| schema.get(name).is_none()) {
        debug!(field = %extra, "dropping input not declared by the schema");
    }

    Ok(CanonicalInputs(canonical))
}

fn coerce_field(field: &str, kind: FieldKind, value: &RawValue) -> Result<String, CoercionError> {
    let coerced = match kind {
        FieldKind::Number => coerce_number(value).map(|n| n.to_string()),
        FieldKind::Boolean => coerce_boolean(value).map(|b| if b { "1" } else { "0" }.to_string()),
        FieldKind::Text => Some(value.to_string()),
    };

    coerced.ok_or_else(|| CoercionError::TypeMismatch {
        field: field.to_string(),
        expected: kind,
        found: value.to_string(),
    })
}

fn coerce_number(value: &RawValue) -> Option<BigInt> {
    match value {
        RawValue::Text(text) if text.trim().is_empty() => Some(BigInt::from(0)),
        RawValue::Text(text) => parse_integer_literal(text),
        RawValue::Number(number) => integral_number(number),
        RawValue::Boolean(flag) => Some(BigInt::from(u8::from(*flag))),
    }
}

fn integral_number(number: &Number) -> Option<BigInt> {
    if let Some(value) = number.as_i64() {
        return Some(BigInt::from(value));
    }
    if let Some(value) = number.as_u64() {
        return Some(BigInt::from(value));
    }
    let value = number.as_f64()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_FLOAT {
        Some(BigInt::from(value as i64))
    } else {
        None
    }
}

fn coerce_boolean(value: &RawValue) -> Option<bool> {
    match value {
        RawValue::Boolean(flag) => Some(*flag),
        RawValue::Number(number) => number.as_f64().map(|n| n != 0.0),
        RawValue::Text(text) => match text.as_str() {
            "" | "false" | "0" => Some(false),
            "true" | "1" => Some(true),
            _ => None,
        },
    }
}
