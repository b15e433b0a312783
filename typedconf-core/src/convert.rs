//! Conversion from raw source values to typed configuration values.
//!
//! `convert_field` is the single dispatch point used by the resolution
//! engine; `to_bool`, `csv_list`, `csv_pairs` and `quote_stripped` are also
//! useful on their own, the latter two typically as field converters.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::schema::{Converter, EnumSpec, FieldKind, FieldSpec, Schema};
use crate::value::{ConfigValue, RawValue};

/// Strips one layer of matching single or double quotes.
pub fn quote_stripped(value: &str) -> &str {
    let stripped = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\''));
    let stripped = stripped.or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')));
    stripped.unwrap_or(value)
}

/// Converts a raw value to a bool.
///
/// Accepts bool passthrough, the strings `TRUE`/`FALSE`/`1`/`0` in any case,
/// and the numbers 0 and 1. Any other string or number is an invalid value;
/// any other shape of raw value is a type mismatch.
pub fn to_bool(raw: &RawValue) -> Result<bool> {
    match raw {
        RawValue::Bool(value) => Ok(*value),
        RawValue::Str(value) => match value.to_uppercase().as_str() {
            "TRUE" | "1" => Ok(true),
            "FALSE" | "0" => Ok(false),
            _ => Err(Error::InvalidValue(format!(
                "'{value}' is not a valid boolean value"
            ))),
        },
        RawValue::Int(value) => match value {
            1 => Ok(true),
            0 => Ok(false),
            _ => Err(Error::InvalidValue(format!(
                "{value} is not a valid boolean value"
            ))),
        },
        RawValue::Float(value) => {
            if *value == 1.0 {
                Ok(true)
            } else if *value == 0.0 {
                Ok(false)
            } else {
                Err(Error::InvalidValue(format!(
                    "{value} is not a valid boolean value"
                )))
            }
        }
        RawValue::List(_) => Err(Error::TypeMismatch(
            "a list cannot be converted to a bool".to_owned(),
        )),
    }
}

/// Parses comma-separated values: entries trimmed, one layer of matching
/// quotes stripped, empty entries skipped.
pub fn csv_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| quote_stripped(entry).to_owned())
        .collect()
}

/// Parses comma-separated `key=value` pairs.
///
/// Each side is trimmed and quote-stripped; the split happens on the first
/// `=` only, so values may themselves contain `=`. Empty pairs are skipped; a
/// pair without `=` is an invalid value.
pub fn csv_pairs(value: &str) -> Result<BTreeMap<String, String>> {
    let mut pairs = BTreeMap::new();
    for pair in value.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let Some((key, val)) = pair.split_once('=') else {
            return Err(Error::InvalidValue(format!(
                "malformed key=value pair '{pair}'"
            )));
        };
        pairs.insert(
            quote_stripped(key.trim()).to_owned(),
            quote_stripped(val.trim()).to_owned(),
        );
    }

    Ok(pairs)
}

/// Hashable canonical form of an enum variant value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CanonicalKey {
    Int(i64),
    Str(String),
}

/// Case-insensitive lookup tables from variant names and variant values to
/// the authoritative variant name, per registered enum type.
#[derive(Debug, Default)]
pub struct EnumRegistry {
    name_mappings: HashMap<String, HashMap<String, String>>,
    value_mappings: HashMap<String, HashMap<CanonicalKey, String>>,
}

impl EnumRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry covering every enum type a schema references.
    pub fn from_schema(schema: &Schema) -> Self {
        let mut registry = Self::new();
        for spec in schema.enum_specs() {
            registry.add_enum(spec);
        }
        registry
    }

    /// Registers an enum type. Registering the same type again is harmless.
    pub fn add_enum(&mut self, spec: &EnumSpec) {
        let mut names = HashMap::new();
        let mut values = HashMap::new();
        for variant in spec.variants() {
            names.insert(variant.name.to_uppercase(), variant.name.clone());
            for key in Self::value_keys(&variant.value) {
                values.insert(key, variant.name.clone());
            }
        }

        self.name_mappings.insert(spec.name().to_owned(), names);
        self.value_mappings.insert(spec.name().to_owned(), values);
    }

    /// Both canonical forms of a declared variant value: the value itself
    /// and its upper-cased string rendering.
    fn value_keys(value: &RawValue) -> Vec<CanonicalKey> {
        let mut keys = Vec::new();
        match value {
            RawValue::Int(value) => keys.push(CanonicalKey::Int(*value)),
            RawValue::Str(value) => keys.push(CanonicalKey::Str(value.to_uppercase())),
            RawValue::Bool(value) => keys.push(CanonicalKey::Int(i64::from(*value))),
            RawValue::Float(value) if value.fract() == 0.0 => {
                keys.push(CanonicalKey::Int(*value as i64));
            }
            RawValue::Float(_) | RawValue::List(_) => {}
        }
        keys.push(CanonicalKey::Str(value.to_string().to_uppercase()));
        keys
    }

    fn lookup_key(raw: &RawValue) -> Result<CanonicalKey> {
        match raw {
            RawValue::Str(value) => Ok(CanonicalKey::Str(value.to_uppercase())),
            RawValue::Int(value) => Ok(CanonicalKey::Int(*value)),
            RawValue::Bool(value) => Ok(CanonicalKey::Int(i64::from(*value))),
            RawValue::Float(value) if value.fract() == 0.0 => {
                Ok(CanonicalKey::Int(*value as i64))
            }
            RawValue::Float(value) => Ok(CanonicalKey::Str(value.to_string().to_uppercase())),
            RawValue::List(_) => Err(Error::TypeMismatch(
                "a list cannot name an enum variant".to_owned(),
            )),
        }
    }

    /// Resolves a raw value to a registered enum's variant.
    ///
    /// The variant-name mapping is consulted before the variant-value
    /// mapping, so when a variant's name collides with another variant's
    /// canonicalized value, the name wins.
    pub fn to_enum(&self, enum_name: &str, raw: &RawValue) -> Result<ConfigValue> {
        let (Some(names), Some(values)) = (
            self.name_mappings.get(enum_name),
            self.value_mappings.get(enum_name),
        ) else {
            return Err(Error::InvalidValue(format!(
                "enum type '{enum_name}' is not registered"
            )));
        };

        let key = Self::lookup_key(raw)?;
        let by_name = match &key {
            CanonicalKey::Str(canonical) => names.get(canonical),
            CanonicalKey::Int(_) => None,
        };

        let variant = by_name.or_else(|| values.get(&key)).ok_or_else(|| {
            Error::InvalidValue(format!("'{raw}' is not a member of enum '{enum_name}'"))
        })?;

        Ok(ConfigValue::Enum {
            name: enum_name.to_owned(),
            variant: variant.clone(),
        })
    }
}

/// Converts a raw source value against a field's declaration.
///
/// Dispatch order: enum fields go through the enum registry, bool fields
/// through `to_bool`, fields with a declared converter through it (the
/// output must match the declared kind), everything else through the
/// primitive fallback.
pub fn convert_field(
    field: &FieldSpec,
    raw: &RawValue,
    enums: &EnumRegistry,
) -> Result<ConfigValue> {
    match field.kind() {
        FieldKind::Enum(spec) => enums.to_enum(spec.name(), raw),
        FieldKind::Bool => Ok(ConfigValue::Bool(to_bool(raw)?)),
        kind => {
            if let Some(converter) = field.converter() {
                let value = apply_converter(converter, raw)?;
                if !kind.admits(&value) {
                    return Err(Error::TypeMismatch(format!(
                        "converter produced a {} value for a {} field",
                        value.type_name(),
                        kind.type_name()
                    )));
                }
                return Ok(value);
            }

            primitive_convert(kind, raw)
        }
    }
}

fn apply_converter(converter: &Converter, raw: &RawValue) -> Result<ConfigValue> {
    match converter {
        Converter::CsvList => match raw {
            RawValue::Str(value) => Ok(ConfigValue::List(csv_list(value))),
            other => Err(Error::TypeMismatch(format!(
                "csv_list expects a string, got {}",
                other.type_name()
            ))),
        },
        Converter::CsvPairs => match raw {
            RawValue::Str(value) => Ok(ConfigValue::Pairs(csv_pairs(value)?)),
            other => Err(Error::TypeMismatch(format!(
                "csv_pairs expects a string, got {}",
                other.type_name()
            ))),
        },
        Converter::Custom(convert) => convert(raw),
    }
}

fn primitive_convert(kind: &FieldKind, raw: &RawValue) -> Result<ConfigValue> {
    match kind {
        FieldKind::Int => match raw {
            RawValue::Int(value) => Ok(ConfigValue::Int(*value)),
            RawValue::Bool(value) => Ok(ConfigValue::Int(i64::from(*value))),
            RawValue::Float(value) => Ok(ConfigValue::Int(*value as i64)),
            RawValue::Str(value) => value
                .trim()
                .parse::<i64>()
                .map(ConfigValue::Int)
                .map_err(|_| Error::InvalidValue(format!("'{value}' is not a valid integer"))),
            RawValue::List(_) => Err(Error::TypeMismatch(
                "a list cannot be converted to an integer".to_owned(),
            )),
        },
        FieldKind::Float => match raw {
            RawValue::Float(value) => Ok(ConfigValue::Float(*value)),
            RawValue::Int(value) => Ok(ConfigValue::Float(*value as f64)),
            RawValue::Bool(value) => Ok(ConfigValue::Float(if *value { 1.0 } else { 0.0 })),
            RawValue::Str(value) => value
                .trim()
                .parse::<f64>()
                .map(ConfigValue::Float)
                .map_err(|_| Error::InvalidValue(format!("'{value}' is not a valid float"))),
            RawValue::List(_) => Err(Error::TypeMismatch(
                "a list cannot be converted to a float".to_owned(),
            )),
        },
        FieldKind::Str => match raw {
            RawValue::Str(value) => Ok(ConfigValue::Str(value.clone())),
            RawValue::Bool(_) | RawValue::Int(_) | RawValue::Float(_) => {
                Ok(ConfigValue::Str(raw.to_string()))
            }
            RawValue::List(_) => Err(Error::TypeMismatch(
                "a list cannot be converted to a string".to_owned(),
            )),
        },
        FieldKind::List => match raw {
            RawValue::Str(value) => Ok(ConfigValue::List(csv_list(value))),
            RawValue::List(values) => {
                let mut converted = Vec::with_capacity(values.len());
                for value in values {
                    match value {
                        RawValue::List(_) => {
                            return Err(Error::TypeMismatch(
                                "nested lists are not supported in list fields".to_owned(),
                            ))
                        }
                        scalar => converted.push(scalar.to_string()),
                    }
                }
                Ok(ConfigValue::List(converted))
            }
            other => Err(Error::TypeMismatch(format!(
                "a {} cannot be converted to a list",
                other.type_name()
            ))),
        },
        FieldKind::Pairs => match raw {
            RawValue::Str(value) => Ok(ConfigValue::Pairs(csv_pairs(value)?)),
            other => Err(Error::TypeMismatch(format!(
                "a {} cannot be converted to key=value pairs",
                other.type_name()
            ))),
        },
        // Bool and enum fields never reach the primitive fallback.
        FieldKind::Bool | FieldKind::Enum(_) => Err(Error::TypeMismatch(format!(
            "no primitive conversion for {} fields",
            kind.type_name()
        ))),
    }
}
