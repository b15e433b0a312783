use std::fmt;

use crate::error::{Error, Result};
use crate::resolve::ResolvedValues;
use crate::sources::canonical_key;
use crate::value::{ConfigValue, RawValue};

/// Declared type of a configuration field. Conversion dispatches on this tag.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Str,
    Enum(EnumSpec),
    List,
    Pairs,
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Str => "string",
            FieldKind::Enum(_) => "enum",
            FieldKind::List => "list",
            FieldKind::Pairs => "pairs",
        }
    }

    /// Whether a converted value satisfies this declared kind.
    pub(crate) fn admits(&self, value: &ConfigValue) -> bool {
        match (self, value) {
            (FieldKind::Bool, ConfigValue::Bool(_)) => true,
            (FieldKind::Int, ConfigValue::Int(_)) => true,
            (FieldKind::Float, ConfigValue::Float(_)) => true,
            (FieldKind::Str, ConfigValue::Str(_)) => true,
            (FieldKind::Enum(spec), ConfigValue::Enum { name, .. }) => spec.name == *name,
            (FieldKind::List, ConfigValue::List(_)) => true,
            (FieldKind::Pairs, ConfigValue::Pairs(_)) => true,
            _ => false,
        }
    }
}

/// A declared enum type: its name and ordered variants.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumSpec {
    name: String,
    variants: Vec<EnumVariant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariant {
    pub name: String,
    pub value: RawValue,
}

impl EnumSpec {
    pub fn new(name: &str, variants: Vec<(&str, RawValue)>) -> Self {
        Self {
            name: name.to_owned(),
            variants: variants
                .into_iter()
                .map(|(name, value)| EnumVariant {
                    name: name.to_owned(),
                    value,
                })
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variants(&self) -> &[EnumVariant] {
        &self.variants
    }

    pub fn variant_names(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.name.clone()).collect()
    }
}

/// Turns a raw source value into a typed one. `CsvList` and `CsvPairs` are
/// the library-provided parsers; `Custom` is any caller-supplied function.
#[derive(Debug, Clone, PartialEq)]
pub enum Converter {
    CsvList,
    CsvPairs,
    Custom(fn(&RawValue) -> Result<ConfigValue>),
}

/// Accepts or rejects a converted value.
#[derive(Debug, Clone, PartialEq)]
pub enum Validator {
    Predicate(fn(&ConfigValue) -> bool),
    OneOf(Vec<ConfigValue>),
    /// Half-open integer range, `start..end`.
    Range { start: i64, end: i64 },
}

impl Validator {
    /// Applies the rule to a converted value.
    ///
    /// A rejected value fails with `FailedValidation`; a rule that cannot
    /// apply to the value's type at all (a range against a string, say) is a
    /// distinct `BadValidator` failure.
    pub fn check(&self, field: &str, value: &ConfigValue) -> Result<()> {
        let passed = match self {
            Validator::Predicate(predicate) => predicate(value),
            Validator::OneOf(allowed) => allowed.contains(value),
            Validator::Range { start, end } => {
                let as_int = match value {
                    ConfigValue::Int(value) => Some(*value),
                    ConfigValue::Bool(value) => Some(i64::from(*value)),
                    // An integral float is a member when its integer part is;
                    // a fractional one is simply not in the range.
                    ConfigValue::Float(value) if value.fract() == 0.0 => Some(*value as i64),
                    ConfigValue::Float(_) => None,
                    _ => {
                        return Err(Error::BadValidator {
                            field: field.to_owned(),
                            reason: format!(
                                "range validator cannot apply to a {} value",
                                value.type_name()
                            ),
                        })
                    }
                };
                as_int.is_some_and(|value| (*start..*end).contains(&value))
            }
        };

        if passed {
            Ok(())
        } else {
            Err(Error::FailedValidation(field.to_owned()))
        }
    }
}

/// One declared configuration field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    default: Option<ConfigValue>,
    default_factory: Option<fn() -> ConfigValue>,
    converter: Option<Converter>,
    validator: Option<Validator>,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            default: None,
            default_factory: None,
            converter: None,
            validator: None,
        }
    }

    pub fn with_default(mut self, default: ConfigValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_default_factory(mut self, factory: fn() -> ConfigValue) -> Self {
        self.default_factory = Some(factory);
        self
    }

    pub fn with_converter(mut self, converter: Converter) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn converter(&self) -> Option<&Converter> {
        self.converter.as_ref()
    }

    pub fn validator(&self) -> Option<&Validator> {
        self.validator.as_ref()
    }

    /// The field's declared fallback, if any.
    pub fn default_value(&self) -> Option<ConfigValue> {
        if let Some(default) = &self.default {
            return Some(default.clone());
        }
        self.default_factory.map(|factory| factory())
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && self.default_factory.is_none()
    }
}

/// The declared set of fields for one configuration type.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn builder(name: &str) -> SchemaBuilder {
        SchemaBuilder {
            name: name.to_owned(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Enum types referenced by this schema's fields.
    pub fn enum_specs(&self) -> Vec<&EnumSpec> {
        self.fields
            .iter()
            .filter_map(|field| match field.kind() {
                FieldKind::Enum(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} fields)", self.name, self.fields.len())
    }
}

pub struct SchemaBuilder {
    name: String,
    fields: Vec<FieldSpec>,
}

impl SchemaBuilder {
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<Schema> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            let name = field.name().trim();
            if name.is_empty() {
                return Err(Error::Schema(format!(
                    "schema '{}' declares a field with an empty name",
                    self.name
                )));
            }

            if !seen.insert(canonical_key(name)) {
                return Err(Error::Schema(format!(
                    "schema '{}' declares duplicate field '{name}'",
                    self.name
                )));
            }

            if field.default.is_some() && field.default_factory.is_some() {
                return Err(Error::Schema(format!(
                    "field '{name}' cannot specify both default and default_factory"
                )));
            }

            if let Some(default) = &field.default {
                if !field.kind.admits(default) {
                    return Err(Error::Schema(format!(
                        "field '{name}' declares a {} default for a {} field",
                        default.type_name(),
                        field.kind.type_name()
                    )));
                }
            }
        }

        Ok(Schema {
            name: self.name,
            fields: self.fields,
        })
    }
}

/// A type whose values are materialized from configuration sources.
///
/// Implementations declare their fields once via [`schema`](Self::schema) and
/// build themselves from the resolved mapping in
/// [`from_values`](Self::from_values); defaults declared on the schema are
/// already applied by the time `from_values` runs.
pub trait ConfigClass: Sized + Send + Sync + 'static {
    fn schema() -> Result<Schema>;

    fn from_values(values: &ResolvedValues) -> Result<Self>;
}
