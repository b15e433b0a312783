use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::convert::{convert_field, EnumRegistry};
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::sources::{canonical_key, Source};
use crate::value::ConfigValue;

/// The outcome of resolving a schema against its sources: canonical field
/// name to converted, validated value. Fields no source provides are absent
/// until [`with_defaults`](Self::with_defaults) fills them in.
#[derive(Debug, Default)]
pub struct ResolvedValues {
    values: HashMap<String, ConfigValue>,
}

/// Resolves every schema field against the sources.
///
/// Sources are consulted in reverse declaration order, so the last listed
/// source wins when several provide the same field. The first raw value
/// found is converted against the field's declaration and then run through
/// its validator, if any.
pub fn resolve(
    schema: &Schema,
    sources: &[Arc<dyn Source>],
    enums: &EnumRegistry,
) -> Result<ResolvedValues> {
    let mut values = HashMap::new();
    for field in schema.fields() {
        let mut raw = None;
        for source in sources.iter().rev() {
            if let Some(found) = source.get(field.name())? {
                raw = Some(found);
                break;
            }
        }

        let Some(raw) = raw else {
            continue;
        };

        let value =
            convert_field(field, &raw, enums).map_err(|err| err.for_field(field.name()))?;
        if let Some(validator) = field.validator() {
            validator.check(field.name(), &value)?;
        }

        values.insert(canonical_key(field.name()), value);
    }

    tracing::debug!(schema = schema.name(), resolved = values.len(), "resolved fields");
    Ok(ResolvedValues { values })
}

impl ResolvedValues {
    /// Fills in declared defaults and fails with one aggregate error naming
    /// every required field that is still unaccounted for.
    pub fn with_defaults(mut self, schema: &Schema) -> Result<Self> {
        let mut missing = Vec::new();
        for field in schema.fields() {
            let key = canonical_key(field.name());
            if self.values.contains_key(&key) {
                continue;
            }
            match field.default_value() {
                Some(value) => {
                    self.values.insert(key, value);
                }
                None => missing.push(field.name().to_owned()),
            }
        }

        if !missing.is_empty() {
            return Err(Error::MissingFields(missing));
        }
        Ok(self)
    }

    pub fn get(&self, field: &str) -> Option<&ConfigValue> {
        self.values.get(&canonical_key(field))
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require(&self, field: &str) -> Result<&ConfigValue> {
        self.get(field)
            .ok_or_else(|| Error::MissingFields(vec![field.to_owned()]))
    }

    pub fn get_str(&self, field: &str) -> Result<String> {
        match self.require(field)? {
            ConfigValue::Str(value) => Ok(value.clone()),
            other => Err(Self::wrong_kind(field, "string", other)),
        }
    }

    pub fn get_int(&self, field: &str) -> Result<i64> {
        match self.require(field)? {
            ConfigValue::Int(value) => Ok(*value),
            other => Err(Self::wrong_kind(field, "int", other)),
        }
    }

    pub fn get_float(&self, field: &str) -> Result<f64> {
        match self.require(field)? {
            ConfigValue::Float(value) => Ok(*value),
            other => Err(Self::wrong_kind(field, "float", other)),
        }
    }

    pub fn get_bool(&self, field: &str) -> Result<bool> {
        match self.require(field)? {
            ConfigValue::Bool(value) => Ok(*value),
            other => Err(Self::wrong_kind(field, "bool", other)),
        }
    }

    /// The authoritative variant name of a resolved enum field.
    pub fn get_enum(&self, field: &str) -> Result<&str> {
        match self.require(field)? {
            ConfigValue::Enum { variant, .. } => Ok(variant),
            other => Err(Self::wrong_kind(field, "enum", other)),
        }
    }

    pub fn get_list(&self, field: &str) -> Result<Vec<String>> {
        match self.require(field)? {
            ConfigValue::List(values) => Ok(values.clone()),
            other => Err(Self::wrong_kind(field, "list", other)),
        }
    }

    pub fn get_pairs(&self, field: &str) -> Result<BTreeMap<String, String>> {
        match self.require(field)? {
            ConfigValue::Pairs(pairs) => Ok(pairs.clone()),
            other => Err(Self::wrong_kind(field, "pairs", other)),
        }
    }

    fn wrong_kind(field: &str, wanted: &str, got: &ConfigValue) -> Error {
        Error::TypeMismatch(format!(
            "field '{field}' holds a {} value, not a {wanted}",
            got.type_name()
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::{FieldKind, FieldSpec, Validator};
    use crate::value::RawValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory source that counts lookups.
    pub(crate) struct MapSource {
        name: String,
        values: HashMap<String, RawValue>,
        lookups: AtomicUsize,
    }

    impl MapSource {
        pub(crate) fn new(name: &str, pairs: &[(&str, &str)]) -> Self {
            Self {
                name: name.to_owned(),
                values: pairs
                    .iter()
                    .map(|(k, v)| (canonical_key(k), RawValue::from(*v)))
                    .collect(),
                lookups: AtomicUsize::new(0),
            }
        }

        pub(crate) fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    impl Source for MapSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn get(&self, field: &str) -> Result<Option<RawValue>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.values.get(&canonical_key(field)).cloned())
        }

        fn reload(&self) -> Result<()> {
            Ok(())
        }

        fn keys(&self) -> Result<Vec<String>> {
            let mut keys: Vec<String> = self.values.keys().cloned().collect();
            keys.sort();
            Ok(keys)
        }
    }

    fn host_port_schema() -> Schema {
        Schema::builder("Demo")
            .field(FieldSpec::new("HOST", FieldKind::Str))
            .field(FieldSpec::new("PORT", FieldKind::Int))
            .build()
            .unwrap()
    }

    #[test]
    fn last_listed_source_wins() {
        let a: Arc<dyn Source> = Arc::new(MapSource::new("a", &[("HOST", "from-a")]));
        let b: Arc<dyn Source> = Arc::new(MapSource::new("b", &[("HOST", "from-b")]));

        let values = resolve(
            &host_port_schema(),
            &[a, b],
            &EnumRegistry::new(),
        )
        .unwrap();
        assert_eq!(values.get_str("HOST").unwrap(), "from-b");
    }

    #[test]
    fn absent_fields_are_omitted_until_defaults_apply() {
        let a: Arc<dyn Source> = Arc::new(MapSource::new("a", &[("HOST", "h")]));
        let values = resolve(&host_port_schema(), &[a], &EnumRegistry::new()).unwrap();

        assert!(values.contains("HOST"));
        assert!(!values.contains("PORT"));
    }

    #[test]
    fn with_defaults_reports_every_missing_field_at_once() {
        let schema = Schema::builder("Demo")
            .field(FieldSpec::new("HOST", FieldKind::Str))
            .field(FieldSpec::new("PORT", FieldKind::Int))
            .field(
                FieldSpec::new("RETRIES", FieldKind::Int).with_default(ConfigValue::Int(3)),
            )
            .build()
            .unwrap();

        let empty: Vec<Arc<dyn Source>> = Vec::new();
        let error = resolve(&schema, &empty, &EnumRegistry::new())
            .unwrap()
            .with_defaults(&schema)
            .expect_err("required fields missing");

        let message = error.to_string();
        assert!(message.contains("missing 2 required configuration field(s)"));
        assert!(message.contains("HOST"));
        assert!(message.contains("PORT"));
        assert!(!message.contains("RETRIES"));
    }

    #[test]
    fn defaults_and_factories_fill_absent_fields() {
        let schema = Schema::builder("Demo")
            .field(FieldSpec::new("HOST", FieldKind::Str).with_default(ConfigValue::Str(
                "localhost".to_owned(),
            )))
            .field(
                FieldSpec::new("PORT", FieldKind::Int)
                    .with_default_factory(|| ConfigValue::Int(8080)),
            )
            .build()
            .unwrap();

        let empty: Vec<Arc<dyn Source>> = Vec::new();
        let values = resolve(&schema, &empty, &EnumRegistry::new())
            .unwrap()
            .with_defaults(&schema)
            .unwrap();

        assert_eq!(values.get_str("HOST").unwrap(), "localhost");
        assert_eq!(values.get_int("PORT").unwrap(), 8080);
    }

    #[test]
    fn conversion_errors_name_the_field() {
        let source: Arc<dyn Source> = Arc::new(MapSource::new("a", &[("PORT", "eighty")]));
        let error = resolve(&host_port_schema(), &[source], &EnumRegistry::new())
            .expect_err("bad integer should fail");
        assert!(error.to_string().contains("field 'PORT'"));
    }

    #[test]
    fn validators_run_after_conversion() {
        let schema = Schema::builder("Demo")
            .field(
                FieldSpec::new("PORT", FieldKind::Int)
                    .with_validator(Validator::Range { start: 1, end: 1024 }),
            )
            .build()
            .unwrap();

        let good: Arc<dyn Source> = Arc::new(MapSource::new("a", &[("PORT", "80")]));
        assert!(resolve(&schema, &[good], &EnumRegistry::new()).is_ok());

        let bad: Arc<dyn Source> = Arc::new(MapSource::new("a", &[("PORT", "8080")]));
        let error = resolve(&schema, &[bad], &EnumRegistry::new())
            .expect_err("out-of-range port should fail");
        assert!(matches!(error, Error::FailedValidation(_)));
    }

    #[test]
    fn field_lookup_is_case_insensitive() {
        let source: Arc<dyn Source> = Arc::new(MapSource::new("a", &[("host", "h")]));
        let values = resolve(&host_port_schema(), &[source], &EnumRegistry::new()).unwrap();
        assert_eq!(values.get_str("host").unwrap(), "h");
        assert_eq!(values.get_str("HOST").unwrap(), "h");
    }
}
