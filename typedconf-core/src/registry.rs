use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::convert::EnumRegistry;
use crate::error::{Error, Result};
use crate::resolve::{resolve, ResolvedValues};
use crate::schema::{ConfigClass, Schema};
use crate::sources::{EnvironmentSource, Source};

struct RegistryEntry {
    type_name: &'static str,
    schema: Arc<Schema>,
    sources: Vec<Arc<dyn Source>>,
    /// `Arc<HandleShared<T>>` once the type has been materialized.
    instance: Option<Arc<dyn Any + Send + Sync>>,
}

/// Owns the lifecycle of every configuration type: registered once,
/// materialized at most once, reloadable on demand.
///
/// The registry is an explicit object meant to be created near the top of
/// the application and passed (or wrapped in an `Arc`) to whoever needs it.
/// Its internal lock makes registration and first materialization safe to
/// race; the per-type `RwLock` behind [`ConfigHandle`] makes reloads atomic
/// with respect to readers.
#[derive(Default)]
pub struct ConfigRegistry {
    entries: Mutex<HashMap<TypeId, RegistryEntry>>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a configuration type with its sources, in precedence order
    /// (the last listed source wins). An empty source list defaults to a
    /// single [`EnvironmentSource`]. Registering the same type twice is an
    /// error.
    pub fn register<T: ConfigClass>(&self, sources: Vec<Arc<dyn Source>>) -> Result<()> {
        let schema = T::schema()?;
        let sources = if sources.is_empty() {
            vec![Arc::new(EnvironmentSource::new()) as Arc<dyn Source>]
        } else {
            sources
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let type_name = std::any::type_name::<T>();
        match entries.entry(TypeId::of::<T>()) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(Error::DoubleRegistration(type_name))
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(RegistryEntry {
                    type_name,
                    schema: Arc::new(schema),
                    sources,
                    instance: None,
                });
                Ok(())
            }
        }
    }

    /// Returns the materialized instance for `T`, resolving it on the first
    /// call. Subsequent calls return the same shared state without touching
    /// the sources again.
    pub fn materialize<T: ConfigClass>(&self) -> Result<ConfigHandle<T>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get_mut(&TypeId::of::<T>())
            .ok_or_else(|| Error::NotRegistered(std::any::type_name::<T>()))?;

        if let Some(instance) = &entry.instance {
            let shared = instance
                .clone()
                .downcast::<HandleShared<T>>()
                .map_err(|_| Error::NotRegistered(entry.type_name))?;
            return Ok(ConfigHandle { shared });
        }

        for source in &entry.sources {
            source.update_with_fields(entry.schema.fields())?;
        }

        let enums = EnumRegistry::from_schema(&entry.schema);
        let values = resolve(&entry.schema, &entry.sources, &enums)?;
        let value = build::<T>(&entry.schema, values)?;

        let shared = Arc::new(HandleShared {
            schema: entry.schema.clone(),
            enums,
            sources: entry.sources.clone(),
            value: RwLock::new(value),
        });
        entry.instance = Some(shared.clone() as Arc<dyn Any + Send + Sync>);

        tracing::info!(config = entry.type_name, "materialized configuration");
        Ok(ConfigHandle { shared })
    }

    /// Refreshes every source of `T`'s instance and atomically replaces its
    /// values, preserving identity. Materializes first when needed.
    pub fn reload<T: ConfigClass>(&self) -> Result<()> {
        self.materialize::<T>()?.reload()
    }
}

fn build<T: ConfigClass>(schema: &Schema, values: ResolvedValues) -> Result<T> {
    let values = values.with_defaults(schema)?;
    T::from_values(&values)
}

struct HandleShared<T> {
    schema: Arc<Schema>,
    enums: EnumRegistry,
    sources: Vec<Arc<dyn Source>>,
    value: RwLock<T>,
}

/// Shared access to one materialized configuration instance.
///
/// Handles are cheap to clone and all clones observe the same state:
/// [`reload`](Self::reload) through any of them swaps the value seen by all.
pub struct ConfigHandle<T> {
    shared: Arc<HandleShared<T>>,
}

impl<T> std::fmt::Debug for ConfigHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle").finish_non_exhaustive()
    }
}

impl<T> Clone for ConfigHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: ConfigClass> ConfigHandle<T> {
    /// Runs `f` against the current value under the read lock.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self
            .shared
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&value)
    }

    /// A clone of the current value.
    pub fn snapshot(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Reloads every attached source, re-runs resolution and swaps the new
    /// value in. Source failures propagate and leave the old value in place.
    pub fn reload(&self) -> Result<()> {
        for source in &self.shared.sources {
            source.reload()?;
        }

        let values = resolve(&self.shared.schema, &self.shared.sources, &self.shared.enums)?;
        let value = build::<T>(&self.shared.schema, values)?;

        *self
            .shared
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner) = value;
        tracing::info!(config = self.shared.schema.name(), "reloaded configuration");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::tests::MapSource;
    use crate::schema::{FieldKind, FieldSpec};
    use crate::value::ConfigValue;
    use std::collections::HashMap as StdHashMap;

    #[derive(Debug, Clone, PartialEq)]
    struct ServerConfig {
        host: String,
        port: i64,
        debug: bool,
    }

    impl ConfigClass for ServerConfig {
        fn schema() -> Result<Schema> {
            Schema::builder("ServerConfig")
                .field(FieldSpec::new("HOST", FieldKind::Str))
                .field(
                    FieldSpec::new("PORT", FieldKind::Int)
                        .with_default(ConfigValue::Int(8080)),
                )
                .field(
                    FieldSpec::new("DEBUG", FieldKind::Bool)
                        .with_default(ConfigValue::Bool(false)),
                )
                .build()
        }

        fn from_values(values: &ResolvedValues) -> Result<Self> {
            Ok(Self {
                host: values.get_str("HOST")?,
                port: values.get_int("PORT")?,
                debug: values.get_bool("DEBUG")?,
            })
        }
    }

    fn environ(
        pairs: &[(&str, &str)],
    ) -> Arc<RwLock<StdHashMap<String, String>>> {
        Arc::new(RwLock::new(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        ))
    }

    #[test]
    fn double_registration_fails() {
        let registry = ConfigRegistry::new();
        let sources: Vec<Arc<dyn Source>> =
            vec![Arc::new(MapSource::new("map", &[("HOST", "h")]))];
        registry.register::<ServerConfig>(sources.clone()).unwrap();

        let error = registry
            .register::<ServerConfig>(sources)
            .expect_err("second registration should fail");
        assert!(matches!(error, Error::DoubleRegistration(_)));
    }

    #[test]
    fn materialize_before_register_fails() {
        let registry = ConfigRegistry::new();
        let error = registry
            .materialize::<ServerConfig>()
            .expect_err("unregistered type should fail");
        assert!(matches!(error, Error::NotRegistered(_)));
    }

    #[test]
    fn materialize_resolves_once_and_returns_the_same_instance() {
        let registry = ConfigRegistry::new();
        let map = Arc::new(MapSource::new("map", &[("HOST", "h"), ("PORT", "9000")]));
        registry
            .register::<ServerConfig>(vec![map.clone() as Arc<dyn Source>])
            .unwrap();

        let first = registry.materialize::<ServerConfig>().unwrap();
        let lookups_after_first = map.lookups();
        let second = registry.materialize::<ServerConfig>().unwrap();

        assert!(first.same_instance(&second));
        assert_eq!(map.lookups(), lookups_after_first);
        assert_eq!(
            first.snapshot(),
            ServerConfig {
                host: "h".to_owned(),
                port: 9000,
                debug: false,
            }
        );
    }

    #[test]
    fn missing_required_fields_surface_as_an_aggregate_error() {
        let registry = ConfigRegistry::new();
        let empty: Arc<dyn Source> = Arc::new(MapSource::new("map", &[]));
        registry.register::<ServerConfig>(vec![empty]).unwrap();

        let error = registry
            .materialize::<ServerConfig>()
            .expect_err("HOST has no value and no default");
        let message = error.to_string();
        assert!(message.contains("missing 1 required configuration field(s)"));
        assert!(message.contains("HOST"));
    }

    #[test]
    fn reload_updates_values_in_place() {
        let registry = ConfigRegistry::new();
        let map = environ(&[("HOST", "localhost")]);
        let env: Arc<dyn Source> =
            Arc::new(EnvironmentSource::with_environ(map.clone(), None));
        registry.register::<ServerConfig>(vec![env]).unwrap();

        let handle = registry.materialize::<ServerConfig>().unwrap();
        let observer = handle.clone();
        assert_eq!(handle.with(|c| c.host.clone()), "localhost");

        map.write()
            .unwrap()
            .insert("HOST".to_owned(), "newhost".to_owned());
        // Values hold steady until an explicit reload.
        assert_eq!(handle.with(|c| c.host.clone()), "localhost");

        handle.reload().unwrap();
        assert_eq!(handle.with(|c| c.host.clone()), "newhost");
        // Identity is unchanged: the clone taken earlier sees the update.
        assert!(observer.same_instance(&handle));
        assert_eq!(observer.with(|c| c.host.clone()), "newhost");
    }

    #[test]
    fn empty_source_list_defaults_to_the_environment() {
        #[derive(Debug, Clone)]
        struct Defaulted {
            #[allow(dead_code)]
            greeting: String,
        }

        impl ConfigClass for Defaulted {
            fn schema() -> Result<Schema> {
                Schema::builder("Defaulted")
                    .field(
                        FieldSpec::new("TYPEDCONF_TEST_GREETING", FieldKind::Str)
                            .with_default(ConfigValue::Str("hi".to_owned())),
                    )
                    .build()
            }

            fn from_values(values: &ResolvedValues) -> Result<Self> {
                Ok(Self {
                    greeting: values.get_str("TYPEDCONF_TEST_GREETING")?,
                })
            }
        }

        let registry = ConfigRegistry::new();
        registry.register::<Defaulted>(Vec::new()).unwrap();
        let handle = registry.materialize::<Defaulted>().unwrap();
        assert_eq!(handle.with(|c| c.greeting.clone()), "hi");
    }
}
