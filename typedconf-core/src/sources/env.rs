use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::convert::quote_stripped;
use crate::error::Result;
use crate::sources::{canonical_key, namespace_stripped_key, Source};
use crate::value::RawValue;

/// Where the environment snapshot comes from: the process environment, or an
/// injected map (primarily a test seam, also useful for sandboxed hosts).
#[derive(Debug, Clone)]
enum Environ {
    Process,
    Injected(Arc<RwLock<HashMap<String, String>>>),
}

/// Case-insensitive snapshot of environment variables.
///
/// With a namespace, only variables carrying the prefix are retained and the
/// prefix is stripped before storage, so `JB_VAR1` is looked up as `VAR1`.
/// Values are quote-stripped. The snapshot is taken at construction and on
/// every [`reload`](Source::reload).
pub struct EnvironmentSource {
    name: String,
    namespace: Option<String>,
    environ: Environ,
    values: RwLock<HashMap<String, RawValue>>,
}

impl EnvironmentSource {
    pub fn new() -> Self {
        Self::build(None, Environ::Process)
    }

    pub fn with_namespace(namespace: &str) -> Self {
        Self::build(Some(namespace), Environ::Process)
    }

    /// Uses `environ` instead of the process environment. Mutations of the
    /// shared map become visible after the next reload.
    pub fn with_environ(
        environ: Arc<RwLock<HashMap<String, String>>>,
        namespace: Option<&str>,
    ) -> Self {
        Self::build(namespace, Environ::Injected(environ))
    }

    fn build(namespace: Option<&str>, environ: Environ) -> Self {
        let source = Self {
            name: "environment".to_owned(),
            namespace: namespace.map(canonical_key),
            environ,
            values: RwLock::new(HashMap::new()),
        };
        source.snapshot();
        source
    }

    fn snapshot(&self) {
        let variables: Vec<(String, String)> = match &self.environ {
            Environ::Process => std::env::vars().collect(),
            Environ::Injected(map) => map
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };

        let mut values = HashMap::new();
        for (key, value) in variables {
            let key = canonical_key(&key);
            if let Some(key) = namespace_stripped_key(self.namespace.as_deref(), &key) {
                values.insert(key, RawValue::Str(quote_stripped(&value).to_owned()));
            }
        }

        tracing::debug!(source = %self.name, entries = values.len(), "environment snapshot");
        *self.values.write().unwrap_or_else(PoisonError::into_inner) = values;
    }
}

impl Default for EnvironmentSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for EnvironmentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, field: &str) -> Result<Option<RawValue>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(&canonical_key(field)).cloned())
    }

    fn reload(&self) -> Result<()> {
        self.snapshot();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
