use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::sources::{canonical_key, Source};
use crate::value::RawValue;

/// Transport used by [`ConsulSource`]. The default implementation performs a
/// blocking HTTP GET; tests (or hosts with their own HTTP stack) can inject
/// a replacement.
pub trait KvFetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String>;
}

struct HttpFetch {
    client: reqwest::blocking::Client,
}

impl KvFetch for HttpFetch {
    fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send()?.error_for_status()?;
        Ok(response.text()?)
    }
}

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Configuration values from a Consul-style remote KV store.
///
/// Construction and every reload issue one synchronous recursive listing,
/// `GET {root}/v1/kv/{namespace}?recurse=true`, with no timeout and no
/// retry; callers wanting bounded latency must wrap externally. The
/// namespace prefix (plus separator) is stripped from each returned key and
/// the remainder upper-cased; entries with an empty stripped key (the
/// namespace folder itself) and entries with null values are discarded.
pub struct ConsulSource {
    name: String,
    root: String,
    namespace: Option<String>,
    fetch: Box<dyn KvFetch>,
    values: RwLock<HashMap<String, RawValue>>,
}

impl std::fmt::Debug for ConsulSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulSource")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ConsulSource {
    pub fn new(root: &str, namespace: Option<&str>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder().build()?;
        Self::with_fetcher(root, namespace, Box::new(HttpFetch { client }))
    }

    pub fn with_fetcher(
        root: &str,
        namespace: Option<&str>,
        fetch: Box<dyn KvFetch>,
    ) -> Result<Self> {
        let root = root.trim_end_matches('/').to_owned();
        let source = Self {
            name: format!("consul:{root}"),
            root,
            namespace: namespace.map(str::to_owned),
            fetch,
            values: RwLock::new(HashMap::new()),
        };
        source.refetch()?;
        Ok(source)
    }

    fn refetch(&self) -> Result<()> {
        let namespace = self.namespace.as_deref().unwrap_or("");
        let url = format!("{}/v1/kv/{namespace}?recurse=true", self.root);
        let body = self.fetch.fetch(&url)?;
        let entries: Vec<KvEntry> = serde_json::from_str(&body).map_err(|err| {
            Error::SourceConfig(format!("{}: unexpected kv listing: {err}", self.name))
        })?;

        let mut values = HashMap::new();
        for entry in entries {
            let stripped = if namespace.is_empty() {
                Some(entry.key.as_str())
            } else {
                entry
                    .key
                    .strip_prefix(namespace)
                    .map(|rest| rest.trim_start_matches('/'))
            };

            let Some(stripped) = stripped else {
                continue;
            };
            if stripped.is_empty() {
                continue;
            }
            let Some(value) = entry.value else {
                tracing::warn!(source = %self.name, key = %entry.key, "skipping null value");
                continue;
            };

            values.insert(canonical_key(stripped), RawValue::Str(value));
        }

        tracing::debug!(source = %self.name, entries = values.len(), "fetched kv listing");
        *self.values.write().unwrap_or_else(PoisonError::into_inner) = values;
        Ok(())
    }
}

impl Source for ConsulSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, field: &str) -> Result<Option<RawValue>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(&canonical_key(field)).cloned())
    }

    fn reload(&self) -> Result<()> {
        self.refetch()
    }

    fn keys(&self) -> Result<Vec<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubFetch {
        body: Mutex<String>,
        requested: Mutex<Vec<String>>,
    }

    impl StubFetch {
        fn new(body: &str) -> Self {
            Self {
                body: Mutex::new(body.to_owned()),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl KvFetch for &'static StubFetch {
        fn fetch(&self, url: &str) -> Result<String> {
            self.requested.lock().unwrap().push(url.to_owned());
            Ok(self.body.lock().unwrap().clone())
        }
    }

    fn leaked_stub(body: &str) -> &'static StubFetch {
        Box::leak(Box::new(StubFetch::new(body)))
    }

    #[test]
    fn strips_namespace_and_discards_folder_entries() {
        let stub = leaked_stub(
            r#"[
                {"Key": "app/", "Value": null},
                {"Key": "app/host", "Value": "kvhost"},
                {"Key": "app/db/port", "Value": "5432"},
                {"Key": "other/host", "Value": "nope"}
            ]"#,
        );
        let source = ConsulSource::with_fetcher("http://consul:8500", Some("app"), Box::new(stub))
            .unwrap();

        assert_eq!(source.get("HOST").unwrap(), Some(RawValue::from("kvhost")));
        assert_eq!(source.get("db/port").unwrap(), Some(RawValue::from("5432")));
        assert_eq!(source.get("other/host").unwrap(), None);
        assert_eq!(
            source.keys().unwrap(),
            vec!["DB/PORT".to_owned(), "HOST".to_owned()]
        );
    }

    #[test]
    fn tolerates_trailing_slash_on_root() {
        let stub = leaked_stub("[]");
        let _source =
            ConsulSource::with_fetcher("http://consul:8500/", Some("app"), Box::new(stub)).unwrap();

        let requested = stub.requested.lock().unwrap();
        assert_eq!(requested[0], "http://consul:8500/v1/kv/app?recurse=true");
    }

    #[test]
    fn reload_refetches() {
        let stub = leaked_stub(r#"[{"Key": "app/host", "Value": "one"}]"#);
        let source = ConsulSource::with_fetcher("http://consul:8500", Some("app"), Box::new(stub))
            .unwrap();
        assert_eq!(source.get("HOST").unwrap(), Some(RawValue::from("one")));

        *stub.body.lock().unwrap() = r#"[{"Key": "app/host", "Value": "two"}]"#.to_owned();
        assert_eq!(source.get("HOST").unwrap(), Some(RawValue::from("one")));

        source.reload().unwrap();
        assert_eq!(source.get("HOST").unwrap(), Some(RawValue::from("two")));
        assert_eq!(stub.requested.lock().unwrap().len(), 2);
    }

    #[test]
    fn malformed_listing_fails_fast() {
        let stub = leaked_stub("not json");
        let error = ConsulSource::with_fetcher("http://consul:8500", None, Box::new(stub))
            .expect_err("bad body should fail");
        assert!(matches!(error, Error::SourceConfig(_)));
    }
}
