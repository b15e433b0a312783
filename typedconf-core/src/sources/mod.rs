//! Configuration sources: providers of raw values keyed by canonical field
//! name. Built-in sources cover the process environment, dotenv/JSON/TOML/INI
//! files, command-line arguments and Consul-style remote KV stores; custom
//! sources only need to implement [`Source`].

pub mod command_line;
pub mod consul;
pub mod env;
pub mod file;

pub use command_line::CommandLineSource;
pub use consul::{ConsulSource, KvFetch};
pub use env::EnvironmentSource;
pub use file::{FileFormat, FileSource, FileSourceBuilder, PathSegment};

use crate::error::Result;
use crate::schema::FieldSpec;
use crate::value::RawValue;

/// The canonical form of a configuration key: upper-cased. Namespace
/// prefixes are stripped by each source before canonicalization applies.
pub fn canonical_key(key: &str) -> String {
    key.to_uppercase()
}

/// A provider of raw configuration values.
///
/// Sources are shared behind `Arc<dyn Source>`; the same source object may
/// legally be listed by several configuration types. `reload` therefore
/// takes `&self` and implementations keep their canonical mapping behind
/// interior mutability.
pub trait Source: Send + Sync {
    /// Short human-readable name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Looks up a field by name, case-insensitively. `Ok(None)` means the
    /// source simply does not provide the field.
    fn get(&self, field: &str) -> Result<Option<RawValue>>;

    /// Re-fetches and re-parses the backing data without changing identity.
    fn reload(&self) -> Result<()>;

    /// The canonical keys currently held, sorted. An inspection surface for
    /// tooling; resolution never iterates keys.
    fn keys(&self) -> Result<Vec<String>>;

    /// Hands the source the schema's field set before resolution. Most
    /// sources ignore this; sources that derive their shape from the schema
    /// (command-line arguments) must be called before [`get`](Self::get).
    fn update_with_fields(&self, _fields: &[FieldSpec]) -> Result<()> {
        Ok(())
    }
}

/// Strips `namespace` off `key` when it prefixes it; `None` means the key is
/// outside the namespace and must be ignored. Both sides are expected in
/// canonical (upper-cased) form already.
pub(crate) fn namespace_stripped_key(namespace: Option<&str>, key: &str) -> Option<String> {
    match namespace {
        None => Some(key.to_owned()),
        Some(namespace) => key.strip_prefix(namespace).map(str::to_owned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_uppercases() {
        assert_eq!(canonical_key("var1"), "VAR1");
        assert_eq!(canonical_key("VAR1"), "VAR1");
    }

    #[test]
    fn namespace_stripping() {
        assert_eq!(
            namespace_stripped_key(Some("JB_"), "JB_VAR1").as_deref(),
            Some("VAR1")
        );
        assert_eq!(namespace_stripped_key(Some("JB_"), "VAR1"), None);
        assert_eq!(namespace_stripped_key(None, "VAR1").as_deref(), Some("VAR1"));
    }
}
