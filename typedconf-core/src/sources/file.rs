use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError, RwLock};

use crate::convert::quote_stripped;
use crate::error::{Error, Result};
use crate::sources::{canonical_key, namespace_stripped_key, Source};
use crate::value::RawValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    DotEnv,
    Json,
    Toml,
    Ini,
}

impl FileFormat {
    fn label(self) -> &'static str {
        match self {
            FileFormat::DotEnv => "dotenv",
            FileFormat::Json => "json",
            FileFormat::Toml => "toml",
            FileFormat::Ini => "ini",
        }
    }
}

/// One step of a JSON/TOML namespace path: an object key or array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    pub fn key(key: &str) -> Self {
        PathSegment::Key(key.to_owned())
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_owned())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{key}"),
            PathSegment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

#[derive(Debug, Clone, Default)]
enum FileNamespace {
    #[default]
    None,
    /// Dotenv: a key prefix, stripped before storage.
    Prefix(String),
    /// JSON/TOML: a path descended from the document root.
    Path(Vec<PathSegment>),
    /// INI: a section name, matched case-sensitively.
    Section(String),
}

trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

enum Input {
    Path(PathBuf),
    /// Handle that supports seeking: rewound to its construction-time
    /// position on every reload.
    Seekable {
        handle: Mutex<Box<dyn ReadSeek>>,
        start: u64,
    },
    /// Handle without seeking: each reload reads forward from wherever the
    /// handle currently is. Managing that position is the caller's job.
    Stream(Mutex<Box<dyn Read + Send>>),
}

/// A file-backed source for dotenv, JSON, TOML or INI documents.
///
/// Built from exactly one of a filesystem path or an open handle; see
/// [`FileSourceBuilder`]. Path-backed sources reopen and reparse on reload.
pub struct FileSource {
    name: String,
    format: FileFormat,
    namespace: FileNamespace,
    input: Input,
    values: RwLock<HashMap<String, RawValue>>,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

pub struct FileSourceBuilder {
    format: FileFormat,
    path: Option<PathBuf>,
    handle: Option<Input>,
    namespace: FileNamespace,
}

impl FileSource {
    pub fn builder(format: FileFormat) -> FileSourceBuilder {
        FileSourceBuilder {
            format,
            path: None,
            handle: None,
            namespace: FileNamespace::None,
        }
    }

    /// Shorthand for a namespace-less path-backed source.
    pub fn open(format: FileFormat, path: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(format).path(path).build()
    }

    fn rebuild(&self) -> Result<()> {
        let text = self.read_input()?;
        let values = match (self.format, &self.namespace) {
            (FileFormat::DotEnv, FileNamespace::Prefix(prefix)) => {
                parse_dotenv(&text, Some(prefix.as_str()))
            }
            (FileFormat::DotEnv, _) => parse_dotenv(&text, None),
            (FileFormat::Json, FileNamespace::Path(segments)) => {
                parse_json(&self.name, &text, segments)?
            }
            (FileFormat::Json, _) => parse_json(&self.name, &text, &[])?,
            (FileFormat::Toml, FileNamespace::Path(segments)) => {
                parse_toml(&self.name, &text, segments)?
            }
            (FileFormat::Toml, _) => parse_toml(&self.name, &text, &[])?,
            (FileFormat::Ini, FileNamespace::Section(section)) => {
                parse_ini(&self.name, &text, Some(section.as_str()))?
            }
            (FileFormat::Ini, _) => parse_ini(&self.name, &text, None)?,
        };

        tracing::debug!(source = %self.name, entries = values.len(), "parsed file source");
        *self.values.write().unwrap_or_else(PoisonError::into_inner) = values;
        Ok(())
    }

    fn read_input(&self) -> Result<String> {
        match &self.input {
            Input::Path(path) => std::fs::read_to_string(path).map_err(|err| {
                Error::SourceConfig(format!("failed to read '{}': {err}", path.display()))
            }),
            Input::Seekable { handle, start } => {
                let mut handle = handle.lock().unwrap_or_else(PoisonError::into_inner);
                handle
                    .seek(SeekFrom::Start(*start))
                    .map_err(|err| Error::SourceConfig(format!("failed to rewind handle: {err}")))?;
                let mut text = String::new();
                handle.read_to_string(&mut text)?;
                Ok(text)
            }
            Input::Stream(handle) => {
                let mut handle = handle.lock().unwrap_or_else(PoisonError::into_inner);
                let mut text = String::new();
                handle.read_to_string(&mut text)?;
                Ok(text)
            }
        }
    }
}

impl FileSourceBuilder {
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Reads from an open handle that cannot seek; every reload continues
    /// from the handle's current position.
    pub fn handle(mut self, reader: impl Read + Send + 'static) -> Self {
        self.handle = Some(Input::Stream(Mutex::new(Box::new(reader))));
        self
    }

    /// Reads from an open seekable handle; reloads rewind to the position
    /// the handle had when the source was built.
    pub fn seekable_handle(mut self, reader: impl Read + Seek + Send + 'static) -> Self {
        self.handle = Some(Input::Seekable {
            handle: Mutex::new(Box::new(reader)),
            start: 0,
        });
        self
    }

    /// Dotenv only: key prefix namespace.
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.namespace = FileNamespace::Prefix(canonical_key(prefix));
        self
    }

    /// JSON/TOML only: path of keys/indices descended before flattening.
    pub fn namespace<I>(mut self, segments: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathSegment>,
    {
        self.namespace = FileNamespace::Path(segments.into_iter().map(Into::into).collect());
        self
    }

    /// INI only: section name.
    pub fn section(mut self, section: &str) -> Self {
        self.namespace = FileNamespace::Section(section.to_owned());
        self
    }

    pub fn build(self) -> Result<FileSource> {
        let format = self.format;
        match (&self.namespace, format) {
            (FileNamespace::None, _)
            | (FileNamespace::Prefix(_), FileFormat::DotEnv)
            | (FileNamespace::Path(_), FileFormat::Json | FileFormat::Toml)
            | (FileNamespace::Section(_), FileFormat::Ini) => {}
            (namespace, _) => {
                return Err(Error::SourceConfig(format!(
                    "{:?} namespace does not apply to {} sources",
                    namespace,
                    format.label()
                )))
            }
        }

        let (name, input) = match (self.path, self.handle) {
            (Some(_), Some(_)) => {
                return Err(Error::SourceConfig(
                    "cannot pass both path and handle; pass one or the other".to_owned(),
                ))
            }
            (None, None) => {
                return Err(Error::SourceConfig(
                    "either a path or a handle must be provided".to_owned(),
                ))
            }
            (Some(path), None) => (
                format!("{}:{}", format.label(), path.display()),
                Input::Path(path),
            ),
            (None, Some(Input::Seekable { handle, .. })) => {
                let start = {
                    let mut guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.stream_position().map_err(|err| {
                        Error::SourceConfig(format!("handle position unavailable: {err}"))
                    })?
                };
                (
                    format!("{}:<handle>", format.label()),
                    Input::Seekable { handle, start },
                )
            }
            (None, Some(stream)) => (format!("{}:<handle>", format.label()), stream),
        };

        let source = FileSource {
            name,
            format,
            namespace: self.namespace,
            input,
            values: RwLock::new(HashMap::new()),
        };
        source.rebuild()?;
        Ok(source)
    }
}

impl Source for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, field: &str) -> Result<Option<RawValue>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(&canonical_key(field)).cloned())
    }

    fn reload(&self) -> Result<()> {
        self.rebuild()
    }

    fn keys(&self) -> Result<Vec<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Line-oriented `KEY=value` parsing; lines without `=` are skipped.
fn parse_dotenv(text: &str, prefix: Option<&str>) -> HashMap<String, RawValue> {
    let mut values = HashMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = canonical_key(key.trim());
        if let Some(key) = namespace_stripped_key(prefix, &key) {
            values.insert(
                key,
                RawValue::Str(quote_stripped(value.trim()).to_owned()),
            );
        }
    }
    values
}

fn parse_json(
    name: &str,
    text: &str,
    namespace: &[PathSegment],
) -> Result<HashMap<String, RawValue>> {
    let document: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| Error::SourceConfig(format!("failed to parse {name}: {err}")))?;

    let mut cursor = &document;
    for segment in namespace {
        cursor = match (segment, cursor) {
            (PathSegment::Key(key), serde_json::Value::Object(map)) => map.get(key),
            (PathSegment::Index(index), serde_json::Value::Array(items)) => items.get(*index),
            _ => None,
        }
        .ok_or_else(|| {
            Error::SourceConfig(format!("{name}: namespace segment '{segment}' missing"))
        })?;
    }

    let serde_json::Value::Object(map) = cursor else {
        return Err(Error::SourceConfig(format!(
            "{name}: namespace does not lead to an object"
        )));
    };

    let mut values = HashMap::new();
    for (key, value) in map {
        match json_raw(value) {
            Some(raw) => {
                values.insert(canonical_key(key), raw);
            }
            None => tracing::warn!(source = name, key, "skipping non-scalar value"),
        }
    }
    Ok(values)
}

fn json_raw(value: &serde_json::Value) -> Option<RawValue> {
    match value {
        serde_json::Value::Bool(value) => Some(RawValue::Bool(*value)),
        serde_json::Value::Number(value) => {
            if let Some(int) = value.as_i64() {
                Some(RawValue::Int(int))
            } else {
                value.as_f64().map(RawValue::Float)
            }
        }
        serde_json::Value::String(value) => Some(RawValue::Str(value.clone())),
        serde_json::Value::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                match json_raw(item) {
                    Some(element @ (RawValue::Bool(_)
                    | RawValue::Int(_)
                    | RawValue::Float(_)
                    | RawValue::Str(_))) => elements.push(element),
                    _ => return None,
                }
            }
            Some(RawValue::List(elements))
        }
        serde_json::Value::Null | serde_json::Value::Object(_) => None,
    }
}

fn parse_toml(
    name: &str,
    text: &str,
    namespace: &[PathSegment],
) -> Result<HashMap<String, RawValue>> {
    let document: toml::Value = toml::from_str(text)
        .map_err(|err| Error::SourceConfig(format!("failed to parse {name}: {err}")))?;

    let mut cursor = &document;
    for segment in namespace {
        cursor = match (segment, cursor) {
            (PathSegment::Key(key), toml::Value::Table(table)) => table.get(key),
            (PathSegment::Index(index), toml::Value::Array(items)) => items.get(*index),
            _ => None,
        }
        .ok_or_else(|| {
            Error::SourceConfig(format!("{name}: namespace segment '{segment}' missing"))
        })?;
    }

    let toml::Value::Table(table) = cursor else {
        return Err(Error::SourceConfig(format!(
            "{name}: namespace does not lead to a table"
        )));
    };

    let mut values = HashMap::new();
    for (key, value) in table {
        match toml_raw(value) {
            Some(raw) => {
                values.insert(canonical_key(key), raw);
            }
            None => tracing::warn!(source = name, key, "skipping non-scalar value"),
        }
    }
    Ok(values)
}

fn toml_raw(value: &toml::Value) -> Option<RawValue> {
    match value {
        toml::Value::Boolean(value) => Some(RawValue::Bool(*value)),
        toml::Value::Integer(value) => Some(RawValue::Int(*value)),
        toml::Value::Float(value) => Some(RawValue::Float(*value)),
        toml::Value::String(value) => Some(RawValue::Str(value.clone())),
        toml::Value::Datetime(value) => Some(RawValue::Str(value.to_string())),
        toml::Value::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                match toml_raw(item) {
                    Some(element @ (RawValue::Bool(_)
                    | RawValue::Int(_)
                    | RawValue::Float(_)
                    | RawValue::Str(_))) => elements.push(element),
                    _ => return None,
                }
            }
            Some(RawValue::List(elements))
        }
        toml::Value::Table(_) => None,
    }
}

/// Section-scoped `KEY=value` parsing. `[DEFAULT]` keys (and keys above the
/// first header) apply to every section, shadowed by the section's own keys.
fn parse_ini(
    name: &str,
    text: &str,
    section: Option<&str>,
) -> Result<HashMap<String, RawValue>> {
    let mut defaults = HashMap::new();
    let mut scoped = HashMap::new();
    let mut current: Option<String> = None;
    let mut section_found = section.is_none();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let header = header.trim().to_owned();
            if Some(header.as_str()) == section {
                section_found = true;
            }
            current = Some(header);
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = canonical_key(key.trim());
        let value = RawValue::Str(quote_stripped(value.trim()).to_owned());

        match (&current, section) {
            (None, _) => {
                defaults.insert(key, value);
            }
            (Some(header), _) if header == "DEFAULT" => {
                defaults.insert(key, value);
            }
            (Some(header), Some(wanted)) if header == wanted => {
                scoped.insert(key, value);
            }
            _ => {}
        }
    }

    if !section_found {
        return Err(Error::SourceConfig(format!(
            "{name}: namespace '{}' missing",
            section.unwrap_or_default()
        )));
    }

    defaults.extend(scoped);
    Ok(defaults)
}
