use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, Command};

use crate::error::{Error, Result};
use crate::schema::{FieldKind, FieldSpec};
use crate::sources::{canonical_key, Source};
use crate::value::RawValue;

#[derive(Debug, Clone)]
enum ArgShape {
    Int,
    Float,
    Choice(Vec<String>),
    Text,
}

#[derive(Debug, Clone)]
struct FieldArg {
    name: String,
    shape: ArgShape,
}

/// Configuration values from command-line arguments.
///
/// This source derives its shape from the schema: one `--FIELD_NAME` option
/// is registered per declared field (numeric fields parse as numbers, enum
/// fields restrict choices to the enum's variant names, everything else is a
/// string). It therefore cannot answer lookups until the resolution engine
/// has wired it via [`update_with_fields`](Source::update_with_fields);
/// querying earlier is an error.
pub struct CommandLineSource {
    name: String,
    argv: Vec<String>,
    base: Command,
    fields: RwLock<Option<Vec<FieldArg>>>,
    values: RwLock<Option<HashMap<String, RawValue>>>,
}

impl CommandLineSource {
    /// Parses the process's own arguments.
    pub fn new() -> Self {
        Self::from_args(std::env::args().skip(1))
    }

    /// Parses a custom argument vector (without the binary name). Mostly
    /// useful for testing.
    pub fn from_args<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "command-line".to_owned(),
            argv: argv.into_iter().map(Into::into).collect(),
            base: Command::new("typedconf"),
            fields: RwLock::new(None),
            values: RwLock::new(None),
        }
    }

    /// Extends an existing `clap` command with the auto-registered field
    /// options instead of starting from an empty one.
    pub fn with_base_command(mut self, command: Command) -> Self {
        self.base = command;
        self
    }

    fn parse(&self, fields: &[FieldArg]) -> Result<()> {
        let mut command = self.base.clone().no_binary_name(true);
        for field in fields {
            let mut arg = Arg::new(field.name.clone())
                .long(field.name.clone())
                .action(ArgAction::Set);
            arg = match &field.shape {
                ArgShape::Int => arg.value_parser(clap::value_parser!(i64)),
                ArgShape::Float => arg.value_parser(clap::value_parser!(f64)),
                ArgShape::Choice(choices) => {
                    arg.value_parser(PossibleValuesParser::new(choices.clone()))
                }
                ArgShape::Text => arg,
            };
            command = command.arg(arg);
        }

        let matches = command
            .try_get_matches_from(&self.argv)
            .map_err(|err| Error::SourceConfig(format!("argument parsing failed: {err}")))?;

        let mut values = HashMap::new();
        for field in fields {
            let value = match &field.shape {
                ArgShape::Int => matches
                    .get_one::<i64>(&field.name)
                    .copied()
                    .map(RawValue::Int),
                ArgShape::Float => matches
                    .get_one::<f64>(&field.name)
                    .copied()
                    .map(RawValue::Float),
                ArgShape::Choice(_) | ArgShape::Text => matches
                    .get_one::<String>(&field.name)
                    .cloned()
                    .map(RawValue::Str),
            };
            if let Some(value) = value {
                values.insert(canonical_key(&field.name), value);
            }
        }

        tracing::debug!(source = %self.name, entries = values.len(), "parsed arguments");
        *self.values.write().unwrap_or_else(PoisonError::into_inner) = Some(values);
        Ok(())
    }
}

impl Default for CommandLineSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for CommandLineSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, field: &str) -> Result<Option<RawValue>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let Some(values) = values.as_ref() else {
            return Err(Error::PrematureAccess(self.name.clone()));
        };
        Ok(values.get(&canonical_key(field)).cloned())
    }

    fn reload(&self) -> Result<()> {
        let fields = self
            .fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match fields {
            Some(fields) => self.parse(&fields),
            // Nothing to re-parse before the schema is wired in.
            None => Ok(()),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let Some(values) = values.as_ref() else {
            return Err(Error::PrematureAccess(self.name.clone()));
        };
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn update_with_fields(&self, fields: &[FieldSpec]) -> Result<()> {
        let fields: Vec<FieldArg> = fields
            .iter()
            .map(|field| {
                let shape = match field.kind() {
                    FieldKind::Int => ArgShape::Int,
                    FieldKind::Float => ArgShape::Float,
                    FieldKind::Enum(spec) => ArgShape::Choice(spec.variant_names()),
                    _ => ArgShape::Text,
                };
                FieldArg {
                    name: field.name().to_owned(),
                    shape,
                }
            })
            .collect();

        self.parse(&fields)?;
        *self.fields.write().unwrap_or_else(PoisonError::into_inner) = Some(fields);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EnumSpec;

    fn fields() -> Vec<FieldSpec> {
        let color = EnumSpec::new(
            "Color",
            vec![
                ("Red", RawValue::Int(0)),
                ("Green", RawValue::Int(1)),
                ("Blue", RawValue::Int(2)),
            ],
        );
        vec![
            FieldSpec::new("HOST", FieldKind::Str),
            FieldSpec::new("PORT", FieldKind::Int),
            FieldSpec::new("RATIO", FieldKind::Float),
            FieldSpec::new("COLOR", FieldKind::Enum(color)),
        ]
    }

    #[test]
    fn get_before_update_with_fields_is_premature() {
        let source = CommandLineSource::from_args(Vec::<String>::new());
        let error = source.get("HOST").expect_err("unwired source should fail");
        assert!(matches!(error, Error::PrematureAccess(_)));
    }

    #[test]
    fn registers_one_option_per_field_with_typed_parsers() {
        let source = CommandLineSource::from_args([
            "--HOST",
            "clihost",
            "--PORT",
            "9000",
            "--RATIO",
            "0.5",
            "--COLOR",
            "Blue",
        ]);
        source.update_with_fields(&fields()).unwrap();

        assert_eq!(source.get("host").unwrap(), Some(RawValue::from("clihost")));
        assert_eq!(source.get("PORT").unwrap(), Some(RawValue::Int(9000)));
        assert_eq!(source.get("RATIO").unwrap(), Some(RawValue::Float(0.5)));
        assert_eq!(source.get("COLOR").unwrap(), Some(RawValue::from("Blue")));
    }

    #[test]
    fn absent_flags_resolve_to_nothing() {
        let source = CommandLineSource::from_args(["--HOST", "clihost"]);
        source.update_with_fields(&fields()).unwrap();
        assert_eq!(source.get("PORT").unwrap(), None);
    }

    #[test]
    fn enum_fields_restrict_choices_to_variant_names() {
        let source = CommandLineSource::from_args(["--COLOR", "Purple"]);
        let error = source
            .update_with_fields(&fields())
            .expect_err("unknown variant should fail");
        assert!(matches!(error, Error::SourceConfig(_)));
    }

    #[test]
    fn numeric_fields_reject_non_numbers() {
        let source = CommandLineSource::from_args(["--PORT", "eighty"]);
        let error = source
            .update_with_fields(&fields())
            .expect_err("non-numeric value should fail");
        assert!(matches!(error, Error::SourceConfig(_)));
    }

    #[test]
    fn extends_an_externally_supplied_command() {
        let base = Command::new("app").arg(
            Arg::new("verbose")
                .long("verbose")
                .action(ArgAction::SetTrue),
        );
        let source = CommandLineSource::from_args(["--verbose", "--HOST", "clihost"])
            .with_base_command(base);
        source.update_with_fields(&fields()).unwrap();

        assert_eq!(source.get("HOST").unwrap(), Some(RawValue::from("clihost")));
        // The external option is not part of the field mapping.
        assert_eq!(source.get("verbose").unwrap(), None);
    }
}
