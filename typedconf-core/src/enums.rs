//! Common configuration enums provided for convenience; any enum works as
//! long as a matching [`EnumSpec`] is declared on the schema.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::schema::EnumSpec;
use crate::value::RawValue;

/// Common deployment environment names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Test,
    Development,
}

impl Environment {
    pub fn spec() -> EnumSpec {
        EnumSpec::new(
            "Environment",
            vec![
                ("Production", RawValue::Int(0)),
                ("Staging", RawValue::Int(1)),
                ("Test", RawValue::Int(2)),
                ("Development", RawValue::Int(3)),
            ],
        )
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_uppercase().as_str() {
            "PRODUCTION" => Ok(Self::Production),
            "STAGING" => Ok(Self::Staging),
            "TEST" => Ok(Self::Test),
            "DEVELOPMENT" => Ok(Self::Development),
            _ => Err(Error::InvalidValue(format!(
                "'{value}' is not an Environment variant"
            ))),
        }
    }
}

/// Log verbosity levels, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn spec() -> EnumSpec {
        EnumSpec::new(
            "LogLevel",
            vec![
                ("Trace", RawValue::Int(0)),
                ("Debug", RawValue::Int(1)),
                ("Info", RawValue::Int(2)),
                ("Warn", RawValue::Int(3)),
                ("Error", RawValue::Int(4)),
            ],
        )
    }

    /// The equivalent `tracing` level.
    pub fn as_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_uppercase().as_str() {
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            _ => Err(Error::InvalidValue(format!(
                "'{value}' is not a LogLevel variant"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::EnumRegistry;
    use crate::value::ConfigValue;

    #[test]
    fn log_level_resolves_by_name_and_value() {
        let mut registry = EnumRegistry::new();
        registry.add_enum(&LogLevel::spec());

        let by_name = registry.to_enum("LogLevel", &RawValue::from("info")).unwrap();
        let by_value = registry.to_enum("LogLevel", &RawValue::Int(2)).unwrap();
        assert_eq!(by_name, by_value);
        assert_eq!(
            by_name,
            ConfigValue::Enum {
                name: "LogLevel".to_owned(),
                variant: "Info".to_owned(),
            }
        );

        let level: LogLevel = "Info".parse().unwrap();
        assert_eq!(level.as_level(), tracing::Level::INFO);
    }

    #[test]
    fn environment_round_trips_through_from_str() {
        let environment: Environment = "staging".parse().unwrap();
        assert_eq!(environment, Environment::Staging);
        assert!("prod".parse::<Environment>().is_err());
    }
}
