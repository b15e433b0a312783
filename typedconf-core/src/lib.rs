pub mod convert;
pub mod enums;
pub mod error;
pub mod logging;
pub mod registry;
pub mod resolve;
pub mod schema;
pub mod sources;
pub mod value;

pub use convert::{csv_list, csv_pairs, quote_stripped, to_bool, EnumRegistry};
pub use error::{Error, Result};
pub use registry::{ConfigHandle, ConfigRegistry};
pub use resolve::{resolve, ResolvedValues};
pub use schema::{
    ConfigClass, Converter, EnumSpec, FieldKind, FieldSpec, Schema, Validator,
};
pub use sources::{
    CommandLineSource, ConsulSource, EnvironmentSource, FileFormat, FileSource, Source,
};
pub use value::{ConfigValue, RawValue};
