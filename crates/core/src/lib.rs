pub mod config;
pub mod error;
pub mod import;

pub use config::{
    CollectionSpec, CollectorDefinition, CollectorsFile, CommandSource, ExitCodePolicy,
    FieldMapping, FieldSpec, FieldType, SinkKind, StoreKind, RESERVED_COLUMNS,
};
pub use error::*;
pub use import::{DefaultFetcher, ImportFetcher, ImportResolver};
