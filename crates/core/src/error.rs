use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("collection {collection}: {reason}")]
    Invalid { collection: String, reason: String },

    #[error("duplicate collection name: {0}")]
    DuplicateCollection(String),

    #[error("cannot fetch import {location}: {reason}")]
    Fetch { location: String, reason: String },

    #[error("{algorithm} of {location} - sum: {actual} differs from expected: {expected}")]
    Checksum {
        location: String,
        algorithm: String,
        expected: String,
        actual: String,
    },
}

impl ConfigError {
    pub fn invalid(collection: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }
}
