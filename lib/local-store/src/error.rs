use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file is not a JSON object of strings.
    #[error("Store file is corrupt: {0}")]
    CorruptFile(#[source] serde_json::Error),

    #[error("Value of {key} is corrupt: {source}")]
    CorruptValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Timestamp in {key} is corrupt: {source}")]
    CorruptTimestamp {
        key: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Credential in {key} is corrupt")]
    CorruptCredential { key: String },

    #[error("Couldn't encode {key}: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
