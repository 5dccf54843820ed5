#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid SQL template: {0}")]
    Template(String),

    #[error("Unable to compute tile geometry: {0}")]
    Geometry(String),

    #[error("Unable to bind query parameter {token}: {reason}")]
    ParameterBinding { token: String, reason: String },

    #[error("Unable to decode column {column}: {reason}")]
    Decode { column: String, reason: String },

    #[error("No layer named {0}")]
    UnknownLayer(String),

    #[error("Invalid YAML in provider config.")]
    Config(#[from] serde_yaml::Error),

    #[error("Invalid provider config: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    pub(crate) fn decode(column: &str, reason: impl Into<String>) -> Error {
        Error::Decode {
            column: column.to_owned(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
