use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read \"{0}\": {1}")]
    Io(String, #[source] std::io::Error),

    #[error("{0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
