use thiserror::Error;

#[derive(Debug, Error)]
pub enum PapermetaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No documents found: {0}")]
    NoDocuments(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
