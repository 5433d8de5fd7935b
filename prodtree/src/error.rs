use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config not found: {0}")]
    ConfigMissing(String),

    #[error("Node not found: {0}")]
    NodeMissing(String),

    #[error("Duplicate name: {name} under {parent}")]
    DuplicateName { parent: String, name: String },

    #[error("No meaning for depth {depth} at {path}")]
    NoMeaning { depth: u32, path: String },

    #[error("Naming error: {0}")]
    Naming(String),

    #[error("Structure error: {0}")]
    Structure(String),

    #[error("Disk mapping error: {0}")]
    DiskMapping(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;
