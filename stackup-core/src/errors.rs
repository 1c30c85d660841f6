use std::path::PathBuf;
use thiserror::Error;

/// Format a YAML error for user-friendly display, including the field path
fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = if let Some(loc) = inner.location() {
        format!("Line {}, Column {}: {}", loc.line(), loc.column(), msg)
    } else {
        msg
    };

    if path.is_empty() || path == "." {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Error, Debug)]
pub enum StackError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse stack file '{path}':\n  {}", format_yaml_error(.source))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("Stack file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    #[error("Missing dependency for service {service}: {dependency}")]
    MissingDependency { service: String, dependency: String },

    #[error("Environment file not found: {0}")]
    EnvFileNotFound(PathBuf),

    #[error("Invalid line {line} in environment file {path}: {reason}")]
    EnvFileParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Registry error at '{path}': {message}")]
    Registry { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StackError>;
