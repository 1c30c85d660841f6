use crate::errors::{CliError, Result};
use stackup_core::config::{STACK_FILE_NAMES, find_stack_file};
use std::path::PathBuf;

pub struct Config {}

impl Config {
    /// Resolve the stack file from the CLI option or search upward from the cwd
    pub fn resolve_stack_path(file: &Option<String>) -> Result<PathBuf> {
        match file {
            Some(path) => {
                let path = PathBuf::from(path);
                if path.exists() {
                    Ok(path)
                } else {
                    Err(CliError::StackNotFound(path))
                }
            }
            None => {
                let cwd = std::env::current_dir()?;
                find_stack_file(&cwd)
                    .ok_or_else(|| CliError::StackNotFound(PathBuf::from(STACK_FILE_NAMES[0])))
            }
        }
    }
}
