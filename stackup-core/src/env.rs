use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use crate::config::ConfigSnapshot;
use crate::errors::{Result, StackError};

/// Pre-compiled regex for environment variable expansion
static ENV_VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
});

static ENV_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap()
});

/// Expand `${VAR}` references in a string. Unknown variables expand to "".
pub fn expand_env(s: &str, env: &BTreeMap<String, String>) -> String {
    ENV_VAR_REGEX
        .replace_all(s, |caps: &regex::Captures| {
            env.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Parse env file contents.
///
/// Format: `KEY=VALUE` per line. Blank lines and lines whose first non-blank
/// character is `#` are ignored. The value is the literal text after the first
/// `=`; no quoting or escaping is interpreted.
pub fn parse_env(contents: &str, path: &Path) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();

    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(StackError::EnvFileParse {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: "expected KEY=VALUE".to_string(),
            });
        };

        let key = key.trim_end();
        if !ENV_KEY_REGEX.is_match(key) {
            return Err(StackError::EnvFileParse {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: format!("invalid variable name '{}'", key),
            });
        }

        env.insert(key.to_string(), value.trim_end_matches('\r').to_string());
    }

    Ok(env)
}

/// Load environment variables from an env file
pub fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Err(StackError::EnvFileNotFound(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    parse_env(&contents, path)
}

/// Build the full environment for a local service process
///
/// Priority (highest to lowest):
/// 1. Service-defined `environment` entries
/// 2. The snapshot environment (process env overlaid by the env file)
pub fn build_service_env(
    snapshot: &ConfigSnapshot,
    service_env: &BTreeMap<String, String>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = snapshot
        .env_map()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (key, value) in service_env {
        env.insert(key.clone(), value.clone());
    }

    env
}
