//! Configuration validation utilities.

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),

    /// Custom label names and values have different lengths.
    #[error("custom label mismatch: {names} names but {values} values")]
    LabelMismatch { names: usize, values: usize },
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Check a Prometheus label name (`[a-zA-Z_][a-zA-Z0-9_]*`).
///
/// Names starting with `__` are reserved for internal use and rejected.
pub fn validate_label_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("label name cannot be empty".to_string());
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(format!("invalid label name '{}'", name));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid label name '{}'", name));
    }
    if name.starts_with("__") {
        return Err(format!("label name '{}' is reserved", name));
    }
    Ok(())
}

/// Check a scrape address of the form `host:port`.
pub fn validate_address(address: &str) -> Result<(), String> {
    if address.contains("://") || address.contains('/') {
        return Err(format!(
            "target '{}' must be host:port without scheme or path",
            address
        ));
    }
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(format!("target '{}' is missing a port", address));
    };
    if host.is_empty() {
        return Err(format!("target '{}' is missing a host", address));
    }
    port.parse::<u16>()
        .map_err(|_| format!("target '{}' has invalid port '{}'", address, port))?;
    Ok(())
}
