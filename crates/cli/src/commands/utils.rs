use anyhow::{bail, Context, Result};
use serde_json::Value;
use verity_core::{config::AppConfig, dispatch::CallError};

pub fn print_success(message: &str) {
    println!("[SUCCESS] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_info(message: &str) {
    println!("[INFO] {message}");
}

/// Parses positional params given as a JSON array. Absent means no params.
pub fn parse_params(raw: Option<&str>) -> Result<Vec<Value>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<Value>(raw).context("params must be JSON")? {
        Value::Array(params) => Ok(params),
        other => bail!("params must be a JSON array, got {other}"),
    }
}

/// Loads and validates the configuration at `file`.
pub fn load_config(file: &str) -> Result<AppConfig> {
    let config = AppConfig::from_file(file).with_context(|| format!("failed to load {file}"))?;
    config.validate().map_err(anyhow::Error::msg).context("invalid configuration")?;
    Ok(config)
}

/// Prints a failed call with its attempt trail.
pub fn print_call_error(err: &CallError) {
    print_error(&err.to_string());
    for attempt in &err.trail {
        eprintln!(
            "  round {} {} {} ({}ms)",
            attempt.round,
            attempt.node,
            attempt.outcome.as_str(),
            attempt.elapsed.as_millis()
        );
    }
}
