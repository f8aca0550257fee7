use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use std::path::Path;

use super::schema::Config;
use crate::error::{ConfigError, Result};

pub async fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        // Try to load from various config files
        .merge(Toml::file("scangate.toml"))
        .merge(Json::file("scangate.json"))
        .merge(Yaml::file("scangate.yaml"))
        .merge(Yaml::file("scangate.yml"))
        // Override with environment variables (SCANGATE_ prefix)
        .merge(Env::prefixed("SCANGATE_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    let config = apply_env_substitutions(config)?;

    Ok(config)
}

pub async fn load_from_path(path: &Path) -> Result<Config> {
    let figment = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
        Figment::new().merge(Toml::file(path))
    } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
        Figment::new().merge(Json::file(path))
    } else if matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    ) {
        Figment::new().merge(Yaml::file(path))
    } else {
        return Err(ConfigError::Parse(
            "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
        )
        .into());
    };

    let config: Config = figment
        .merge(Env::prefixed("SCANGATE_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    let config = apply_env_substitutions(config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.scanner.command.is_empty() {
        return Err(ConfigError::Validation("Scanner command must not be empty".into()).into());
    }

    if config.gateway.copy_chunk_bytes == 0 {
        return Err(ConfigError::Validation("Copy chunk size must be greater than 0".into()).into());
    }

    if config.gateway.max_body_bytes < config.gateway.copy_chunk_bytes {
        return Err(ConfigError::Validation(
            "Maximum body size must be at least one copy chunk".into(),
        )
        .into());
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    config.scanner.command = substitute_env_vars(&config.scanner.command)?;

    for arg in &mut config.scanner.args {
        *arg = substitute_env_vars(arg)?;
    }

    for (_, value) in config.scanner.env.iter_mut() {
        *value = substitute_env_vars(value)?;
    }

    Ok(config)
}

fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(input) {
        let expr = &cap[1];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };

        match std::env::var(name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => match default {
                Some(default) => {
                    result = result.replace(&cap[0], default);
                }
                None => {
                    return Err(ConfigError::EnvVar(format!(
                        "environment variable '{name}' is not set"
                    ))
                    .into());
                }
            },
        }
    }

    Ok(result)
}
