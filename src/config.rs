use std::{env, path::PathBuf, time::Duration};

use thiserror::Error;

const DEFAULT_FDC_BASE_URL: &str = "https://api.nal.usda.gov/fdc/v1";
const DEFAULT_MODEL_PATH: &str = "./model/frozen_graph.pb";
const DEFAULT_CLASS_LIST_PATH: &str = "./model/classes.txt";
const DEFAULT_IMAGE_DIR: &str = "./images";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub fdc_api_key: String,
    pub fdc_base_url: String,
    pub model_path: PathBuf,
    pub class_list_path: PathBuf,
    pub model_input_op: String,
    pub model_output_op: String,
    pub image_dir: PathBuf,
    pub port: u16,
    pub body_limit_bytes: usize,
    pub http_timeout: Duration,
    pub model_url: Option<String>,
    pub class_list_url: Option<String>,
    pub artifact_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values are
    /// treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let fdc_api_key = get("FDC_API_KEY").ok_or(ConfigError::Missing("FDC_API_KEY"))?;

        let body_limit_bytes = {
            let raw = get("BODY_LIMIT_MB");
            let mb = parse_or("BODY_LIMIT_MB", raw.clone(), 10usize, "a valid integer")?;
            mb.checked_mul(1024 * 1024)
                .ok_or_else(|| ConfigError::Invalid {
                    key: "BODY_LIMIT_MB",
                    expected: "a size in megabytes that fits in memory",
                    value: raw.unwrap_or_default(),
                })?
        };

        let port = parse_or(
            "PORT",
            get("PORT"),
            5000u16,
            "a valid number between 0 and 65535",
        )?;

        let timeout_secs = parse_or(
            "HTTP_TIMEOUT_SECS",
            get("HTTP_TIMEOUT_SECS"),
            10u64,
            "a positive number of seconds",
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "HTTP_TIMEOUT_SECS",
                expected: "a positive number of seconds",
                value: "0".into(),
            });
        }

        Ok(Config {
            fdc_api_key,
            fdc_base_url: get("FDC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_FDC_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            model_path: get("MODEL_PATH")
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.into())
                .into(),
            class_list_path: get("CLASS_LIST_PATH")
                .unwrap_or_else(|| DEFAULT_CLASS_LIST_PATH.into())
                .into(),
            model_input_op: get("MODEL_INPUT_OP").unwrap_or_else(|| "x".into()),
            model_output_op: get("MODEL_OUTPUT_OP").unwrap_or_else(|| "Identity".into()),
            image_dir: get("IMAGE_DIR")
                .unwrap_or_else(|| DEFAULT_IMAGE_DIR.into())
                .into(),
            port,
            body_limit_bytes,
            http_timeout: Duration::from_secs(timeout_secs),
            model_url: get("MODEL_URL"),
            class_list_url: get("CLASS_LIST_URL"),
            artifact_token: get("ARTIFACT_TOKEN"),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected,
            value,
        }),
    }
}
