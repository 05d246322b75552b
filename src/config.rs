//! 起動時設定。環境変数から読み込む。
//!
//! | 変数 | 既定値 | 意味 |
//! |------|--------|------|
//! | `USH_MAX_JOBS` | 16 | ジョブテーブルのスロット数 |
//! | `USH_MAX_STAGES` | 16 | 1 パイプラインあたりの最大ステージ数 |
//! | `USH_PROMPT` | `ush> ` | プロンプト文字列 |
//! | `USH_LOG` | `warn` | 診断ログのレベル（`off`〜`trace`） |
//!
//! 不正な値はその変数だけ既定値に戻し、[`ConfigError`] として呼び出し側に返す。

use std::env;

use log::LevelFilter;
use thiserror::Error;

pub const DEFAULT_MAX_JOBS: usize = 16;
pub const DEFAULT_MAX_STAGES: usize = 16;
pub const DEFAULT_PROMPT: &str = "ush> ";

/// 数値設定の上限。
const LIMIT: usize = 4096;

#[derive(Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("{key}: `{value}` is not a number")]
    NotANumber { key: &'static str, value: String },

    #[error("{key}: {value} is out of range (1..=4096)")]
    OutOfRange { key: &'static str, value: usize },

    #[error("USH_LOG: unknown level `{0}`")]
    UnknownLevel(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub max_jobs: usize,
    pub max_stages: usize,
    pub prompt: String,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            max_stages: DEFAULT_MAX_STAGES,
            prompt: DEFAULT_PROMPT.to_string(),
            log_level: LevelFilter::Warn,
        }
    }
}

impl Config {
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// `lookup` で変数を引いて設定を組み立てる。
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<ConfigError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut errors = Vec::new();

        let mut count = |key: &'static str, default: usize| match lookup(key) {
            None => default,
            Some(raw) => match parse_count(key, &raw) {
                Ok(n) => n,
                Err(err) => {
                    errors.push(err);
                    default
                }
            },
        };
        config.max_jobs = count("USH_MAX_JOBS", DEFAULT_MAX_JOBS);
        config.max_stages = count("USH_MAX_STAGES", DEFAULT_MAX_STAGES);

        if let Some(prompt) = lookup("USH_PROMPT") {
            config.prompt = prompt;
        }
        if let Some(level) = lookup("USH_LOG") {
            match level.trim().parse::<LevelFilter>() {
                Ok(level) => config.log_level = level,
                Err(_) => errors.push(ConfigError::UnknownLevel(level)),
            }
        }

        (config, errors)
    }
}

fn parse_count(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    let value = raw
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::NotANumber {
            key,
            value: raw.to_string(),
        })?;
    if value == 0 || value > LIMIT {
        return Err(ConfigError::OutOfRange { key, value });
    }
    Ok(value)
}
