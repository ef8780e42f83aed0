//! 服务器配置
//!
//! 分层加载：TOML 文件 < 环境变量 < 命令行覆盖。只在启动时读取一次。
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! max_body_size = 1048576
//!
//! [compression]
//! min_size = 1024
//!
//! [static_files]
//! dir = "./public"
//! immutable = ['\.[0-9a-f]{8}\.(js|css)$']
//!
//! [log]
//! level = "debug"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::compression::CompressionConfig;
use crate::error::{RatError, RatResult};
use crate::server::body_parser::DEFAULT_MAX_BODY_SIZE;
use crate::server::static_files::StaticOptions;
use crate::utils::logger::{LogConfig, LogLevel};

/// 静态文件配置
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    pub dir: PathBuf,
    #[serde(default)]
    pub url_prefix: String,
    /// 不可变文件的正则（匹配完整文件路径）
    #[serde(default)]
    pub immutable: Vec<String>,
    #[serde(default)]
    pub strip_html_suffix: bool,
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

fn default_index_file() -> String {
    "index.html".to_string()
}

impl StaticConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: String::new(),
            immutable: Vec::new(),
            strip_html_suffix: false,
            index_file: default_index_file(),
        }
    }

    /// 转换为缓存构建选项
    pub fn to_options(&self) -> RatResult<StaticOptions> {
        let mut options = StaticOptions::new()
            .url_prefix(&self.url_prefix)
            .strip_html_suffix(self.strip_html_suffix)
            .index_file(self.index_file.clone());
        for pattern in &self.immutable {
            options = options.immutable_pattern(pattern)?;
        }
        Ok(options)
    }
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 请求体上限（字节）
    pub max_body_size: usize,
    /// 连接空闲超时（秒），0 表示不超时
    pub idle_timeout_secs: u64,
    /// 健康检查路径
    pub health_path: String,
    pub compression: CompressionConfig,
    pub static_files: Option<StaticConfig>,
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            idle_timeout_secs: 60,
            health_path: "/healthz".to_string(),
            compression: CompressionConfig::default(),
            static_files: None,
            log: LogConfig::default(),
        }
    }
}

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub static_dir: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> RatResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RatError::Config(format!("环境变量 {}={} 无效: {}", key, value, e)))
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// 监听地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn from_toml_str(content: &str) -> RatResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> RatResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RatError::Config(format!("无法读取配置文件 {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// 应用 `RAT_*` 环境变量
    pub fn apply_env_vars<I>(&mut self, vars: I) -> RatResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "RAT_HOST" => self.host = value,
                "RAT_PORT" => self.port = parse_env(&key, &value)?,
                "RAT_MAX_BODY_SIZE" => self.max_body_size = parse_env(&key, &value)?,
                "RAT_LOG_LEVEL" => self.log.level = parse_env(&key, &value)?,
                "RAT_STATIC_DIR" => match &mut self.static_files {
                    Some(static_files) => static_files.dir = PathBuf::from(value),
                    None => self.static_files = Some(StaticConfig::new(value)),
                },
                _ => {}
            }
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        if let Some(dir) = &overrides.static_dir {
            match &mut self.static_files {
                Some(static_files) => static_files.dir = dir.clone(),
                None => self.static_files = Some(StaticConfig::new(dir.clone())),
            }
        }
    }

    /// 文件 → 环境变量 → 命令行覆盖
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> RatResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_vars(std::env::vars())?;
        config.apply_overrides(overrides);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_toml_with_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            port = 9000

            [compression]
            min_size = 2048

            [static_files]
            dir = "./public"
            immutable = ['\.[0-9a-f]{8}\.js$']
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert_eq!(config.compression.min_size, 2048);
        assert_eq!(config.compression.level, 6);
        let static_files = config.static_files.unwrap();
        assert_eq!(static_files.index_file, "index.html");
        assert_eq!(static_files.to_options().unwrap().immutable.len(), 1);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(ServerConfig::from_toml_str("port = \"eighty\"").is_err());
    }

    #[test]
    fn test_layering() {
        let mut config = ServerConfig::default();
        config
            .apply_env_vars(vars(&[
                ("RAT_PORT", "3000"),
                ("RAT_HOST", "0.0.0.0"),
                ("RAT_STATIC_DIR", "/srv/www"),
                ("RAT_LOG_LEVEL", "debug"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.static_files.as_ref().unwrap().dir, PathBuf::from("/srv/www"));
        assert_eq!(config.log.level, LogLevel::Debug);

        config.apply_overrides(&ConfigOverrides {
            port: Some(4000),
            ..Default::default()
        });
        assert_eq!(config.port, 4000);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = ServerConfig::default();
        assert!(config.apply_env_vars(vars(&[("RAT_PORT", "not-a-port")])).is_err());
    }

    #[test]
    fn test_idle_timeout() {
        let mut config = ServerConfig::default();
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
        config.idle_timeout_secs = 0;
        assert!(config.idle_timeout().is_none());
    }
}
