//! 日志模块
//!
//! 对 rat_logger 的宏做统一再导出，库内部一律通过 `crate::utils::logger::{debug, info, warn, error}` 记录日志。
//! 库本身从不初始化日志，由嵌入方（或 `rat_webcore` 二进制）调用 [`init_logger`]。

pub use rat_logger::{debug, error, info, warn};

use serde::Deserialize;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_level_filter(self) -> rat_logger::LevelFilter {
        match self {
            Self::Error => rat_logger::LevelFilter::Error,
            Self::Warn => rat_logger::LevelFilter::Warn,
            Self::Info => rat_logger::LevelFilter::Info,
            Self::Debug => rat_logger::LevelFilter::Debug,
            Self::Trace => rat_logger::LevelFilter::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("未知的日志级别: {}", other)),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 是否启用日志
    pub enabled: bool,
    /// 日志级别
    pub level: LogLevel,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
        }
    }
}

/// 安装终端日志输出
pub fn init_logger(config: &LogConfig) -> Result<(), String> {
    if !config.enabled {
        return Ok(());
    }

    rat_logger::LoggerBuilder::new()
        .with_level(config.level.to_level_filter())
        .add_terminal_with_config(rat_logger::handler::term::TermConfig::default())
        .init_global_logger()
        .map_err(|e| format!("日志初始化失败: {:?}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
