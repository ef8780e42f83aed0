//! 压缩配置模块

use std::collections::HashSet;

use serde::Deserialize;

/// 压缩配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// 是否启用响应压缩
    pub enabled: bool,
    /// 最小压缩大小 (字节)
    pub min_size: usize,
    /// 压缩级别 (1-9，越大压缩率越高但速度越慢)
    pub level: u32,
    /// 排除的内容类型（前缀匹配）
    pub excluded_content_types: HashSet<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1024, // 1KB
            level: 6,       // 默认压缩级别
            excluded_content_types: HashSet::from([
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
                "image/avif".to_string(),
                "audio/".to_string(),
                "video/".to_string(),
                "font/woff".to_string(),
                "application/zip".to_string(),
                "application/gzip".to_string(),
                "text/event-stream".to_string(),
            ]),
        }
    }
}

impl CompressionConfig {
    /// 创建新的压缩配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 启用/禁用压缩
    pub fn enable_compression(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 设置最小压缩大小
    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// 设置压缩级别
    pub fn level(mut self, level: u32) -> Self {
        self.level = level.clamp(1, 9);
        self
    }

    /// 追加排除的内容类型
    pub fn exclude_content_types<I, S>(mut self, content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_content_types
            .extend(content_types.into_iter().map(Into::into));
        self
    }

    /// 检查内容类型是否允许压缩
    pub fn should_compress_content_type(&self, content_type: Option<&str>) -> bool {
        let content_type = match content_type {
            Some(ct) => ct.to_ascii_lowercase(),
            None => return true,
        };
        !self
            .excluded_content_types
            .iter()
            .any(|excluded| content_type.starts_with(excluded.as_str()))
    }

    /// 综合判断一个已知长度的响应体是否应当压缩
    pub fn should_compress(&self, len: usize, content_type: Option<&str>) -> bool {
        self.enabled && len >= self.min_size && self.should_compress_content_type(content_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_compress() {
        let config = CompressionConfig::new().min_size(10);
        assert!(config.should_compress(10, Some("application/json")));
        assert!(!config.should_compress(9, Some("application/json")));
        assert!(!config.should_compress(100, Some("image/png")));
        assert!(!config.should_compress(100, Some("video/mp4")));
        assert!(!config.clone().enable_compression(false).should_compress(100, None));
    }
}
