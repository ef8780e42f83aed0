//! 压缩模块
//!
//! 只支持 gzip：静态文件缓存启动时预压缩，响应发射器按 Accept-Encoding 流式压缩

pub mod types;
pub mod config;
pub mod compressor;

// 重新导出主要的公共类型
pub use types::CompressionType;
pub use config::CompressionConfig;
pub use compressor::{gzip_bytes, gzip_stream};
