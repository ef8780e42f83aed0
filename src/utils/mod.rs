//! 工具模块

pub mod logger;
pub mod cookie;
pub mod etag;
pub mod mime;
