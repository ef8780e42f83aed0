//! RAT WebCore
//!
//! 可嵌入的 HTTP 服务器内核，直接构建在 tokio 套接字与 hyper HTTP/1.1 连接之上：
//!
//! - 路由器：按方法分表、插入顺序优先、`ALL` 兜底表、CORS 预检方法内省
//! - 中间件链：严格顺序执行，`next` 返回后才继续执行后续代码
//! - CORS / CSRF / 安全响应头 / 请求体解析中间件
//! - 静态文件缓存：启动时一次性扫描、预计算 ETag 与 gzip 压缩体
//! - SSE 通道：把一次响应转换为长连接事件流
//! - 响应发射器：ETag 协商、gzip 流式压缩、Server-Timing 汇总
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rat_webcore::server::{HttpServer, Router, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> rat_webcore::RatResult<()> {
//!     let mut router = Router::new("/api");
//!     router.get("/users/:id", |req, res| Box::pin(async move {
//!         let id = req.param("id").unwrap_or_default().to_string();
//!         res.json(serde_json::json!({ "id": id }));
//!         Ok(())
//!     }))?;
//!
//!     let mut server = HttpServer::new(ServerConfig::default());
//!     server.add_router(Arc::new(router));
//!     let server = Arc::new(server);
//!     server.listen().await?;
//!     server.serve().await
//! }
//! ```

pub mod error;
pub mod utils;
pub mod compression;
pub mod server;

pub use error::{HandlerError, HandlerResult, RatError, RatResult};
pub use server::{
    HttpRequest, HttpResponse, HttpServer, Router, ServerConfig, StaticFileCache, SseChannel,
};

// 重新导出常用的 hyper 类型，方便上层直接使用
pub use hyper::{HeaderMap, Method, StatusCode};
pub use bytes::Bytes;
