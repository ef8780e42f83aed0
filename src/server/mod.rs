//! 服务器模块
//!
//! 请求处理流水线：连接 → [`HttpServer`] → 路由器（中间件链 + 端点）→ 静态文件 → 404，
//! 最后由 [`response_emitter`] 把 [`HttpResponse`] 转换为 hyper 响应。

pub mod body;
pub mod body_parser;
pub mod config;
pub mod cors;
pub mod csrf;
pub mod health;
pub mod http_request;
pub mod http_response;
pub mod http_server;
pub mod middleware;
pub mod path_matcher;
pub mod response_emitter;
pub mod router;
pub mod security_headers;
pub mod socket_registry;
pub mod sse;
pub mod static_files;

pub use body_parser::BodyParser;
pub use config::{ConfigOverrides, ServerConfig, StaticConfig};
pub use cors::{AllowList, CorsConfig, CorsGuard};
pub use csrf::{CsrfConfig, CsrfGuard, CsrfStrategy, HmacAlgorithm};
pub use health::{HealthCheck, HealthRegistry, HealthReport};
pub use http_request::HttpRequest;
pub use http_response::HttpResponse;
pub use http_server::HttpServer;
pub use middleware::{middleware_fn, Endpoint, FnEndpoint, Middleware, Next};
pub use path_matcher::{Matcher, PatternMatcher, RegexMatcher, RouteMatch};
pub use router::{EndpointOptions, RouteMethod, Router};
pub use security_headers::SecurityHeaders;
pub use socket_registry::{ConnectionHandle, SocketRegistry};
pub use sse::{SseChannel, SseEvent, SseOptions};
pub use static_files::{StaticFileCache, StaticOptions};
