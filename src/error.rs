//! 错误类型模块
//!
//! - [`RatError`]：启动/配置/运行期错误
//! - [`HandlerError`]：中间件与端点回调向上抛出的错误，由路由器顶层统一转换为 HTTP 响应

use hyper::StatusCode;
use thiserror::Error;

/// 引擎级错误
#[derive(Debug, Error)]
pub enum RatError {
    /// 配置错误（例如 CORS 通配符与凭证同时启用）
    #[error("配置错误: {0}")]
    Config(String),

    /// 路由模式编译失败
    #[error("路由模式错误: {0}")]
    Pattern(String),

    /// 静态文件缓存构建失败
    #[error("静态文件错误: {0}")]
    StaticFiles(String),

    /// IO 错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP 错误
    #[error("HTTP错误: {0}")]
    Hyper(#[from] hyper::Error),

    /// 配置文件解析错误
    #[error("解析错误: {0}")]
    Toml(#[from] toml::de::Error),
}

/// 引擎结果类型
pub type RatResult<T> = Result<T, RatError>;

/// 请求处理错误
///
/// 任何中间件或端点回调都可以返回该错误来中止处理链：
///
/// - `Http`：携带状态码与消息，原样返回给客户端
/// - `Redirect`：转换为重定向响应
/// - `Internal`：未分类错误，记录完整日志后以 500 + 通用消息返回，不泄露内部信息
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{status}: {message}")]
    Http { status: StatusCode, message: String },

    #[error("重定向 {status} -> {location}")]
    Redirect {
        status: StatusCode,
        location: String,
        message: String,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// 构造带状态码的 HTTP 错误
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::http(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::http(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::http(StatusCode::NOT_FOUND, message)
    }

    /// 构造重定向；`status` 应为 3xx
    pub fn redirect(status: StatusCode, location: impl Into<String>) -> Self {
        let location = location.into();
        Self::Redirect {
            status,
            message: format!("Redirecting to {}", location),
            location,
        }
    }

    /// 该错误最终对应的状态码
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } | Self::Redirect { status, .. } => *status,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// 中间件与端点回调的返回类型
pub type HandlerResult = Result<(), HandlerError>;
