//! CORS (跨域资源共享) 守卫
//!
//! [`CorsConfig`] 描述策略，[`CorsGuard`] 是校验后的中间件：
//! 预检请求在这里直接应答，普通跨域请求补充响应头后继续处理链。

use async_trait::async_trait;
use hyper::{Method, StatusCode};
use regex::Regex;

use crate::error::{HandlerError, HandlerResult, RatError, RatResult};
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::middleware::{Middleware, Next};
use crate::utils::logger::debug;

/// 允许列表：任意 (`*`) 或显式列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowList<T> {
    Any,
    List(Vec<T>),
}

impl<T> AllowList<T> {
    pub fn is_any(&self) -> bool {
        matches!(self, AllowList::Any)
    }
}

/// CORS 配置
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// 允许的来源 (列表项支持 `*` 通配，例如 `https://*.example.com`)
    pub allowed_origins: AllowList<String>,
    /// 允许的 HTTP 方法
    pub allowed_methods: AllowList<Method>,
    /// 允许的请求头
    pub allowed_headers: AllowList<String>,
    /// 暴露的响应头
    pub exposed_headers: Vec<String>,
    /// 是否允许携带认证信息
    pub allow_credentials: bool,
    /// 预检请求缓存时间（秒）
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowList::Any,
            allowed_methods: AllowList::List(vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
                Method::HEAD,
                Method::PATCH,
            ]),
            allowed_headers: AllowList::List(vec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "X-Requested-With".to_string(),
            ]),
            exposed_headers: vec![],
            allow_credentials: false,
            max_age: Some(86400), // 24小时
        }
    }
}

impl CorsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置允许的来源；包含 `"*"` 时等同于任意来源
    pub fn allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let origins: Vec<String> = origins.into_iter().map(Into::into).collect();
        self.allowed_origins = if origins.iter().any(|o| o == "*") {
            AllowList::Any
        } else {
            AllowList::List(origins)
        };
        self
    }

    /// 设置允许的方法
    pub fn allowed_methods<I, M>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Method>,
    {
        self.allowed_methods = AllowList::List(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn allow_any_method(mut self) -> Self {
        self.allowed_methods = AllowList::Any;
        self
    }

    /// 设置允许的头部；包含 `"*"` 时等同于任意头部
    pub fn allowed_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        self.allowed_headers = if headers.iter().any(|h| h == "*") {
            AllowList::Any
        } else {
            AllowList::List(headers)
        };
        self
    }

    /// 设置暴露的头部
    pub fn exposed_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exposed_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// 设置是否允许携带认证信息
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// 设置预检请求缓存时间
    pub fn max_age(mut self, age: u64) -> Self {
        self.max_age = Some(age);
        self
    }
}

#[derive(Debug)]
enum OriginRule {
    Exact(String),
    Pattern(Regex),
}

/// CORS 中间件
#[derive(Debug)]
pub struct CorsGuard {
    config: CorsConfig,
    origin_rules: Vec<OriginRule>,
}

impl CorsGuard {
    /// 校验配置并编译来源规则
    ///
    /// 允许凭证时任何一项都不能是 `*`。
    pub fn new(config: CorsConfig) -> RatResult<Self> {
        if config.allow_credentials
            && (config.allowed_origins.is_any() || config.allowed_methods.is_any() || config.allowed_headers.is_any())
        {
            return Err(RatError::Config("CORS 允许凭证时来源、方法、头部都不能使用通配符 '*'".to_string()));
        }

        let mut origin_rules = Vec::new();
        if let AllowList::List(origins) = &config.allowed_origins {
            for origin in origins {
                if origin.contains('*') {
                    let pattern = origin.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
                    let regex = Regex::new(&format!("^{}$", pattern))
                        .map_err(|e| RatError::Config(format!("非法的 CORS 来源模式 '{}': {}", origin, e)))?;
                    origin_rules.push(OriginRule::Pattern(regex));
                } else {
                    origin_rules.push(OriginRule::Exact(origin.clone()));
                }
            }
        }

        Ok(Self { config, origin_rules })
    }

    pub fn config(&self) -> &CorsConfig {
        &self.config
    }

    /// 是否为 CORS 预检请求
    pub fn is_preflight(req: &HttpRequest) -> bool {
        req.method() == Method::OPTIONS && req.header("access-control-request-method").is_some()
    }

    /// 检查来源是否被允许
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.config.allowed_origins.is_any() {
            return true;
        }
        self.origin_rules.iter().any(|rule| match rule {
            OriginRule::Exact(allowed) => allowed == origin,
            OriginRule::Pattern(regex) => regex.is_match(origin),
        })
    }

    pub fn is_method_allowed(&self, method: &str) -> bool {
        match &self.config.allowed_methods {
            AllowList::Any => true,
            AllowList::List(methods) => methods.iter().any(|m| m.as_str().eq_ignore_ascii_case(method)),
        }
    }

    fn set_allow_origin(&self, res: &mut HttpResponse, origin: &str) {
        if self.config.allowed_origins.is_any() && !self.config.allow_credentials {
            res.set_header("access-control-allow-origin", "*");
        } else {
            res.set_header("access-control-allow-origin", origin);
            res.append_header("vary", "Origin");
        }
        if self.config.allow_credentials {
            res.set_header("access-control-allow-credentials", "true");
        }
    }

    fn preflight(&self, req: &HttpRequest, res: &mut HttpResponse) -> HandlerResult {
        let origin = match req.header("origin") {
            Some(origin) if self.is_origin_allowed(origin) => origin.to_string(),
            other => {
                debug!("🔍 [CORS] 拒绝预检请求，来源不被允许: {:?}", other);
                return Err(HandlerError::bad_request("CORS origin not allowed"));
            }
        };
        let requested_method = req.header("access-control-request-method").unwrap_or("");
        if !self.is_method_allowed(requested_method) {
            debug!("🔍 [CORS] 拒绝预检请求，方法不被允许: {}", requested_method);
            return Err(HandlerError::bad_request("CORS method not allowed"));
        }

        self.set_allow_origin(res, &origin);

        let methods = match &self.config.allowed_methods {
            AllowList::Any => requested_method.to_string(),
            AllowList::List(methods) => methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", "),
        };
        res.set_header("access-control-allow-methods", &methods);

        let headers = match &self.config.allowed_headers {
            AllowList::Any => req.header("access-control-request-headers").unwrap_or("*").to_string(),
            AllowList::List(headers) => headers.join(", "),
        };
        if !headers.is_empty() {
            res.set_header("access-control-allow-headers", &headers);
        }
        if let Some(max_age) = self.config.max_age {
            res.set_header("access-control-max-age", &max_age.to_string());
        }

        res.status(StatusCode::NO_CONTENT);
        debug!("✅ [CORS] 预检通过: {} {}", origin, requested_method);
        Ok(())
    }
}

#[async_trait]
impl Middleware for CorsGuard {
    async fn handle(&self, req: &mut HttpRequest, res: &mut HttpResponse, next: Next<'_>) -> HandlerResult {
        if Self::is_preflight(req) {
            return self.preflight(req, res);
        }

        let allowed_origin = req
            .header("origin")
            .filter(|origin| self.is_origin_allowed(origin))
            .map(str::to_string);
        if let Some(origin) = allowed_origin {
            self.set_allow_origin(res, &origin);
            if !self.config.exposed_headers.is_empty() {
                res.set_header("access-control-expose-headers", &self.config.exposed_headers.join(", "));
            }
        }

        next.run(req, res).await
    }

    fn name(&self) -> &str {
        "CorsGuard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preflight_req(origin: &str, method: &str) -> HttpRequest {
        HttpRequest::new(Method::OPTIONS, "/api/items")
            .with_header("Origin", origin)
            .with_header("Access-Control-Request-Method", method)
    }

    #[test]
    fn test_credentials_with_wildcard_rejected() {
        assert!(CorsGuard::new(CorsConfig::new().allow_credentials(true)).is_err());
        let ok = CorsConfig::new()
            .allowed_origins(["https://app.example.com"])
            .allow_credentials(true);
        assert!(CorsGuard::new(ok).is_ok());
    }

    #[test]
    fn test_origin_patterns() {
        let guard = CorsGuard::new(CorsConfig::new().allowed_origins(["https://*.example.com", "http://localhost:3000"])).unwrap();
        assert!(guard.is_origin_allowed("https://api.example.com"));
        assert!(guard.is_origin_allowed("http://localhost:3000"));
        assert!(!guard.is_origin_allowed("https://example.org"));
        assert!(!guard.is_origin_allowed("https://api.exampleXcom"));
    }

    #[test]
    fn test_preflight_accepted() {
        let guard = CorsGuard::new(CorsConfig::new().allowed_origins(["https://app.example.com"])).unwrap();
        let req = preflight_req("https://app.example.com", "PUT");
        let mut res = HttpResponse::new();
        guard.preflight(&req, &mut res).unwrap();

        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
        assert_eq!(res.header("access-control-allow-origin"), Some("https://app.example.com"));
        assert_eq!(res.header("vary"), Some("Origin"));
        assert_eq!(res.header("access-control-max-age"), Some("86400"));
        assert_eq!(
            res.header("access-control-allow-methods"),
            Some("GET, POST, PUT, DELETE, OPTIONS, HEAD, PATCH")
        );
        assert_eq!(
            res.header("access-control-allow-headers"),
            Some("Content-Type, Authorization, X-Requested-With")
        );
    }

    #[test]
    fn test_preflight_rejected() {
        let guard = CorsGuard::new(
            CorsConfig::new()
                .allowed_origins(["https://app.example.com"])
                .allowed_methods([Method::GET]),
        )
        .unwrap();

        let mut res = HttpResponse::new();
        let err = guard.preflight(&preflight_req("https://evil.example.net", "GET"), &mut res).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = guard.preflight(&preflight_req("https://app.example.com", "DELETE"), &mut res).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_is_preflight() {
        assert!(CorsGuard::is_preflight(&preflight_req("https://a.test", "GET")));
        assert!(!CorsGuard::is_preflight(&HttpRequest::new(Method::OPTIONS, "/").with_header("Origin", "https://a.test")));

        // 缺少 Origin 仍按预检处理，由 preflight 拒绝
        let no_origin = HttpRequest::new(Method::OPTIONS, "/api/items").with_header("Access-Control-Request-Method", "GET");
        assert!(CorsGuard::is_preflight(&no_origin));
        let guard = CorsGuard::new(CorsConfig::new()).unwrap();
        let err = guard.preflight(&no_origin, &mut HttpResponse::new()).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
