//! 路由模块
//!
//! 每个 HTTP 方法一张有序路由表，注册顺序即优先级，先匹配者胜出。
//! 路径在注册时编译为匹配器；请求分发时先写入路径参数与匹配信息，
//! 再按 "路由器默认中间件 → 路由中间件 → 端点" 的顺序执行处理链。
//! 处理链抛出的 [`HandlerError`] 在这里统一转换为 HTTP 响应。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hyper::{Method, StatusCode};
use serde_json::json;

use crate::error::{HandlerError, HandlerResult, RatResult};
use crate::server::cors::{CorsConfig, CorsGuard};
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::middleware::{BoxFuture, Endpoint, FnEndpoint, Middleware, Next};
use crate::server::path_matcher::{Matcher, PatternMatcher, RouteMatch};
use crate::server::sse::{SseChannel, SseOptions};
use crate::utils::logger::{debug, error, info};

/// 路由方法：具体方法或 ALL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Only(Method),
    All,
}

impl From<Method> for RouteMethod {
    fn from(method: Method) -> Self {
        RouteMethod::Only(method)
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMethod::Only(method) => write!(f, "{}", method),
            RouteMethod::All => write!(f, "ALL"),
        }
    }
}

/// 端点选项
#[derive(Clone, Default)]
pub struct EndpointOptions {
    middleware: Vec<Arc<dyn Middleware>>,
    sse: Option<SseOptions>,
    etag: bool,
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 路由级中间件，在路由器默认中间件之后执行
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// 声明为 SSE 路由：调用端点前创建事件通道，端点通过 `req.sse()` 获取
    pub fn sse(mut self, options: SseOptions) -> Self {
        self.sse = Some(options);
        self
    }

    /// 为该路由的响应计算 ETag 并处理 `If-None-Match`
    pub fn etag(mut self, enabled: bool) -> Self {
        self.etag = enabled;
        self
    }
}

/// 已注册的路由
pub struct Route {
    method: RouteMethod,
    path: String,
    matcher: Arc<dyn Matcher>,
    endpoint: Arc<dyn Endpoint>,
    middleware: Vec<Arc<dyn Middleware>>,
    sse: Option<SseOptions>,
    etag_enabled: bool,
}

impl Route {
    pub fn method(&self) -> &RouteMethod {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn etag_enabled(&self) -> bool {
        self.etag_enabled
    }

    pub fn is_sse(&self) -> bool {
        self.sse.is_some()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("matcher", &self.matcher)
            .field("middleware", &self.middleware.len())
            .field("sse", &self.sse)
            .field("etag_enabled", &self.etag_enabled)
            .finish()
    }
}

/// 写出 `{"error": ..., "code": ...}` 形式的错误响应
pub fn write_error(res: &mut HttpResponse, status: StatusCode, message: &str) {
    res.reset_payload();
    res.status(status);
    res.json(json!({
        "error": message,
        "code": status.as_u16(),
    }));
}

/// 路由器
pub struct Router {
    base_path: String,
    tables: HashMap<RouteMethod, Vec<Route>>,
    default_middleware: Vec<Arc<dyn Middleware>>,
    cors: Option<Arc<CorsGuard>>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("base_path", &self.base_path)
            .field("routes", &self.list_routes())
            .field("default_middleware", &self.default_middleware.len())
            .field("cors", &self.cors.is_some())
            .finish()
    }
}

impl Router {
    /// 创建路由器，`base_path` 为空或 `/` 表示不加前缀
    pub fn new(base_path: &str) -> Self {
        let base_path = base_path.trim_end_matches('/').to_string();
        Self {
            base_path,
            tables: HashMap::new(),
            default_middleware: Vec::new(),
            cors: None,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// 拼接完整路径；已带前缀的路径保持不变
    pub fn full_path(&self, path: &str) -> String {
        if self.base_path.is_empty() {
            return path.to_string();
        }
        if self.owns_path(path) {
            path.to_string()
        } else if path == "/" || path.is_empty() {
            self.base_path.clone()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_path, path)
        } else {
            format!("{}/{}", self.base_path, path)
        }
    }

    /// 路径是否位于本路由器的 `base_path` 之下（按路径段边界，`/api` 不包含 `/apiary`）
    ///
    /// 没有前缀的路由器不声明任何路径。
    pub fn owns_path(&self, path: &str) -> bool {
        !self.base_path.is_empty()
            && (path == self.base_path
                || path
                    .strip_prefix(self.base_path.as_str())
                    .map(|rest| rest.starts_with('/'))
                    .unwrap_or(false))
    }

    pub fn cors_enabled(&self) -> bool {
        self.cors.is_some()
    }

    /// 注册端点（闭包）
    pub fn endpoint<F>(&mut self, method: impl Into<RouteMethod>, path: &str, callback: F, options: EndpointOptions) -> RatResult<&mut Self>
    where
        F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.endpoint_handler(method, path, Arc::new(FnEndpoint::new(callback)), options)
    }

    /// 注册端点（实现了 [`Endpoint`] 的处理器）
    pub fn endpoint_handler(
        &mut self,
        method: impl Into<RouteMethod>,
        path: &str,
        endpoint: Arc<dyn Endpoint>,
        options: EndpointOptions,
    ) -> RatResult<&mut Self> {
        let full_path = self.full_path(path);
        let matcher = PatternMatcher::compile(&full_path)?;
        self.insert_route(method.into(), full_path, Arc::new(matcher), endpoint, options);
        Ok(self)
    }

    /// 使用自定义匹配器注册端点；匹配器收到的是完整请求路径
    pub fn endpoint_with_matcher(
        &mut self,
        method: impl Into<RouteMethod>,
        label: &str,
        matcher: Arc<dyn Matcher>,
        endpoint: Arc<dyn Endpoint>,
        options: EndpointOptions,
    ) -> &mut Self {
        self.insert_route(method.into(), label.to_string(), matcher, endpoint, options);
        self
    }

    fn insert_route(
        &mut self,
        method: RouteMethod,
        path: String,
        matcher: Arc<dyn Matcher>,
        endpoint: Arc<dyn Endpoint>,
        options: EndpointOptions,
    ) {
        info!("📝 [Router] 注册路由: {} {}", method, path);
        let route = Route {
            method: method.clone(),
            path,
            matcher,
            endpoint,
            middleware: options.middleware,
            sse: options.sse,
            etag_enabled: options.etag,
        };
        self.tables.entry(method).or_default().push(route);
    }

    pub fn get<F>(&mut self, path: &str, callback: F) -> RatResult<&mut Self>
    where
        F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.endpoint(Method::GET, path, callback, EndpointOptions::default())
    }

    pub fn post<F>(&mut self, path: &str, callback: F) -> RatResult<&mut Self>
    where
        F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.endpoint(Method::POST, path, callback, EndpointOptions::default())
    }

    pub fn put<F>(&mut self, path: &str, callback: F) -> RatResult<&mut Self>
    where
        F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.endpoint(Method::PUT, path, callback, EndpointOptions::default())
    }

    pub fn patch<F>(&mut self, path: &str, callback: F) -> RatResult<&mut Self>
    where
        F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.endpoint(Method::PATCH, path, callback, EndpointOptions::default())
    }

    pub fn delete<F>(&mut self, path: &str, callback: F) -> RatResult<&mut Self>
    where
        F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.endpoint(Method::DELETE, path, callback, EndpointOptions::default())
    }

    /// 匹配任意方法（在具体方法的路由表之后尝试）
    pub fn all<F>(&mut self, path: &str, callback: F) -> RatResult<&mut Self>
    where
        F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.endpoint(RouteMethod::All, path, callback, EndpointOptions::default())
    }

    /// 添加路由器默认中间件（作用于该路由器的所有路由）
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        debug!("🔧 [Router] 添加默认中间件: {}", middleware.name());
        self.default_middleware.push(middleware);
        self
    }

    /// 启用 CORS：守卫作为默认中间件，并对 base_path 之下未匹配的预检请求返回 400
    pub fn enable_cors(&mut self, config: CorsConfig) -> RatResult<&mut Self> {
        let guard = Arc::new(CorsGuard::new(config)?);
        self.default_middleware.push(guard.clone());
        self.cors = Some(guard);
        info!("🌐 [Router] 已启用 CORS: {}", if self.base_path.is_empty() { "/" } else { self.base_path.as_str() });
        Ok(self)
    }

    /// 已注册的 (方法, 完整路径)，按方法名与注册顺序排列
    pub fn list_routes(&self) -> Vec<(String, String)> {
        let mut methods: Vec<&RouteMethod> = self.tables.keys().collect();
        methods.sort_by_key(|m| m.to_string());
        methods
            .into_iter()
            .flat_map(|m| self.tables[m].iter().map(|r| (r.method.to_string(), r.path.clone())))
            .collect()
    }

    fn find_in(&self, method: &RouteMethod, path: &str) -> Option<(&Route, RouteMatch)> {
        self.tables
            .get(method)?
            .iter()
            .find_map(|route| route.matcher.matches(path).map(|m| (route, m)))
    }

    /// 解析请求对应的路由
    ///
    /// 预检请求按 `Access-Control-Request-Method` 声明的方法查找，HEAD 按 GET 查找，
    /// 其余按请求方法查找；都未命中时回退到 ALL。
    pub fn resolve(&self, req: &HttpRequest) -> Option<(&Route, RouteMatch)> {
        let lookup = if CorsGuard::is_preflight(req) {
            let declared = req.header("access-control-request-method").unwrap_or("");
            Method::from_bytes(declared.trim().as_bytes()).ok()?
        } else if req.method() == Method::HEAD {
            Method::GET
        } else {
            req.method().clone()
        };

        self.find_in(&RouteMethod::Only(lookup), req.path())
            .or_else(|| self.find_in(&RouteMethod::All, req.path()))
    }

    /// 处理请求；未匹配任何路由时返回 `false`
    pub async fn handle_req(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> bool {
        let Some((route, route_match)) = self.resolve(req) else {
            if self.cors.is_some() && CorsGuard::is_preflight(req) && self.owns_path(req.path()) {
                debug!("🔍 [Router] 预检请求没有对应路由: {}", req.path());
                write_error(res, StatusCode::BAD_REQUEST, "No route for preflight request");
                req.set_handled(true);
                return true;
            }
            debug!("🔍 [Router] 未找到匹配路由: {} {}", req.method(), req.path());
            return false;
        };

        debug!("✅ [Router] 匹配到路由: {} {} -> {} {}", req.method(), req.path(), route.method, route.path);
        req.apply_route_match(route_match, route.etag_enabled);
        req.set_handled(true);

        if let Some(options) = &route.sse {
            if req.method() != Method::OPTIONS {
                let channel = SseChannel::new(req, res, options.clone());
                req.set_sse(channel);
            }
        }

        let chain: Vec<Arc<dyn Middleware>> = self
            .default_middleware
            .iter()
            .chain(route.middleware.iter())
            .cloned()
            .collect();

        let result = Next::new(&chain, route.endpoint.as_ref()).run(req, res).await;
        if let Err(err) = result {
            self.translate_error(req, res, err);
        }
        true
    }

    fn translate_error(&self, req: &HttpRequest, res: &mut HttpResponse, err: HandlerError) {
        if let Some(channel) = req.sse() {
            channel.close();
        }
        match err {
            HandlerError::Http { status, message } => {
                debug!("🔍 [Router] 处理链返回 {}: {} {}", status, req.method(), req.path());
                write_error(res, status, &message);
            }
            HandlerError::Redirect { status, location, message } => {
                res.reset_payload();
                res.redirect(status, &location);
                if !message.is_empty() {
                    res.text(message);
                }
            }
            HandlerError::Internal(e) => {
                error!("❌ [Router] 处理请求失败: {} {}: {:?}", req.method(), req.path(), e);
                write_error(res, StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cors::CorsConfig;
    use crate::server::middleware::middleware_fn;

    fn reply(text: &'static str) -> Arc<dyn Endpoint> {
        Arc::new(FnEndpoint::new(move |_req, res| {
            res.text(text);
            Box::pin(async { Ok(()) })
        }))
    }

    fn add(router: &mut Router, method: impl Into<RouteMethod>, path: &str, text: &'static str) {
        router
            .endpoint_handler(method, path, reply(text), EndpointOptions::new())
            .unwrap();
    }

    fn body(res: &HttpResponse) -> String {
        res.body_payload()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    async fn dispatch(router: &Router, req: HttpRequest) -> (bool, HttpRequest, HttpResponse) {
        let mut req = req;
        let mut res = HttpResponse::new();
        let handled = router.handle_req(&mut req, &mut res).await;
        (handled, req, res)
    }

    #[tokio::test]
    async fn test_first_registered_wins() {
        let mut router = Router::new("");
        add(&mut router, Method::GET, "/items/:id", "param");
        add(&mut router, Method::GET, "/items/special", "literal");

        let (handled, _, res) = dispatch(&router, HttpRequest::new(Method::GET, "/items/special")).await;
        assert!(handled);
        assert_eq!(body(&res), "param");
    }

    #[tokio::test]
    async fn test_users_id_scenario() {
        let mut router = Router::new("");
        router
            .get("/users/:id", |req, res| {
                Box::pin(async move {
                    let id = req.param("id").unwrap_or_default().to_string();
                    res.json(json!({ "id": id }));
                    Ok(())
                })
            })
            .unwrap();

        let (handled, req, res) = dispatch(&router, HttpRequest::new(Method::GET, "/users/42")).await;
        assert!(handled);
        assert!(req.is_handled());
        assert_eq!(req.param("id"), Some("42"));
        assert_eq!(req.matched_info::<String>().map(String::as_str), Some("/users/:id"));
        assert_eq!(res.json_payload(), Some(&json!({"id": "42"})));

        let (handled, _, _) = dispatch(&router, HttpRequest::new(Method::GET, "/users")).await;
        assert!(!handled);
    }

    #[tokio::test]
    async fn test_base_path() {
        let mut router = Router::new("/api/");
        add(&mut router, Method::GET, "/status", "up");
        add(&mut router, Method::GET, "/api/version", "v1");

        assert_eq!(router.full_path("/status"), "/api/status");
        assert_eq!(router.full_path("/"), "/api");
        assert_eq!(router.full_path("/apiary"), "/api/apiary");

        let (_, _, res) = dispatch(&router, HttpRequest::new(Method::GET, "/api/status")).await;
        assert_eq!(body(&res), "up");
        let (_, _, res) = dispatch(&router, HttpRequest::new(Method::GET, "/api/version")).await;
        assert_eq!(body(&res), "v1");
        let (handled, _, _) = dispatch(&router, HttpRequest::new(Method::GET, "/status")).await;
        assert!(!handled);
    }

    #[tokio::test]
    async fn test_head_and_all_fallback() {
        let mut router = Router::new("");
        add(&mut router, Method::GET, "/page", "get");
        add(&mut router, RouteMethod::All, "/page", "all");
        add(&mut router, Method::POST, "/page", "post");

        let (_, _, res) = dispatch(&router, HttpRequest::new(Method::HEAD, "/page")).await;
        assert_eq!(body(&res), "get");
        let (_, _, res) = dispatch(&router, HttpRequest::new(Method::POST, "/page")).await;
        assert_eq!(body(&res), "post");
        let (_, _, res) = dispatch(&router, HttpRequest::new(Method::PUT, "/page")).await;
        assert_eq!(body(&res), "all");

        assert_eq!(router.list_routes(), vec![
            ("ALL".to_string(), "/page".to_string()),
            ("GET".to_string(), "/page".to_string()),
            ("POST".to_string(), "/page".to_string()),
        ]);
    }

    #[tokio::test]
    async fn test_preflight_resolution() {
        let mut router = Router::new("/api");
        router
            .enable_cors(CorsConfig::new().allowed_origins(["https://app.example.com"]))
            .unwrap();
        add(&mut router, Method::PUT, "/items/:id", "updated");

        let preflight = |method: &str| {
            HttpRequest::new(Method::OPTIONS, "/api/items/1")
                .with_header("Origin", "https://app.example.com")
                .with_header("Access-Control-Request-Method", method)
        };

        let (handled, _, res) = dispatch(&router, preflight("PUT")).await;
        assert!(handled);
        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
        assert!(!res.has_payload());

        let (handled, _, res) = dispatch(&router, preflight("DELETE")).await;
        assert!(handled);
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.json_payload().unwrap()["code"], 400);
    }

    #[tokio::test]
    async fn test_preflight_outside_base_path_is_unhandled() {
        let mut router = Router::new("/api");
        router.enable_cors(CorsConfig::new()).unwrap();
        add(&mut router, Method::GET, "/items", "items");

        let req = HttpRequest::new(Method::OPTIONS, "/apiary/bees")
            .with_header("Origin", "https://app.example.com")
            .with_header("Access-Control-Request-Method", "GET");
        let (handled, _, _) = dispatch(&router, req).await;
        assert!(!handled);

        assert!(router.owns_path("/api"));
        assert!(router.owns_path("/api/bees"));
        assert!(!router.owns_path("/apiary"));
        assert!(!Router::new("").owns_path("/api"));
    }

    #[tokio::test]
    async fn test_preflight_without_cors_is_unhandled() {
        let mut router = Router::new("");
        add(&mut router, Method::PUT, "/items/:id", "updated");
        let req = HttpRequest::new(Method::OPTIONS, "/items/1")
            .with_header("Origin", "https://app.example.com")
            .with_header("Access-Control-Request-Method", "DELETE");
        let (handled, _, _) = dispatch(&router, req).await;
        assert!(!handled);
    }

    #[tokio::test]
    async fn test_error_translation() {
        let mut router = Router::new("");
        router
            .get("/bad", |_req, _res| Box::pin(async { Err(HandlerError::bad_request("missing field 'name'")) }))
            .unwrap();
        router
            .get("/boom", |_req, res| {
                Box::pin(async move {
                    res.text("partial");
                    Err(anyhow::anyhow!("db password leaked in message").into())
                })
            })
            .unwrap();
        router
            .get("/old", |_req, _res| Box::pin(async { Err(HandlerError::redirect(StatusCode::MOVED_PERMANENTLY, "/new")) }))
            .unwrap();
        router
            .get("/account", |_req, _res| {
                Box::pin(async {
                    Err(HandlerError::Redirect {
                        status: StatusCode::FOUND,
                        location: "/login".to_string(),
                        message: "Please sign in".to_string(),
                    })
                })
            })
            .unwrap();

        let (_, _, res) = dispatch(&router, HttpRequest::new(Method::GET, "/bad")).await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.json_payload(), Some(&json!({"error": "missing field 'name'", "code": 400})));

        let (_, _, res) = dispatch(&router, HttpRequest::new(Method::GET, "/boom")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.json_payload(), Some(&json!({"error": "Internal Server Error", "code": 500})));
        assert!(res.body_payload().is_none());

        let (_, _, res) = dispatch(&router, HttpRequest::new(Method::GET, "/old")).await;
        assert_eq!(res.status_code(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.header("location"), Some("/new"));
        assert_eq!(body(&res), "Redirecting to /new");

        let (_, _, res) = dispatch(&router, HttpRequest::new(Method::GET, "/account")).await;
        assert_eq!(res.status_code(), StatusCode::FOUND);
        assert_eq!(res.header("location"), Some("/login"));
        assert_eq!(body(&res), "Please sign in");
    }

    #[tokio::test]
    async fn test_route_middleware_order() {
        let mut router = Router::new("");
        router.use_middleware(middleware_fn("outer", |req, res, next| {
            Box::pin(async move {
                res.append_header("x-order", "router");
                next.run(req, res).await
            })
        }));
        let route_mw = middleware_fn("inner", |req, res, next| {
            Box::pin(async move {
                res.append_header("x-order", "route");
                next.run(req, res).await
            })
        });
        router
            .endpoint_handler(Method::GET, "/chain", reply("done"), EndpointOptions::new().middleware(route_mw).etag(true))
            .unwrap();

        let (_, req, res) = dispatch(&router, HttpRequest::new(Method::GET, "/chain")).await;
        let order: Vec<&str> = res.headers().get_all("x-order").iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(order, vec!["router", "route"]);
        assert!(req.etag_enabled());
    }

    #[tokio::test]
    async fn test_sse_route_builds_channel() {
        let mut router = Router::new("");
        router
            .endpoint(
                Method::GET,
                "/events",
                |req, _res| {
                    Box::pin(async move {
                        let channel = req.sse().ok_or_else(|| HandlerError::bad_request("no channel"))?;
                        channel
                            .send_data("hello", Default::default())
                            .map_err(|e| HandlerError::Internal(anyhow::anyhow!(e)))?;
                        Ok(())
                    })
                },
                EndpointOptions::new().sse(SseOptions::new()),
            )
            .unwrap();

        let (handled, req, res) = dispatch(&router, HttpRequest::new(Method::GET, "/events")).await;
        assert!(handled);
        assert!(res.is_sse());
        assert!(req.sse().is_some());
        assert!(!req.compress_response());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut router = Router::new("");
        let result = router.endpoint_handler(Method::GET, "/a/:id/b/:id", reply("x"), EndpointOptions::new());
        assert!(result.is_err());
    }
}
