//! HTTP 请求模型
//!
//! 在 hyper 请求之上附加路由与计时状态：路径参数、匹配器信息、处理标记、
//! 压缩开关、接收时间以及所属连接。

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use hyper::{Method, Request, Uri, Version};
use serde::de::DeserializeOwned;

use crate::error::HandlerError;
use crate::server::body::RequestBody;
use crate::server::body_parser::read_body_limited;
use crate::server::path_matcher::{MatchedInfo, RouteMatch};
use crate::server::socket_registry::ConnectionHandle;
use crate::server::sse::SseChannel;
use crate::utils::cookie::parse_cookies;

/// HTTP 请求
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    query: HashMap<String, String>,
    body: RequestBody,
    raw_body: Option<Bytes>,
    json: Option<serde_json::Value>,
    form: Option<HashMap<String, String>>,
    params: HashMap<String, String>,
    matched_info: Option<MatchedInfo>,
    handled: bool,
    compress_response: bool,
    etag_enabled: bool,
    received_at: Instant,
    remote_addr: Option<SocketAddr>,
    connection: Option<ConnectionHandle>,
    sse: Option<SseChannel>,
}

impl HttpRequest {
    /// 从 hyper 请求构造
    pub fn from_hyper(req: Request<Incoming>, connection: Option<ConnectionHandle>) -> Self {
        let (parts, body) = req.into_parts();
        let remote_addr = connection.as_ref().map(|c| c.remote_addr());
        let mut request = Self::from_parts(parts.method, parts.uri, parts.headers, RequestBody::Incoming(body));
        request.version = parts.version;
        request.remote_addr = remote_addr;
        request.connection = connection;
        request
    }

    /// 从方法、URI、头部与请求体构造
    pub fn from_parts(method: Method, uri: Uri, headers: HeaderMap, body: RequestBody) -> Self {
        let query = uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers,
            query,
            body,
            raw_body: None,
            json: None,
            form: None,
            params: HashMap::new(),
            matched_info: None,
            handled: false,
            compress_response: true,
            etag_enabled: false,
            received_at: Instant::now(),
            remote_addr: None,
            connection: None,
            sse: None,
        }
    }

    /// 构造一个没有请求体的请求；URI 非法时退化为 `/`
    pub fn new(method: Method, uri: &str) -> Self {
        let uri = uri.parse::<Uri>().unwrap_or_else(|_| Uri::from_static("/"));
        Self::from_parts(method, uri, HeaderMap::new(), RequestBody::Empty)
    }

    /// 追加请求头（构造请求时使用）；非法的名称或值会被忽略
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            self.headers.append(name, value);
        }
        self
    }

    /// 设置内存请求体（构造请求时使用）
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Buffered(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// 请求路径（未解码）
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// 原始查询字符串
    pub fn query_string(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 获取请求头（非 UTF-8 值视为不存在）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// 读取指定 cookie；多个 Cookie 头按出现顺序合并，同名以第一次出现为准
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies().remove(name)
    }

    pub fn cookies(&self) -> HashMap<String, String> {
        let joined = self
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join("; ");
        parse_cookies(&joined)
    }

    // ========== 路由状态 ==========

    /// 路径参数
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// 匹配器附带的信息（内置匹配器为匹配到的路由模式 `String`）
    pub fn matched_info<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.matched_info.as_ref().and_then(|info| info.downcast_ref::<T>())
    }

    pub(crate) fn apply_route_match(&mut self, route_match: RouteMatch, etag_enabled: bool) {
        self.params = route_match.params;
        self.matched_info = route_match.matched_info;
        self.etag_enabled = etag_enabled;
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    /// 是否允许压缩响应
    pub fn compress_response(&self) -> bool {
        self.compress_response
    }

    /// 关闭本次响应的压缩
    pub fn disable_compression(&mut self) {
        self.compress_response = false;
    }

    /// 当前路由是否启用响应 ETag
    pub fn etag_enabled(&self) -> bool {
        self.etag_enabled
    }

    /// 请求到达时间
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// 所属连接
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref()
    }

    /// 路由声明了 SSE 时由路由器创建的事件通道
    pub fn sse(&self) -> Option<&SseChannel> {
        self.sse.as_ref()
    }

    pub(crate) fn set_sse(&mut self, channel: SseChannel) {
        self.sse = Some(channel);
    }

    // ========== 请求体 ==========

    /// 读取完整请求体（只从连接读取一次，之后返回缓存）
    ///
    /// 请求体达到 `max_body_size` 字节即返回 400。
    pub async fn read_body(&mut self, max_body_size: usize) -> Result<Bytes, HandlerError> {
        if let Some(raw) = &self.raw_body {
            return Ok(raw.clone());
        }

        let declared = self
            .headers
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let body = std::mem::replace(&mut self.body, RequestBody::Consumed);
        let bytes = read_body_limited(body, declared, max_body_size).await?;
        self.raw_body = Some(bytes.clone());
        Ok(bytes)
    }

    /// 已读取的原始请求体
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.raw_body.as_ref()
    }

    /// 已读取的请求体按 UTF-8 解释
    pub fn body_text(&self) -> Option<&str> {
        self.raw_body.as_ref().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// body 中间件解析出的 JSON
    pub fn json_value(&self) -> Option<&serde_json::Value> {
        self.json.as_ref()
    }

    pub(crate) fn set_json(&mut self, value: serde_json::Value) {
        self.json = Some(value);
    }

    /// 把 JSON 请求体反序列化为指定类型，失败时返回 400
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        let parsed = match (&self.json, &self.raw_body) {
            (Some(value), _) => serde_json::from_value(value.clone()),
            (None, Some(raw)) => serde_json::from_slice(raw),
            (None, None) => return Err(HandlerError::bad_request("Request body has not been read")),
        };
        parsed.map_err(|e| HandlerError::bad_request(format!("Invalid JSON body: {}", e)))
    }

    /// body 中间件解析出的表单字段
    pub fn form(&self) -> Option<&HashMap<String, String>> {
        self.form.as_ref()
    }

    pub(crate) fn set_form(&mut self, form: HashMap<String, String>) {
        self.form = Some(form);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_and_headers() {
        let req = HttpRequest::new(Method::GET, "/search?q=rust%20lang&page=2")
            .with_header("Cookie", "a=1; b=2")
            .with_header("Cookie", "a=9; c=3")
            .with_header("X-Trace", "abc");

        assert_eq!(req.path(), "/search");
        assert_eq!(req.query("q"), Some("rust lang"));
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.header("x-trace"), Some("abc"));
        assert_eq!(req.cookie("a").as_deref(), Some("1"));
        assert_eq!(req.cookie("c").as_deref(), Some("3"));
        assert!(req.compress_response());
        assert!(!req.is_handled());
    }

    #[tokio::test]
    async fn test_read_body_is_cached() {
        let mut req = HttpRequest::new(Method::POST, "/echo").with_body("{\"a\":1}");
        let first = req.read_body(1024).await.unwrap();
        let second = req.read_body(1024).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(req.body_text(), Some("{\"a\":1}"));

        #[derive(serde::Deserialize)]
        struct Payload {
            a: i32,
        }
        assert_eq!(req.json::<Payload>().unwrap().a, 1);
    }

    #[tokio::test]
    async fn test_json_without_body_read() {
        let req = HttpRequest::new(Method::POST, "/echo").with_body("{}");
        let err = req.json::<serde_json::Value>().unwrap_err();
        assert_eq!(err.status(), hyper::StatusCode::BAD_REQUEST);
    }
}
