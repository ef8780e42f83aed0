//! HTTP 响应模型
//!
//! 中间件与端点只修改这个结构体，真正写到连接上的 hyper 响应由
//! [`response_emitter`](super::response_emitter) 在处理链结束后一次性生成。

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::StatusCode;
use serde::Serialize;

use crate::error::{HandlerError, HandlerResult};
use crate::server::body::ByteStream;
use crate::utils::cookie::{CookieOptions, SetCookie};
use crate::utils::logger::warn;

/// Server-Timing 指标
#[derive(Debug, Clone, PartialEq)]
pub struct ServerTimingMetric {
    pub name: String,
    pub duration_ms: Option<f64>,
    pub description: Option<String>,
}

impl fmt::Display for ServerTimingMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(dur) = self.duration_ms {
            write!(f, ";dur={:.1}", dur)?;
        }
        if let Some(desc) = &self.description {
            write!(f, ";desc=\"{}\"", desc.replace('"', "'"))?;
        }
        Ok(())
    }
}

/// HTTP 响应
///
/// `json`、`body`、`stream` 三者互斥，后设置的覆盖先设置的。
pub struct HttpResponse {
    pub(crate) status: StatusCode,
    pub(crate) status_set: bool,
    pub(crate) headers: HeaderMap,
    pub(crate) json: Option<serde_json::Value>,
    pub(crate) body: Option<Bytes>,
    pub(crate) stream: Option<ByteStream>,
    pub(crate) timings: Vec<ServerTimingMetric>,
    pub(crate) cookies: Vec<SetCookie>,
    pub(crate) sse: bool,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("json", &self.json)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("stream", &self.stream.is_some())
            .field("timings", &self.timings)
            .field("cookies", &self.cookies)
            .field("sse", &self.sse)
            .finish()
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            status_set: false,
            headers: HeaderMap::new(),
            json: None,
            body: None,
            stream: None,
            timings: Vec::new(),
            cookies: Vec::new(),
            sse: false,
        }
    }

    // ========== 状态码与头部 ==========

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self.status_set = true;
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 设置（覆盖）响应头；非法的名称或值记录警告后忽略
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!("⚠️ [HttpResponse] 忽略非法响应头: {}: {}", name, value),
        }
        self
    }

    /// 追加响应头
    pub fn append_header(&mut self, name: &str, value: &str) -> &mut Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!("⚠️ [HttpResponse] 忽略非法响应头: {}: {}", name, value),
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.remove(name);
        self
    }

    // ========== 响应体 ==========

    /// JSON 响应体，发射时序列化并设置 JSON 内容类型
    pub fn json(&mut self, value: serde_json::Value) -> &mut Self {
        self.clear_payload();
        self.json = Some(value);
        self
    }

    /// 序列化任意可序列化的值作为 JSON 响应体
    pub fn json_serialize<T: Serialize>(&mut self, value: &T) -> HandlerResult {
        let value = serde_json::to_value(value).map_err(|e| HandlerError::Internal(e.into()))?;
        self.json(value);
        Ok(())
    }

    /// 原始字节响应体
    pub fn body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.clear_payload();
        self.body = Some(body.into());
        self
    }

    /// 纯文本响应体
    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        self.body(Bytes::from(text.into()))
    }

    /// HTML 响应体
    pub fn html(&mut self, html: impl Into<String>) -> &mut Self {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        self.body(Bytes::from(html.into()))
    }

    /// 流式响应体
    pub fn stream(&mut self, stream: ByteStream) -> &mut Self {
        self.clear_payload();
        self.stream = Some(stream);
        self
    }

    pub fn has_payload(&self) -> bool {
        self.json.is_some() || self.body.is_some() || self.stream.is_some()
    }

    pub fn json_payload(&self) -> Option<&serde_json::Value> {
        self.json.as_ref()
    }

    pub fn body_payload(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    fn clear_payload(&mut self) {
        self.json = None;
        self.body = None;
        self.stream = None;
    }

    /// 清空响应体（错误转换时使用），SSE 标记一并取消
    pub(crate) fn reset_payload(&mut self) {
        self.clear_payload();
        self.sse = false;
    }

    pub(crate) fn claim_for_sse(&mut self, stream: ByteStream) {
        self.stream(stream);
        self.sse = true;
    }

    /// 该响应是否已被 SSE 通道接管
    pub fn is_sse(&self) -> bool {
        self.sse
    }

    /// 重定向
    pub fn redirect(&mut self, status: StatusCode, location: &str) -> &mut Self {
        self.status(status);
        self.set_header(LOCATION.as_str(), location);
        self.text(format!("Redirecting to {}", location))
    }

    // ========== Cookie ==========

    pub fn set_cookie(&mut self, name: &str, value: &str, options: CookieOptions) -> &mut Self {
        self.cookies.push(SetCookie {
            name: name.to_string(),
            value: value.to_string(),
            options,
        });
        self
    }

    /// 通过 `Max-Age=0` 让客户端删除 cookie
    pub fn clear_cookie(&mut self, name: &str, options: CookieOptions) -> &mut Self {
        self.set_cookie(name, "", options.max_age(0))
    }

    pub fn cookies(&self) -> &[SetCookie] {
        &self.cookies
    }

    // ========== Server-Timing ==========

    /// 记录一条 Server-Timing 指标，按记录顺序输出
    pub fn server_timing(&mut self, name: &str, duration: Option<Duration>, description: Option<&str>) -> &mut Self {
        self.timings.push(ServerTimingMetric {
            name: name.to_string(),
            duration_ms: duration.map(|d| d.as_secs_f64() * 1000.0),
            description: description.map(str::to_string),
        });
        self
    }

    pub fn timings(&self) -> &[ServerTimingMetric] {
        &self.timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_is_exclusive() {
        let mut res = HttpResponse::new();
        res.body("raw");
        res.json(json!({"a": 1}));
        assert!(res.body_payload().is_none());
        assert_eq!(res.json_payload(), Some(&json!({"a": 1})));

        res.text("plain");
        assert!(res.json_payload().is_none());
        assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_status_tracking() {
        let mut res = HttpResponse::new();
        assert_eq!(res.status_code(), StatusCode::OK);
        assert!(!res.status_set);
        res.status(StatusCode::CREATED);
        assert!(res.status_set);
    }

    #[test]
    fn test_server_timing_format() {
        let mut res = HttpResponse::new();
        res.server_timing("db", Some(Duration::from_micros(12_340)), Some("user \"lookup\""));
        res.server_timing("cache", None, None);
        let rendered: Vec<String> = res.timings().iter().map(|m| m.to_string()).collect();
        assert_eq!(rendered, vec!["db;dur=12.3;desc=\"user 'lookup'\"", "cache"]);
    }

    #[test]
    fn test_clear_cookie() {
        let mut res = HttpResponse::new();
        res.clear_cookie("sid", CookieOptions::new().http_only(true));
        assert_eq!(res.cookies()[0].to_header_value(), "sid=; Max-Age=0; Path=/; HttpOnly");
    }

    #[test]
    fn test_redirect() {
        let mut res = HttpResponse::new();
        res.redirect(StatusCode::FOUND, "/login");
        assert_eq!(res.status_code(), StatusCode::FOUND);
        assert_eq!(res.header("location"), Some("/login"));
    }
}
