//! 请求体读取与解析
//!
//! [`read_body_limited`] 负责带上限地把请求体读入内存；
//! [`BodyParser`] 中间件在此基础上按 Content-Type 解析 JSON 与表单。

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;

use crate::error::{HandlerError, HandlerResult};
use crate::server::body::RequestBody;
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::middleware::{Middleware, Next};
use crate::utils::logger::debug;

/// 默认请求体上限：1 MiB
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

fn too_large(max: usize) -> HandlerError {
    HandlerError::bad_request(format!("Request body too large (limit {} bytes)", max))
}

/// 读取请求体，总长度达到 `max` 字节即失败（400）
///
/// 声明的 Content-Length 已超限时不读取任何数据。
pub async fn read_body_limited(body: RequestBody, declared: Option<usize>, max: usize) -> Result<Bytes, HandlerError> {
    if let Some(len) = declared {
        if len >= max {
            debug!("🔍 [BodyParser] Content-Length {} 超过上限 {}", len, max);
            return Err(too_large(max));
        }
    }

    match body {
        RequestBody::Incoming(mut incoming) => {
            let mut buf = BytesMut::new();
            while let Some(frame) = incoming.frame().await {
                let frame = frame.map_err(|e| HandlerError::bad_request(format!("Failed to read request body: {}", e)))?;
                if let Ok(data) = frame.into_data() {
                    if buf.len() + data.len() >= max {
                        debug!("🔍 [BodyParser] 请求体超过上限 {}", max);
                        return Err(too_large(max));
                    }
                    buf.extend_from_slice(&data);
                }
            }
            Ok(buf.freeze())
        }
        RequestBody::Buffered(bytes) => {
            if bytes.len() >= max {
                return Err(too_large(max));
            }
            Ok(bytes)
        }
        RequestBody::Empty | RequestBody::Consumed => Ok(Bytes::new()),
    }
}

/// 请求体解析中间件
#[derive(Debug, Clone)]
pub struct BodyParser {
    max_body_size: usize,
    parse_json: bool,
    parse_form: bool,
}

impl Default for BodyParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyParser {
    pub fn new() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            parse_json: true,
            parse_form: true,
        }
    }

    pub fn max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = max;
        self
    }

    pub fn parse_json(mut self, enabled: bool) -> Self {
        self.parse_json = enabled;
        self
    }

    pub fn parse_form(mut self, enabled: bool) -> Self {
        self.parse_form = enabled;
        self
    }

    fn media_type(req: &HttpRequest) -> Option<String> {
        req.content_type()
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    }

    async fn parse(&self, req: &mut HttpRequest) -> HandlerResult {
        let bytes = req.read_body(self.max_body_size).await?;
        if bytes.is_empty() {
            return Ok(());
        }

        match Self::media_type(req).as_deref() {
            Some(mt) if self.parse_json && (mt == "application/json" || mt.ends_with("+json")) => {
                let value: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|e| HandlerError::bad_request(format!("Invalid JSON body: {}", e)))?;
                req.set_json(value);
            }
            Some("application/x-www-form-urlencoded") if self.parse_form => {
                let form: HashMap<String, String> = url::form_urlencoded::parse(&bytes).into_owned().collect();
                req.set_form(form);
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Middleware for BodyParser {
    async fn handle(&self, req: &mut HttpRequest, res: &mut HttpResponse, next: Next<'_>) -> HandlerResult {
        self.parse(req).await?;
        next.run(req, res).await
    }

    fn name(&self) -> &str {
        "BodyParser"
    }
}
