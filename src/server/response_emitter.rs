//! 响应发射器
//!
//! 处理链结束后，把 [`HttpResponse`] 一次性转换为 hyper 响应：
//! 选择响应体来源、计算 ETag 与条件请求、协商 gzip 压缩、写入 Cookie 与 Server-Timing。

use bytes::Bytes;
use hyper::header::{
    HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH,
    SET_COOKIE, VARY,
};
use hyper::{Method, Response, StatusCode};

use crate::compression::{gzip_stream, CompressionConfig, CompressionType};
use crate::server::body::{self, ResponseBody};
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::utils::etag::{etag_for, if_none_match_matches};
use crate::utils::logger::{debug, warn};

/// 压缩流的分块大小
const GZIP_CHUNK_SIZE: usize = 16 * 1024;

/// 追加 Vary 值（已存在则跳过）
pub fn append_vary(headers: &mut HeaderMap, value: &'static str) {
    let present = headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case(value));
    if !present {
        headers.append(VARY, HeaderValue::from_static(value));
    }
}

fn server_timing_header(req: &HttpRequest, res: &HttpResponse) -> String {
    let total_ms = req.received_at().elapsed().as_secs_f64() * 1000.0;
    let mut parts = vec![format!("total;dur={:.1}", total_ms)];
    parts.extend(res.timings().iter().map(|metric| metric.to_string()));
    parts.join(", ")
}

fn should_gzip(req: &HttpRequest, headers: &HeaderMap, len: usize, config: &CompressionConfig) -> bool {
    if !req.compress_response() || headers.contains_key(CONTENT_ENCODING) {
        return false;
    }
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    config.should_compress(len, content_type)
        && CompressionType::select_from_accept_encoding(req.headers().get(ACCEPT_ENCODING)) == CompressionType::Gzip
}

/// 生成最终响应
pub fn emit(req: &HttpRequest, res: HttpResponse, config: &CompressionConfig) -> Response<ResponseBody> {
    let timing = server_timing_header(req, &res);
    let HttpResponse {
        mut status,
        status_set,
        mut headers,
        json,
        body,
        stream,
        cookies,
        sse,
        ..
    } = res;

    match HeaderValue::from_str(&timing) {
        Ok(value) => {
            headers.insert("server-timing", value);
        }
        Err(_) => warn!("⚠️ [ResponseEmitter] Server-Timing 头非法，已忽略: {}", timing),
    }
    for cookie in &cookies {
        match HeaderValue::from_str(&cookie.to_header_value()) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(_) => warn!("⚠️ [ResponseEmitter] 忽略非法 Cookie: {}", cookie.name),
        }
    }

    let is_head = req.method() == Method::HEAD;

    // 流式响应体：长度未知，不做 ETag 与压缩
    if let Some(stream) = stream {
        headers.remove(CONTENT_LENGTH);
        debug!("🔍 [ResponseEmitter] 流式响应 (sse={}): {} {}", sse, req.method(), req.path());
        let body = if is_head { body::empty() } else { body::streaming(stream) };
        return build(status, headers, body);
    }

    let bytes = match (json, body) {
        (Some(value), _) => {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            match serde_json::to_vec(&value) {
                Ok(serialized) => Bytes::from(serialized),
                Err(e) => {
                    warn!("⚠️ [ResponseEmitter] JSON 序列化失败: {}", e);
                    status = StatusCode::INTERNAL_SERVER_ERROR;
                    Bytes::new()
                }
            }
        }
        (None, Some(bytes)) => bytes,
        (None, None) => {
            if !status_set {
                status = StatusCode::NO_CONTENT;
            }
            if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
                headers.remove(CONTENT_LENGTH);
                return build(status, headers, body::empty());
            }
            Bytes::new()
        }
    };

    if req.etag_enabled() && status.is_success() {
        let etag = etag_for(&bytes);
        let matched = req
            .header(IF_NONE_MATCH.as_str())
            .map(|inm| if_none_match_matches(inm, &etag))
            .unwrap_or(false);
        if let Ok(value) = HeaderValue::from_str(&etag) {
            headers.insert(ETAG, value);
        }
        if matched {
            debug!("🔍 [ResponseEmitter] ETag 命中，返回 304: {}", req.path());
            headers.remove(CONTENT_LENGTH);
            headers.remove(CONTENT_TYPE);
            return build(StatusCode::NOT_MODIFIED, headers, body::empty());
        }
    }

    // HEAD 与 GET 的头部一致：会压缩时同样不给出长度
    if should_gzip(req, &headers, bytes.len(), config) {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.remove(CONTENT_LENGTH);
        append_vary(&mut headers, "Accept-Encoding");
        if is_head {
            return build(status, headers, body::empty());
        }
        debug!("🗜️ [ResponseEmitter] gzip 压缩 {} 字节: {}", bytes.len(), req.path());
        let stream = gzip_stream(body::chunked(bytes, GZIP_CHUNK_SIZE), config.level);
        return build(status, headers, body::streaming(stream));
    }

    if is_head {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        return build(status, headers, body::empty());
    }

    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    build(status, headers, body::full(bytes))
}

fn build(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
