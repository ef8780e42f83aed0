//! 请求体/响应体类型

use std::convert::Infallible;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};

/// 装箱错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 字节流（流式响应、SSE、gzip 流式压缩共用）
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// 最终交给 hyper 的响应体
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

/// 请求体来源
///
/// 请求体只会被读取一次：body 中间件或 [`HttpRequest::read_body`](super::HttpRequest::read_body)
/// 把它取走后替换为 `Consumed`。
#[derive(Debug, Default)]
pub enum RequestBody {
    /// 来自连接的原始请求体
    Incoming(Incoming),
    /// 已在内存中的请求体（测试、内部转发）
    Buffered(Bytes),
    /// 无请求体
    #[default]
    Empty,
    /// 已被读取
    Consumed,
}

/// 完整字节响应体
pub fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed_unsync()
}

/// 空响应体
pub fn empty() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed_unsync()
}

/// 流式响应体（无 Content-Length，HTTP/1.1 下使用 chunked 编码）
pub fn streaming(stream: ByteStream) -> ResponseBody {
    StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
}

/// 把一段内存字节切成固定大小分块的流
pub fn chunked(bytes: Bytes, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Result<Bytes, BoxError>> = (0..bytes.len())
        .step_by(chunk_size)
        .map(|start| Ok(bytes.slice(start..(start + chunk_size).min(bytes.len()))))
        .collect();
    Box::pin(futures_util::stream::iter(chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_chunked_split() {
        let mut stream = chunked(Bytes::from_static(b"abcdefghij"), 4);
        let mut parts = Vec::new();
        while let Some(chunk) = stream.next().await {
            parts.push(chunk.unwrap());
        }
        assert_eq!(parts, vec![
            Bytes::from_static(b"abcd"),
            Bytes::from_static(b"efgh"),
            Bytes::from_static(b"ij"),
        ]);
    }

    #[tokio::test]
    async fn test_full_body_collects() {
        let body = full("hello");
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"hello"));
    }
}
