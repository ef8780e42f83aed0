//! 压缩器模块

use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::StreamExt;

use crate::server::body::{BoxError, ByteStream};

/// 一次性 gzip 压缩（静态文件预压缩使用）
///
/// flate2 默认写入的 gzip 头 mtime 为 0，相同输入得到逐字节相同的输出。
pub fn gzip_bytes(data: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}

struct GzipState {
    inner: ByteStream,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

/// 把字节流包装成 gzip 压缩流
///
/// 每读到一个上游分块就写入编码器，并把编码器已产出的字节作为一个下游分块吐出；
/// 上游结束时写出 gzip 尾部。上游或编码器出错时输出错误并终止。
pub fn gzip_stream(inner: ByteStream, level: u32) -> ByteStream {
    let state = GzipState {
        inner,
        encoder: Some(GzEncoder::new(Vec::new(), Compression::new(level))),
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            let encoder = state.encoder.as_mut()?;
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = encoder.write_all(&chunk) {
                        state.encoder = None;
                        return Some((Err(Box::new(e) as BoxError), state));
                    }
                    let produced = std::mem::take(encoder.get_mut());
                    if !produced.is_empty() {
                        return Some((Ok(Bytes::from(produced)), state));
                    }
                }
                Some(Err(e)) => {
                    state.encoder = None;
                    return Some((Err(e), state));
                }
                None => {
                    let encoder = state.encoder.take()?;
                    return match encoder.finish() {
                        Ok(tail) => Some((Ok(Bytes::from(tail)), state)),
                        Err(e) => Some((Err(Box::new(e) as BoxError), state)),
                    };
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_gzip_bytes_is_deterministic() {
        let data = b"hello hello hello hello".repeat(50);
        let a = gzip_bytes(&data, 6).unwrap();
        let b = gzip_bytes(&data, 6).unwrap();
        assert_eq!(a, b);
        assert_eq!(gunzip(&a), data);
    }

    #[tokio::test]
    async fn test_gzip_stream_matches_input() {
        let chunks: Vec<Result<Bytes, BoxError>> = (0..20)
            .map(|i| Ok(Bytes::from(format!("chunk-{:03};", i).repeat(40))))
            .collect();
        let expected: Vec<u8> = (0..20)
            .flat_map(|i| format!("chunk-{:03};", i).repeat(40).into_bytes())
            .collect();

        let stream: ByteStream = Box::pin(futures_util::stream::iter(chunks));
        let mut compressed = gzip_stream(stream, 6);
        let mut out = Vec::new();
        while let Some(chunk) = compressed.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(gunzip(&out), expected);
    }

    #[tokio::test]
    async fn test_gzip_stream_empty_input() {
        let stream: ByteStream = Box::pin(futures_util::stream::empty());
        let mut compressed = gzip_stream(stream, 6);
        let mut out = Vec::new();
        while let Some(chunk) = compressed.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert!(gunzip(&out).is_empty());
    }
}
