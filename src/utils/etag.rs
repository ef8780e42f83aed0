//! ETag 工具

use sha1::{Digest, Sha1};

/// 内容的 SHA1 十六进制摘要
pub fn sha1_hex(content: &[u8]) -> String {
    hex::encode(Sha1::digest(content))
}

/// 强 ETag：带引号的 SHA1 十六进制摘要
pub fn etag_for(content: &[u8]) -> String {
    format!("\"{}\"", sha1_hex(content))
}

/// `If-None-Match` 是否命中给定 ETag（逐项精确比较，`*` 总是命中）
pub fn if_none_match_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}
