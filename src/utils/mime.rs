//! 扩展名 → Content-Type 映射

use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;

/// 未知扩展名的默认类型
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

lazy_static! {
    static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("html", "text/html; charset=utf-8");
        m.insert("htm", "text/html; charset=utf-8");
        m.insert("css", "text/css; charset=utf-8");
        m.insert("js", "application/javascript; charset=utf-8");
        m.insert("mjs", "application/javascript; charset=utf-8");
        m.insert("json", "application/json");
        m.insert("map", "application/json");
        m.insert("txt", "text/plain; charset=utf-8");
        m.insert("md", "text/markdown; charset=utf-8");
        m.insert("xml", "application/xml");
        m.insert("csv", "text/csv; charset=utf-8");
        m.insert("svg", "image/svg+xml");
        m.insert("png", "image/png");
        m.insert("jpg", "image/jpeg");
        m.insert("jpeg", "image/jpeg");
        m.insert("gif", "image/gif");
        m.insert("webp", "image/webp");
        m.insert("avif", "image/avif");
        m.insert("ico", "image/x-icon");
        m.insert("woff", "font/woff");
        m.insert("woff2", "font/woff2");
        m.insert("ttf", "font/ttf");
        m.insert("otf", "font/otf");
        m.insert("wasm", "application/wasm");
        m.insert("pdf", "application/pdf");
        m.insert("zip", "application/zip");
        m.insert("gz", "application/gzip");
        m.insert("mp3", "audio/mpeg");
        m.insert("mp4", "video/mp4");
        m.insert("webm", "video/webm");
        m.insert("webmanifest", "application/manifest+json");
        m
    };
}

/// 根据文件扩展名查找 Content-Type
pub fn content_type_for(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .and_then(|ext| MIME_TYPES.get(ext.as_str()).copied())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(content_type_for(Path::new("/a/b/app.JS")), "application/javascript; charset=utf-8");
        assert_eq!(content_type_for(Path::new("logo.png")), "image/png");
        assert_eq!(content_type_for(Path::new("LICENSE")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(Path::new("data.unknown")), DEFAULT_CONTENT_TYPE);
    }
}
