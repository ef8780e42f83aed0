//! 静态文件缓存
//!
//! 启动时遍历一次目录树，把每个文件连同内容类型、SHA1 ETag、gzip 副本、
//! 最后修改时间与不可变标记一起载入内存。之后的请求只查表，不再访问文件系统；
//! 目录树在启动后被视为不变。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hyper::header::{ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use hyper::{Method, StatusCode};
use regex::Regex;

use crate::compression::{gzip_bytes, CompressionType};
use crate::error::{RatError, RatResult};
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::response_emitter::append_vary;
use crate::utils::etag::{etag_for, if_none_match_matches};
use crate::utils::logger::{debug, info};
use crate::utils::mime::content_type_for;

const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
const REVALIDATE_CACHE_CONTROL: &str = "no-cache";

/// 缓存构建选项
#[derive(Debug, Clone)]
pub struct StaticOptions {
    /// URL 前缀，例如 `/assets`；空表示挂载在根路径
    pub url_prefix: String,
    /// 匹配完整文件路径的不可变规则
    pub immutable: Vec<Regex>,
    /// 同时以去掉 `.html` 后缀的路径注册 HTML 文件
    pub strip_html_suffix: bool,
    pub index_file: String,
    pub gzip_level: u32,
}

impl Default for StaticOptions {
    fn default() -> Self {
        Self {
            url_prefix: String::new(),
            immutable: Vec::new(),
            strip_html_suffix: false,
            index_file: "index.html".to_string(),
            gzip_level: 9,
        }
    }
}

impl StaticOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url_prefix(mut self, prefix: &str) -> Self {
        self.url_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    /// 添加不可变规则
    pub fn immutable_pattern(mut self, pattern: &str) -> RatResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| RatError::StaticFiles(format!("非法的不可变规则 '{}': {}", pattern, e)))?;
        self.immutable.push(regex);
        Ok(self)
    }

    pub fn strip_html_suffix(mut self, enabled: bool) -> Self {
        self.strip_html_suffix = enabled;
        self
    }

    pub fn index_file(mut self, name: impl Into<String>) -> Self {
        self.index_file = name.into();
        self
    }

    pub fn gzip_level(mut self, level: u32) -> Self {
        self.gzip_level = level.clamp(1, 9);
        self
    }
}

/// 单个文件的缓存条目
#[derive(Debug, Clone, PartialEq)]
pub struct FileDetails {
    pub content_type: String,
    pub size: u64,
    pub last_modified_ms: u64,
    /// 截断到秒的 HTTP 日期
    pub last_modified: String,
    /// 带引号的 SHA1 十六进制摘要
    pub etag: String,
    pub immutable: bool,
    pub content: Bytes,
    pub gzip: Bytes,
}

impl FileDetails {
    fn load(path: &Path, options: &StaticOptions) -> RatResult<Self> {
        let metadata = fs::metadata(path)?;
        let content = fs::read(path)?;
        let gzip = gzip_bytes(&content, options.gzip_level)?;

        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
        let truncated = UNIX_EPOCH + Duration::from_secs(since_epoch.as_secs());

        let full_path = path.to_string_lossy();
        let immutable = options.immutable.iter().any(|re| re.is_match(&full_path));

        Ok(Self {
            content_type: content_type_for(path).to_string(),
            size: content.len() as u64,
            last_modified_ms: since_epoch.as_millis() as u64,
            last_modified: httpdate::fmt_http_date(truncated),
            etag: etag_for(&content),
            immutable,
            content: Bytes::from(content),
            gzip: Bytes::from(gzip),
        })
    }

    pub fn cache_control(&self) -> &'static str {
        if self.immutable {
            IMMUTABLE_CACHE_CONTROL
        } else {
            REVALIDATE_CACHE_CONTROL
        }
    }

    pub fn last_modified_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_modified_ms)
    }
}

/// 静态文件缓存
#[derive(Debug, Default)]
pub struct StaticFileCache {
    root: PathBuf,
    files: HashMap<String, Arc<FileDetails>>,
    redirects: HashMap<String, String>,
}

impl StaticFileCache {
    /// 在阻塞线程池中构建缓存
    pub async fn build(root: impl Into<PathBuf>, options: StaticOptions) -> RatResult<Self> {
        let root = root.into();
        tokio::task::spawn_blocking(move || Self::build_blocking(&root, &options))
            .await
            .map_err(|e| RatError::StaticFiles(format!("静态文件构建任务失败: {}", e)))?
    }

    /// 同步构建缓存
    pub fn build_blocking(root: &Path, options: &StaticOptions) -> RatResult<Self> {
        if !root.is_dir() {
            return Err(RatError::StaticFiles(format!("静态文件目录不存在: {}", root.display())));
        }

        let mut cache = Self {
            root: root.to_path_buf(),
            files: HashMap::new(),
            redirects: HashMap::new(),
        };
        cache.walk(root, &options.url_prefix, options)?;

        info!(
            "📦 [StaticFiles] 已缓存 {} 个文件，{} 条重定向: {}",
            cache.files.len(),
            cache.redirects.len(),
            root.display()
        );
        Ok(cache)
    }

    fn walk(&mut self, dir: &Path, url_dir: &str, options: &StaticOptions) -> RatResult<()> {
        let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let url = format!("{}/{}", url_dir, name);
            // 跟随符号链接
            let metadata = fs::metadata(&path)?;

            if metadata.is_dir() {
                self.walk(&path, &url, options)?;
                continue;
            }
            if !metadata.is_file() {
                continue;
            }

            let details = Arc::new(FileDetails::load(&path, options)?);
            debug!("📄 [StaticFiles] {} -> {} ({} 字节)", url, path.display(), details.size);

            if name == options.index_file {
                let canonical = format!("{}/", url_dir);
                self.files.insert(canonical.clone(), details.clone());
                if !url_dir.is_empty() {
                    self.redirects.insert(url_dir.to_string(), canonical);
                }
            }
            if options.strip_html_suffix {
                if let Some(stem) = url.strip_suffix(".html") {
                    self.files.entry(stem.to_string()).or_insert_with(|| details.clone());
                }
            }
            self.files.insert(url, details);
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&FileDetails> {
        self.files.get(path).map(Arc::as_ref)
    }

    /// 目录形式路径的重定向目标
    pub fn redirect_target(&self, path: &str) -> Option<&str> {
        self.redirects.get(path).map(String::as_str)
    }

    /// 所有可访问的 URL 路径（已排序）
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.files.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// 处理 GET/HEAD 请求；未命中时返回 `false`
    pub fn handle_req(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> bool {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return false;
        }

        let path = urlencoding::decode(req.path())
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| req.path().to_string());

        if let Some(details) = self.files.get(&path) {
            self.serve(details, req, res);
            req.set_handled(true);
            return true;
        }

        if let Some(target) = self.redirects.get(&path) {
            let location = match req.query_string() {
                Some(query) => format!("{}?{}", target, query),
                None => target.clone(),
            };
            debug!("🔍 [StaticFiles] 目录重定向: {} -> {}", path, location);
            res.redirect(StatusCode::MOVED_PERMANENTLY, &location);
            req.set_handled(true);
            return true;
        }

        false
    }

    fn serve(&self, details: &FileDetails, req: &mut HttpRequest, res: &mut HttpResponse) {
        // 预压缩副本已就绪，响应阶段不再压缩
        req.disable_compression();

        res.set_header(CACHE_CONTROL.as_str(), details.cache_control());
        res.set_header(ETAG.as_str(), &details.etag);
        res.set_header(LAST_MODIFIED.as_str(), &details.last_modified);
        res.set_header(CONTENT_TYPE.as_str(), &details.content_type);
        append_vary(res.headers_mut(), "Accept-Encoding");

        let not_modified = match req.header("if-none-match") {
            Some(inm) => if_none_match_matches(inm, &details.etag),
            None => req.header("if-modified-since") == Some(details.last_modified.as_str()),
        };
        if not_modified {
            debug!("🔍 [StaticFiles] 304: {}", req.path());
            res.status(StatusCode::NOT_MODIFIED);
            return;
        }

        let accepts_gzip =
            CompressionType::select_from_accept_encoding(req.headers().get(ACCEPT_ENCODING)) == CompressionType::Gzip;
        if accepts_gzip && details.gzip.len() < details.content.len() {
            res.set_header(CONTENT_ENCODING.as_str(), "gzip");
            res.body(details.gzip.clone());
        } else {
            res.body(details.content.clone());
        }
        res.status(StatusCode::OK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionConfig;
    use crate::server::response_emitter::emit;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(root.join("about.html"), "<p>about</p>").unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs").join("index.html"), "<h1>docs</h1>").unwrap();
        fs::create_dir_all(root.join("js")).unwrap();
        fs::write(root.join("js").join("app.3f2a9c.js"), "console.log('x');".repeat(200)).unwrap();
        fs::write(root.join("notes.unknownext"), "plain").unwrap();
        dir
    }

    fn options() -> StaticOptions {
        StaticOptions::new()
            .strip_html_suffix(true)
            .immutable_pattern(r"\.[0-9a-f]{6}\.js$")
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_registers_paths() {
        let dir = fixture();
        let cache = StaticFileCache::build(dir.path(), options()).await.unwrap();

        assert_eq!(cache.paths(), vec![
            "/",
            "/about",
            "/about.html",
            "/docs/",
            "/docs/index",
            "/docs/index.html",
            "/index",
            "/index.html",
            "/js/app.3f2a9c.js",
            "/notes.unknownext",
        ]);
        assert_eq!(cache.redirect_target("/docs"), Some("/docs/"));
        assert!(cache.get("/js/app.3f2a9c.js").unwrap().immutable);
        assert!(!cache.get("/about.html").unwrap().immutable);
        assert_eq!(cache.get("/notes.unknownext").unwrap().content_type, "text/plain");
        assert_eq!(cache.get("/docs/").unwrap().etag, etag_for(b"<h1>docs</h1>"));
    }

    #[tokio::test]
    async fn test_build_is_idempotent() {
        let dir = fixture();
        let first = StaticFileCache::build(dir.path(), options()).await.unwrap();
        let second = StaticFileCache::build(dir.path(), options()).await.unwrap();
        assert_eq!(first.paths(), second.paths());
        for path in first.paths() {
            assert_eq!(first.get(path), second.get(path), "{}", path);
        }
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(StaticFileCache::build(missing, StaticOptions::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_etag_304_round_trip() {
        let dir = fixture();
        let cache = StaticFileCache::build(dir.path(), options()).await.unwrap();

        let mut req = HttpRequest::new(Method::GET, "/about.html");
        let mut res = HttpResponse::new();
        assert!(cache.handle_req(&mut req, &mut res));
        let first = emit(&req, res, &CompressionConfig::default());
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["cache-control"], "no-cache");
        let etag = first.headers()["etag"].to_str().unwrap().to_string();

        let mut req = HttpRequest::new(Method::GET, "/about.html").with_header("If-None-Match", &etag);
        let mut res = HttpResponse::new();
        assert!(cache.handle_req(&mut req, &mut res));
        let second = emit(&req, res, &CompressionConfig::default());
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        assert!(second.into_body().collect().await.unwrap().to_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_if_modified_since() {
        let dir = fixture();
        let cache = StaticFileCache::build(dir.path(), options()).await.unwrap();
        let last_modified = cache.get("/about.html").unwrap().last_modified.clone();

        let mut req = HttpRequest::new(Method::GET, "/about.html").with_header("If-Modified-Since", &last_modified);
        let mut res = HttpResponse::new();
        cache.handle_req(&mut req, &mut res);
        assert_eq!(res.status_code(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_directory_redirect_keeps_query() {
        let dir = fixture();
        let cache = StaticFileCache::build(dir.path(), options()).await.unwrap();
        let mut req = HttpRequest::new(Method::GET, "/docs?lang=zh");
        let mut res = HttpResponse::new();
        assert!(cache.handle_req(&mut req, &mut res));
        assert_eq!(res.status_code(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.header("location"), Some("/docs/?lang=zh"));
    }

    #[tokio::test]
    async fn test_gzip_and_head() {
        let dir = fixture();
        let cache = StaticFileCache::build(dir.path(), options()).await.unwrap();
        let details = cache.get("/js/app.3f2a9c.js").unwrap().clone();

        let mut req = HttpRequest::new(Method::GET, "/js/app.3f2a9c.js").with_header("Accept-Encoding", "gzip");
        let mut res = HttpResponse::new();
        assert!(cache.handle_req(&mut req, &mut res));
        assert_eq!(res.header("content-encoding"), Some("gzip"));
        assert_eq!(res.header("cache-control"), Some(IMMUTABLE_CACHE_CONTROL));
        let response = emit(&req, res, &CompressionConfig::default());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, details.gzip);

        let mut req = HttpRequest::new(Method::HEAD, "/js/app.3f2a9c.js");
        let mut res = HttpResponse::new();
        assert!(cache.handle_req(&mut req, &mut res));
        let response = emit(&req, res, &CompressionConfig::default());
        assert_eq!(response.headers()["content-length"], details.size.to_string().as_str());
        assert!(response.into_body().collect().await.unwrap().to_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_other_methods_unhandled() {
        let dir = fixture();
        let cache = StaticFileCache::build(dir.path(), options()).await.unwrap();
        let mut req = HttpRequest::new(Method::POST, "/about.html");
        let mut res = HttpResponse::new();
        assert!(!cache.handle_req(&mut req, &mut res));
        let mut req = HttpRequest::new(Method::GET, "/missing.css");
        assert!(!cache.handle_req(&mut req, &mut res));
    }
}
