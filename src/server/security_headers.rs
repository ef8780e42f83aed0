//! 安全响应头中间件

use async_trait::async_trait;

use crate::error::HandlerResult;
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::middleware::{Middleware, Next};

/// 默认安全头
pub const DEFAULT_SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-frame-options", "SAMEORIGIN"),
    ("x-content-type-options", "nosniff"),
    ("content-security-policy", "default-src 'self'"),
    ("referrer-policy", "no-referrer"),
    ("x-xss-protection", "0"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("cross-origin-opener-policy", "same-origin"),
];

/// 在进入处理链前写入一组安全响应头
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(String, String)>,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityHeaders {
    pub fn new() -> Self {
        Self {
            headers: DEFAULT_SECURITY_HEADERS
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }

    /// 覆盖默认值；值为 `None` 时移除该头
    pub fn with_overrides<I, S>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<S>)>,
        S: Into<String>,
    {
        for (name, value) in overrides {
            let name = name.into().to_ascii_lowercase();
            self.headers.retain(|(existing, _)| *existing != name);
            if let Some(value) = value {
                self.headers.push((name, value.into()));
            }
        }
        self
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

#[async_trait]
impl Middleware for SecurityHeaders {
    async fn handle(&self, req: &mut HttpRequest, res: &mut HttpResponse, next: Next<'_>) -> HandlerResult {
        for (name, value) in &self.headers {
            res.set_header(name, value);
        }
        next.run(req, res).await
    }

    fn name(&self) -> &str {
        "SecurityHeaders"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::middleware::{Endpoint, FnEndpoint};
    use hyper::Method;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_defaults_and_overrides() {
        let mw: Arc<dyn Middleware> = Arc::new(SecurityHeaders::new().with_overrides([
            ("Content-Security-Policy", Some("default-src 'none'")),
            ("x-xss-protection", None),
        ]));
        let endpoint: Arc<dyn Endpoint> = Arc::new(FnEndpoint::new(|_req, res| {
            Box::pin(async move {
                res.text("ok");
                Ok(())
            })
        }));

        let chain = vec![mw];
        let mut req = HttpRequest::new(Method::GET, "/");
        let mut res = HttpResponse::new();
        Next::new(&chain, endpoint.as_ref()).run(&mut req, &mut res).await.unwrap();

        assert_eq!(res.header("x-frame-options"), Some("SAMEORIGIN"));
        assert_eq!(res.header("content-security-policy"), Some("default-src 'none'"));
        assert!(res.header("x-xss-protection").is_none());
    }
}
