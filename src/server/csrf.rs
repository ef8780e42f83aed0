//! CSRF 守卫
//!
//! 三种策略：
//!
//! - `CustomRequestHeader`：只要求请求带有指定头部（跨站表单无法设置自定义头）
//! - `NaiveDoubleSubmitCookie`：头部值必须与 cookie 值相同
//! - `SignedDoubleSubmitCookie`：cookie 为 `token<分隔符>signature`，签名为
//!   HMAC(secret, token) 的 base64url（无填充）编码；头部值必须与 cookie 值相同且签名有效

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use hyper::Method;

use crate::error::{HandlerError, HandlerResult, RatError, RatResult};
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::middleware::{Middleware, Next};
use crate::utils::cookie::{CookieOptions, SameSite};
use crate::utils::logger::{debug, warn};

/// 签名算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

/// 校验策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrfStrategy {
    CustomRequestHeader,
    NaiveDoubleSubmitCookie,
    SignedDoubleSubmitCookie { secret: String, algorithm: HmacAlgorithm },
}

/// CSRF 配置
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    pub strategy: CsrfStrategy,
    pub header_name: String,
    pub cookie_name: String,
    /// 需要校验的方法
    pub methods: Vec<Method>,
    /// 签名 cookie 中 token 与签名之间的分隔符
    pub separator: String,
    /// 签发 token 时使用的 cookie 属性
    pub cookie_options: CookieOptions,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            strategy: CsrfStrategy::NaiveDoubleSubmitCookie,
            header_name: "x-csrf-token".to_string(),
            cookie_name: "csrf_token".to_string(),
            methods: vec![Method::POST, Method::PUT, Method::PATCH, Method::DELETE],
            separator: ".".to_string(),
            cookie_options: CookieOptions::new().same_site(SameSite::Lax),
        }
    }
}

impl CsrfConfig {
    pub fn new(strategy: CsrfStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn methods<I: IntoIterator<Item = Method>>(mut self, methods: I) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn cookie_options(mut self, options: CookieOptions) -> Self {
        self.cookie_options = options;
        self
    }
}

fn hmac_sign<M: Mac + KeyInit>(secret: &[u8], message: &[u8]) -> Option<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(secret).ok()?;
    mac.update(message);
    Some(mac.finalize().into_bytes().to_vec())
}

fn hmac_verify<M: Mac + KeyInit>(secret: &[u8], message: &[u8], signature: &[u8]) -> bool {
    match <M as KeyInit>::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(message);
            mac.verify_slice(signature).is_ok()
        }
        Err(_) => false,
    }
}

/// 长度不同直接返回 false，长度相同时比较耗时与内容无关
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// CSRF 中间件
#[derive(Debug)]
pub struct CsrfGuard {
    config: CsrfConfig,
}

impl CsrfGuard {
    pub fn new(config: CsrfConfig) -> RatResult<Self> {
        if let CsrfStrategy::SignedDoubleSubmitCookie { secret, .. } = &config.strategy {
            if secret.is_empty() {
                return Err(RatError::Config("CSRF 签名密钥不能为空".to_string()));
            }
            if config.separator.is_empty() {
                return Err(RatError::Config("CSRF 签名分隔符不能为空".to_string()));
            }
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// 对 token 签名，非签名策略返回 `None`
    pub fn sign(&self, token: &str) -> Option<String> {
        let CsrfStrategy::SignedDoubleSubmitCookie { secret, algorithm } = &self.config.strategy else {
            return None;
        };
        let signature = match algorithm {
            HmacAlgorithm::Sha1 => hmac_sign::<Hmac<sha1::Sha1>>(secret.as_bytes(), token.as_bytes()),
            HmacAlgorithm::Sha256 => hmac_sign::<Hmac<sha2::Sha256>>(secret.as_bytes(), token.as_bytes()),
            HmacAlgorithm::Sha512 => hmac_sign::<Hmac<sha2::Sha512>>(secret.as_bytes(), token.as_bytes()),
        }?;
        Some(URL_SAFE_NO_PAD.encode(signature))
    }

    fn verify_signed(&self, cookie: &str, secret: &str, algorithm: HmacAlgorithm) -> bool {
        let Some((token, encoded)) = cookie.rsplit_once(self.config.separator.as_str()) else {
            return false;
        };
        if token.is_empty() {
            return false;
        }
        let Ok(signature) = URL_SAFE_NO_PAD.decode(encoded) else {
            return false;
        };
        let (secret, token) = (secret.as_bytes(), token.as_bytes());
        match algorithm {
            HmacAlgorithm::Sha1 => hmac_verify::<Hmac<sha1::Sha1>>(secret, token, &signature),
            HmacAlgorithm::Sha256 => hmac_verify::<Hmac<sha2::Sha256>>(secret, token, &signature),
            HmacAlgorithm::Sha512 => hmac_verify::<Hmac<sha2::Sha512>>(secret, token, &signature),
        }
    }

    /// 校验头部值与 cookie 值
    pub fn check(&self, header: Option<&str>, cookie: Option<&str>) -> bool {
        let header = header.filter(|h| !h.is_empty());
        match &self.config.strategy {
            CsrfStrategy::CustomRequestHeader => header.is_some(),
            CsrfStrategy::NaiveDoubleSubmitCookie => match (header, cookie) {
                (Some(h), Some(c)) => constant_time_eq(h.as_bytes(), c.as_bytes()),
                _ => false,
            },
            CsrfStrategy::SignedDoubleSubmitCookie { secret, algorithm } => match (header, cookie) {
                (Some(h), Some(c)) => {
                    constant_time_eq(h.as_bytes(), c.as_bytes()) && self.verify_signed(c, secret, *algorithm)
                }
                _ => false,
            },
        }
    }

    /// 签发新 token 并写入 cookie，返回客户端应回传到头部的值
    pub fn issue_token(&self, res: &mut HttpResponse) -> String {
        let token = hex::encode(rand::random::<[u8; 32]>());
        let value = match self.sign(&token) {
            Some(signature) => format!("{}{}{}", token, self.config.separator, signature),
            None => token,
        };
        res.set_cookie(&self.config.cookie_name, &value, self.config.cookie_options.clone());
        value
    }

    fn requires_check(&self, method: &Method) -> bool {
        self.config.methods.iter().any(|m| m == method)
    }
}

#[async_trait]
impl Middleware for CsrfGuard {
    async fn handle(&self, req: &mut HttpRequest, res: &mut HttpResponse, next: Next<'_>) -> HandlerResult {
        if self.requires_check(req.method()) {
            let cookie = req.cookie(&self.config.cookie_name);
            if !self.check(req.header(&self.config.header_name), cookie.as_deref()) {
                warn!("🚫 [CSRF] 校验失败: {} {}", req.method(), req.path());
                return Err(HandlerError::unauthorized("Invalid CSRF token"));
            }
            debug!("✅ [CSRF] 校验通过: {} {}", req.method(), req.path());
        }
        next.run(req, res).await
    }

    fn name(&self) -> &str {
        "CsrfGuard"
    }
}
