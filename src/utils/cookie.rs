//! Cookie 解析与 Set-Cookie 序列化

use std::collections::HashMap;
use std::fmt;

/// 解析 `Cookie` 请求头
///
/// 按 `;` 分割 `name=value` 对，去除首尾空白；同名 cookie 以第一次出现为准。
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = match pair.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => continue,
        };
        if name.is_empty() {
            continue;
        }
        cookies
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }
    cookies
}

/// SameSite 属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "Strict"),
            Self::Lax => write!(f, "Lax"),
            Self::None => write!(f, "None"),
        }
    }
}

/// Set-Cookie 属性
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    /// 秒；`Some(0)` 表示立即过期
    pub max_age: Option<i64>,
    /// 默认 `/`
    pub path: Option<String>,
    pub domain: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn http_only(mut self, on: bool) -> Self {
        self.http_only = on;
        self
    }

    pub fn secure(mut self, on: bool) -> Self {
        self.secure = on;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}

/// 一条待发送的 Set-Cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

impl SetCookie {
    /// 序列化为 Set-Cookie 头部值
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(max_age) = self.options.max_age {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        out.push_str("; Path=");
        out.push_str(self.options.path.as_deref().unwrap_or("/"));
        if let Some(domain) = &self.options.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if self.options.http_only {
            out.push_str("; HttpOnly");
        }
        if self.options.secure {
            out.push_str("; Secure");
        }
        if let Some(same_site) = self.options.same_site {
            out.push_str(&format!("; SameSite={}", same_site));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_first_match_wins() {
        let cookies = parse_cookies(" sid = abc ; theme=dark; sid=zzz; broken; =x");
        assert_eq!(cookies.get("sid").map(String::as_str), Some("abc"));
        assert_eq!(cookies.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(cookies.len(), 2);
    }

    #[test]
    fn test_value_may_contain_equals() {
        let cookies = parse_cookies("token=a=b=c");
        assert_eq!(cookies.get("token").map(String::as_str), Some("a=b=c"));
    }

    #[test]
    fn test_set_cookie_serialization() {
        let cookie = SetCookie {
            name: "sid".to_string(),
            value: "abc".to_string(),
            options: CookieOptions::new()
                .max_age(3600)
                .domain("example.com")
                .http_only(true)
                .secure(true)
                .same_site(SameSite::Lax),
        };
        assert_eq!(
            cookie.to_header_value(),
            "sid=abc; Max-Age=3600; Path=/; Domain=example.com; HttpOnly; Secure; SameSite=Lax"
        );
    }
}
