//! 路径匹配器
//!
//! 每个注册的路由路径只编译一次，得到一个纯函数式的匹配器：给定请求路径，
//! 返回 `None` 或 `RouteMatch { params, matched_info }`，不依赖任何外部状态。
//!
//! 模式语法：
//!
//! - 普通段：`/users`，大小写敏感
//! - 命名参数：`/users/:id`，匹配单个非空段
//! - 可选参数：`/files/:name?`，只能出现在最后，可以缺省
//! - 通配：`/assets/*` 或 `/assets/*rest`，匹配剩余全部路径（可以为空），只能出现在最后
//!
//! 路径末尾的单个 `/` 不影响匹配；参数值会做百分号解码。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{RatError, RatResult};

/// 匹配器附带给请求的不透明信息
pub type MatchedInfo = Arc<dyn Any + Send + Sync>;

/// 一次成功的匹配
#[derive(Debug, Clone, Default)]
pub struct RouteMatch {
    pub params: HashMap<String, String>,
    pub matched_info: Option<MatchedInfo>,
}

/// 匹配器
pub trait Matcher: Send + Sync + fmt::Debug {
    fn matches(&self, path: &str) -> Option<RouteMatch>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Optional(String),
    Wildcard(String),
}

/// 由路由模式字符串编译得到的匹配器
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    segments: Vec<Segment>,
    info: Arc<String>,
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

impl PatternMatcher {
    /// 编译路由模式
    pub fn compile(pattern: &str) -> RatResult<Self> {
        if !pattern.starts_with('/') {
            return Err(RatError::Pattern(format!("路由模式必须以 '/' 开头: {}", pattern)));
        }

        let raw_segments = split_path(pattern);
        let mut segments = Vec::with_capacity(raw_segments.len());
        let mut names = Vec::new();

        for (pos, raw) in raw_segments.iter().enumerate() {
            let is_last = pos + 1 == raw_segments.len();
            let segment = if let Some(rest) = raw.strip_prefix(':') {
                let (name, optional) = match rest.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (rest, false),
                };
                if name.is_empty() {
                    return Err(RatError::Pattern(format!("路由 '{}' 含有空参数名", pattern)));
                }
                if optional && !is_last {
                    return Err(RatError::Pattern(format!(
                        "路由 '{}' 中的可选参数 '{}' 必须是最后一段", pattern, name
                    )));
                }
                names.push(name.to_string());
                if optional {
                    Segment::Optional(name.to_string())
                } else {
                    Segment::Param(name.to_string())
                }
            } else if let Some(rest) = raw.strip_prefix('*') {
                if !is_last {
                    return Err(RatError::Pattern(format!("路由 '{}' 中的通配段必须是最后一段", pattern)));
                }
                let name = if rest.is_empty() { "*" } else { rest };
                names.push(name.to_string());
                Segment::Wildcard(name.to_string())
            } else {
                Segment::Literal(raw.to_string())
            };
            segments.push(segment);
        }

        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != names.len() {
            return Err(RatError::Pattern(format!("路由 '{}' 含有重复的参数名", pattern)));
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
            info: Arc::new(pattern.to_string()),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn decode(raw: &str) -> Option<String> {
        urlencoding::decode(raw).ok().map(|s| s.into_owned())
    }
}

impl Matcher for PatternMatcher {
    fn matches(&self, path: &str) -> Option<RouteMatch> {
        let request_segments = split_path(path);
        let mut params = HashMap::new();
        let mut consumed = 0;

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    if *request_segments.get(consumed)? != literal.as_str() {
                        return None;
                    }
                    consumed += 1;
                }
                Segment::Param(name) => {
                    let value = request_segments.get(consumed).filter(|s| !s.is_empty())?;
                    params.insert(name.clone(), Self::decode(value)?);
                    consumed += 1;
                }
                Segment::Optional(name) => {
                    if let Some(value) = request_segments.get(consumed).filter(|s| !s.is_empty()) {
                        params.insert(name.clone(), Self::decode(value)?);
                        consumed += 1;
                    }
                }
                Segment::Wildcard(name) => {
                    let rest = request_segments[consumed.min(request_segments.len())..].join("/");
                    params.insert(name.clone(), Self::decode(&rest)?);
                    consumed = request_segments.len();
                }
            }
        }

        if consumed != request_segments.len() {
            return None;
        }

        Some(RouteMatch {
            params,
            matched_info: Some(self.info.clone()),
        })
    }
}

/// 基于正则表达式的匹配器，命名捕获组作为路径参数
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    info: Arc<String>,
}

impl RegexMatcher {
    /// 正则会被锚定到整个路径
    pub fn new(pattern: &str) -> RatResult<Self> {
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored)
            .map_err(|e| RatError::Pattern(format!("正则路由 '{}' 编译失败: {}", pattern, e)))?;
        Ok(Self {
            regex,
            info: Arc::new(pattern.to_string()),
        })
    }
}

impl Matcher for RegexMatcher {
    fn matches(&self, path: &str) -> Option<RouteMatch> {
        let captures = self.regex.captures(path)?;
        let mut params = HashMap::new();
        for name in self.regex.capture_names().flatten() {
            if let Some(value) = captures.name(name) {
                params.insert(name.to_string(), PatternMatcher::decode(value.as_str())?);
            }
        }
        Some(RouteMatch {
            params,
            matched_info: Some(self.info.clone()),
        })
    }
}
