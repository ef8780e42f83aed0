//! 健康检查
//!
//! 服务器持有一个 [`HealthRegistry`]；访问健康检查路径时依次执行所有检查，
//! 全部通过返回 200，否则返回 503。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::StatusCode;
use serde_json::{json, Map, Value};

use crate::server::http_response::HttpResponse;
use crate::utils::logger::warn;

/// 单项健康检查
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// 返回 `Err(原因)` 表示不健康
    async fn check(&self) -> Result<(), String>;
}

#[async_trait]
impl<F, Fut> HealthCheck for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn check(&self) -> Result<(), String> {
        (self)().await
    }
}

/// 健康检查结果
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: Map<String, Value>,
}

impl HealthReport {
    pub fn status_code(&self) -> StatusCode {
        if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "status": if self.healthy { "ok" } else { "error" },
            "checks": self.checks,
        })
    }
}

/// 健康检查注册表
#[derive(Default, Clone)]
pub struct HealthRegistry {
    checks: Vec<(String, Arc<dyn HealthCheck>)>,
}

impl std::fmt::Debug for HealthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.checks.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("HealthRegistry").field("checks", &names).finish()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, check: Arc<dyn HealthCheck>) {
        self.checks.push((name.to_string(), check));
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// 按注册顺序执行所有检查
    pub async fn run(&self) -> HealthReport {
        let mut healthy = true;
        let mut checks = Map::new();
        for (name, check) in &self.checks {
            let value = match check.check().await {
                Ok(()) => json!({ "status": "ok" }),
                Err(reason) => {
                    warn!("🩺 [Health] 检查 '{}' 失败: {}", name, reason);
                    healthy = false;
                    json!({ "status": "error", "error": reason })
                }
            };
            checks.insert(name.clone(), value);
        }
        HealthReport { healthy, checks }
    }

    /// 执行检查并写入响应
    pub async fn respond(&self, res: &mut HttpResponse) {
        let report = self.run().await;
        res.status(report.status_code());
        res.set_header("cache-control", "no-store");
        res.json(report.to_json());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_passing() {
        let mut registry = HealthRegistry::new();
        registry.add("db", Arc::new(|| async { Ok::<(), String>(()) }));
        let mut res = HttpResponse::new();
        registry.respond(&mut res).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(
            res.json_payload(),
            Some(&json!({"status": "ok", "checks": {"db": {"status": "ok"}}}))
        );
    }

    #[tokio::test]
    async fn test_failure_is_503() {
        let mut registry = HealthRegistry::new();
        registry.add("db", Arc::new(|| async { Ok::<(), String>(()) }));
        registry.add("cache", Arc::new(|| async { Err::<(), String>("connection refused".to_string()) }));
        let report = registry.run().await;
        assert!(!report.healthy);
        assert_eq!(report.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.checks["cache"]["error"], "connection refused");
    }

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let report = HealthRegistry::new().run().await;
        assert!(report.healthy);
        assert_eq!(report.to_json(), json!({"status": "ok", "checks": {}}));
    }
}
