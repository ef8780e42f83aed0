//! 中间件链
//!
//! 中间件按注册顺序执行，通过 [`Next::run`] 把控制权交给下一环，
//! `run` 返回后的代码按相反顺序执行（后进先出）。不调用 `next` 即短路。
//!
//! 链尾是端点。OPTIONS 请求走完整条链后不会调用端点：
//! 预检响应完全由 CORS 中间件负责。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::Method;

use crate::error::HandlerResult;
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::utils::logger::debug;

/// 装箱 future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 中间件
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: &mut HttpRequest, res: &mut HttpResponse, next: Next<'_>) -> HandlerResult;

    /// 用于日志的名称
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 端点（路由处理器）
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> HandlerResult;
}

/// 闭包端点
///
/// ```ignore
/// router.get("/ping", |_req, res| Box::pin(async move {
///     res.text("pong");
///     Ok(())
/// }))?;
/// ```
pub struct FnEndpoint<F> {
    f: F,
}

impl<F> FnEndpoint<F>
where
    F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Endpoint for FnEndpoint<F>
where
    F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    async fn call(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> HandlerResult {
        (self.f)(req, res).await
    }
}

/// 闭包中间件
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse, Next<'a>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    async fn handle(&self, req: &mut HttpRequest, res: &mut HttpResponse, next: Next<'_>) -> HandlerResult {
        (self.f)(req, res, next).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 用闭包构造中间件
pub fn middleware_fn<F>(name: &str, f: F) -> Arc<dyn Middleware>
where
    F: for<'a> Fn(&'a mut HttpRequest, &'a mut HttpResponse, Next<'a>) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnMiddleware {
        name: name.to_string(),
        f,
    })
}

/// 链上剩余的中间件与端点
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { chain, endpoint }
    }

    /// 执行链上的下一环
    pub async fn run(self, req: &mut HttpRequest, res: &mut HttpResponse) -> HandlerResult {
        match self.chain.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    chain: rest,
                    endpoint: self.endpoint,
                };
                current.handle(req, res, next).await
            }
            None => {
                if req.method() == Method::OPTIONS {
                    debug!("🔍 [Middleware] OPTIONS 请求不调用端点: {}", req.path());
                    return Ok(());
                }
                self.endpoint.call(req, res).await
            }
        }
    }

    /// 剩余中间件数量
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}
