//! HTTP 服务器
//!
//! 持有配置、路由器列表、静态文件缓存、健康检查与连接注册表。
//! 每个接入的连接由 [`http_connection`] 在独立任务中驱动。

pub mod http_connection;

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::{Method, Response, StatusCode};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};

use crate::error::RatResult;
use crate::server::body::ResponseBody;
use crate::server::body_parser::BodyParser;
use crate::server::config::ServerConfig;
use crate::server::cors::CorsGuard;
use crate::server::health::{HealthCheck, HealthRegistry};
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::server::response_emitter::emit;
use crate::server::router::{write_error, Router};
use crate::server::socket_registry::SocketRegistry;
use crate::server::static_files::StaticFileCache;
use crate::utils::logger::{debug, error, info, warn};

/// HTTP 服务器
pub struct HttpServer {
    config: ServerConfig,
    routers: Vec<Arc<Router>>,
    static_files: Option<Arc<StaticFileCache>>,
    health: HealthRegistry,
    registry: Arc<SocketRegistry>,
    listener: Mutex<Option<TcpListener>>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("addr", &self.config.addr())
            .field("routers", &self.routers.len())
            .field("static_files", &self.static_files.as_ref().map(|c| c.len()))
            .field("health", &self.health)
            .field("connections", &self.registry.len())
            .finish()
    }
}

impl HttpServer {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            routers: Vec::new(),
            static_files: None,
            health: HealthRegistry::new(),
            registry: Arc::new(SocketRegistry::new()),
            listener: Mutex::new(None),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// 添加路由器，按添加顺序尝试
    pub fn add_router(&mut self, router: Arc<Router>) -> &mut Self {
        self.routers.push(router);
        self
    }

    /// 设置静态文件缓存，在所有路由器之后尝试
    pub fn set_static_files(&mut self, cache: Arc<StaticFileCache>) -> &mut Self {
        self.static_files = Some(cache);
        self
    }

    pub fn add_health_check(&mut self, name: &str, check: Arc<dyn HealthCheck>) -> &mut Self {
        self.health.add(name, check);
        self
    }

    /// 按配置上限创建请求体解析中间件
    pub fn body_parser(&self) -> BodyParser {
        BodyParser::new().max_body_size(self.config.max_body_size)
    }

    pub fn registry(&self) -> &Arc<SocketRegistry> {
        &self.registry
    }

    /// 绑定监听地址，返回实际地址（端口为 0 时由系统分配）
    pub async fn listen(&self) -> RatResult<SocketAddr> {
        let listener = TcpListener::bind(self.config.addr()).await?;
        let addr = listener.local_addr()?;
        *self.listener.lock().await = Some(listener);
        info!("🚀 RAT WebCore server listening on http://{}", addr);
        Ok(addr)
    }

    fn log_routes(&self) {
        for router in &self.routers {
            let routes = router.list_routes();
            if routes.is_empty() {
                continue;
            }
            info!("📋 已注册的 HTTP 路由 ({}):", if router.base_path().is_empty() { "/" } else { router.base_path() });
            for (method, path) in routes {
                info!("   {} {}", method, path);
            }
        }
        if let Some(cache) = &self.static_files {
            info!("📁 静态文件: {} ({} 个路径)", cache.root().display(), cache.len());
        }
        info!("🩺 健康检查: {} ({} 项)", self.config.health_path, self.health.len());
    }

    /// 接受连接直到 [`shutdown`](Self::shutdown) 被调用；尚未 `listen` 时先绑定
    pub async fn serve(self: &Arc<Self>) -> RatResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let listener = match self.listener.lock().await.take() {
            Some(listener) => listener,
            None => {
                let listener = TcpListener::bind(self.config.addr()).await?;
                info!("🚀 RAT WebCore server listening on http://{}", listener.local_addr()?);
                listener
            }
        };
        self.log_routes();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("⚠️ [服务端] 接受连接失败: {}", e);
                            continue;
                        }
                    };
                    let (stream, handle) = match self.registry.register(stream, remote_addr) {
                        Ok(registered) => registered,
                        Err(e) => {
                            error!("❌ [服务端] 注册连接失败 {}: {}", remote_addr, e);
                            continue;
                        }
                    };
                    debug!("🔗 [服务端] 新连接: {} (id={})", remote_addr, handle.id());
                    let server = Arc::clone(self);
                    tokio::spawn(http_connection::serve_connection(server, stream, handle));
                }
            }
        }

        drop(listener);
        info!("🛑 [服务端] 已停止接受新连接");
        Ok(())
    }

    /// 停止服务：关闭监听器并强制断开所有已跟踪的连接，不等待请求完成
    pub async fn shutdown(&self) -> usize {
        self.shutdown_tx.send_replace(true);
        // 尚未进入 serve 的监听器直接关闭
        drop(self.listener.lock().await.take());
        let destroyed = self.registry.destroy_all();
        info!("🛑 [服务端] 关闭完成，断开 {} 个连接", destroyed);
        destroyed
    }

    /// 处理一个请求：健康检查 → 路由器 → 静态文件 → 404，并生成最终响应
    pub async fn handle(&self, mut req: HttpRequest) -> Response<ResponseBody> {
        let mut res = HttpResponse::new();
        self.dispatch(&mut req, &mut res).await;
        emit(&req, res, &self.config.compression)
    }

    async fn dispatch(&self, req: &mut HttpRequest, res: &mut HttpResponse) {
        if req.path() == self.config.health_path && matches!(*req.method(), Method::GET | Method::HEAD) {
            self.health.respond(res).await;
            return;
        }

        for router in &self.routers {
            if router.handle_req(req, res).await {
                return;
            }
        }

        // 无前缀的 CORS 路由器覆盖所有路径，其余路由器都未匹配时才拒绝预检
        if CorsGuard::is_preflight(req)
            && self
                .routers
                .iter()
                .any(|router| router.cors_enabled() && router.base_path().is_empty())
        {
            debug!("🔍 [服务端] 预检请求没有对应路由: {}", req.path());
            write_error(res, StatusCode::BAD_REQUEST, "No route for preflight request");
            return;
        }

        if let Some(cache) = &self.static_files {
            if cache.handle_req(req, res) {
                return;
            }
        }

        debug!("🔍 [服务端] 未找到处理器: {} {}", req.method(), req.path());
        write_error(res, StatusCode::NOT_FOUND, "Not Found");
    }
}
