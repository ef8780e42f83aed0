//! HTTP/1.1 连接处理
//!
//! 每个连接一个任务：hyper `http1` 连接 + 空闲看门狗。
//! 连接空闲（无进行中的请求）超过配置时间后优雅关闭；SSE 连接会关闭看门狗。

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use super::HttpServer;
use crate::server::body::ResponseBody;
use crate::server::http_request::HttpRequest;
use crate::server::socket_registry::ConnectionHandle;
use crate::utils::logger::{debug, warn};

/// 看门狗检查间隔上限
const WATCHDOG_TICK: Duration = Duration::from_secs(1);

fn is_client_disconnect(e: &hyper::Error) -> bool {
    if e.is_incomplete_message() || e.is_canceled() {
        return true;
    }
    let message = e.to_string();
    message.contains("connection reset") || message.contains("broken pipe") || message.contains("connection closed")
}

async fn handle_request(
    server: Arc<HttpServer>,
    req: Request<Incoming>,
    connection: ConnectionHandle,
) -> Result<Response<ResponseBody>, Infallible> {
    connection.request_started();
    let request = HttpRequest::from_hyper(req, Some(connection.clone()));
    debug!("📥 [HTTP] {} {} (连接 {})", request.method(), request.path(), connection.id());
    let response = server.handle(request).await;
    connection.request_finished();
    Ok(response)
}

/// 驱动一个连接直到关闭，结束时从注册表移除
pub async fn serve_connection(server: Arc<HttpServer>, stream: TcpStream, connection: ConnectionHandle) {
    let idle_timeout = server.config().idle_timeout();
    let service = {
        let server = server.clone();
        let connection = connection.clone();
        service_fn(move |req| handle_request(server.clone(), req, connection.clone()))
    };

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let tick = idle_timeout.map(|t| t.min(WATCHDOG_TICK)).unwrap_or(WATCHDOG_TICK);
    let mut watchdog = tokio::time::interval(tick);
    let mut closing = false;

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                match result {
                    Ok(()) => debug!("🔌 [HTTP] 连接关闭: {}", connection.remote_addr()),
                    Err(e) if is_client_disconnect(&e) => {
                        debug!("🔌 [HTTP] 客户端断开连接: {} ({})", connection.remote_addr(), e);
                    }
                    Err(e) => warn!("⚠️ [HTTP] 连接处理失败 {}: {}", connection.remote_addr(), e),
                }
                break;
            }
            _ = watchdog.tick(), if idle_timeout.is_some() && !closing => {
                let Some(timeout) = idle_timeout else { continue };
                if connection.idle_timeout_disabled() || connection.in_flight() > 0 {
                    continue;
                }
                if connection.idle_for() >= timeout {
                    debug!("⏱️ [HTTP] 连接空闲超时，关闭: {} ({:?})", connection.remote_addr(), timeout);
                    conn.as_mut().graceful_shutdown();
                    closing = true;
                }
            }
        }
    }

    server.registry().remove(connection.id());
}
