//! rat_webcore 命令行入口
//!
//! 加载配置（文件 < 环境变量 < 命令行）、初始化日志、构建静态文件缓存，
//! 注册状态接口与健康检查，运行到 Ctrl+C 后关闭。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use rat_webcore::server::{
    ConfigOverrides, EndpointOptions, HttpServer, Router, SecurityHeaders, ServerConfig, SseEvent, SseOptions,
    StaticFileCache,
};
use rat_webcore::utils::logger::{info, init_logger, warn, LogLevel};
use rat_webcore::Method;

#[derive(Parser, Debug)]
#[command(name = "rat_webcore", version, about = "可嵌入的 HTTP 服务器内核")]
struct Cli {
    /// TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 监听地址
    #[arg(long)]
    host: Option<String>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 静态文件目录
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// 日志级别 (error/warn/info/debug/trace)
    #[arg(long)]
    log_level: Option<LogLevel>,
}

fn build_router(server: &HttpServer) -> anyhow::Result<Router> {
    let mut router = Router::new("/api");
    router.use_middleware(Arc::new(SecurityHeaders::new()));
    router.use_middleware(Arc::new(server.body_parser()));

    let registry = server.registry().clone();
    let started = Instant::now();
    router.get("/status", move |_req, res| {
        res.json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": started.elapsed().as_secs(),
            "connections": registry.len(),
        }));
        Box::pin(async { Ok(()) })
    })?;

    router.post("/echo", |req, res| {
        let payload = req.json_value().cloned().unwrap_or(serde_json::Value::Null);
        res.json(json!({ "echo": payload }));
        Box::pin(async { Ok(()) })
    })?;

    let sse = SseOptions::new()
        .retry_interval(Duration::from_secs(3))
        .ping_interval(Duration::from_secs(15));
    router.endpoint(
        Method::GET,
        "/events",
        |req, _res| {
            if let Some(channel) = req.sse() {
                if let Err(e) = channel.send_data("connected", SseEvent::new().event("hello")) {
                    warn!("⚠️ [SSE] 发送欢迎事件失败: {}", e);
                }
            }
            Box::pin(async { Ok(()) })
        },
        EndpointOptions::new().sse(sse),
    )?;

    Ok(router)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        host: cli.host,
        port: cli.port,
        static_dir: cli.static_dir,
        log_level: cli.log_level,
    };
    let config = ServerConfig::load(cli.config.as_deref(), &overrides).context("加载配置失败")?;
    init_logger(&config.log).map_err(anyhow::Error::msg)?;

    let static_cache = match &config.static_files {
        Some(static_config) => {
            let options = static_config.to_options()?;
            Some(Arc::new(StaticFileCache::build(static_config.dir.clone(), options).await?))
        }
        None => None,
    };

    let mut server = HttpServer::new(config);
    let router = build_router(&server)?;
    server.add_router(Arc::new(router));
    if let Some(cache) = static_cache {
        server.set_static_files(cache);
    }
    server.add_health_check("self", Arc::new(|| async { Ok::<(), String>(()) }));

    let server = Arc::new(server);
    let addr = server.listen().await?;
    info!("✅ rat_webcore 已启动: http://{}", addr);

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await })
    };

    tokio::signal::ctrl_c().await.context("无法监听 Ctrl+C 信号")?;
    info!("🛑 收到 Ctrl+C 信号，正在关闭服务器...");
    server.shutdown().await;
    serving.await.context("服务任务异常退出")??;
    Ok(())
}
