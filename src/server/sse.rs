//! SSE 通道
//!
//! 把一个响应转换为长连接事件流。通道与响应一一对应：构造时接管响应体，
//! 之后通过 [`SseChannel::send_data`] 推送事件，可选的定时 ping 任务在客户端断开
//! 或通道关闭时自动结束。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{future, StreamExt};
use hyper::StatusCode;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::server::body::BoxError;
use crate::server::http_request::HttpRequest;
use crate::server::http_response::HttpResponse;
use crate::utils::logger::{debug, info, warn};

/// SSE 通道选项
#[derive(Debug, Clone)]
pub struct SseOptions {
    /// 建连后立即下发的 `retry:` 重连间隔
    pub retry_interval: Option<Duration>,
    /// ping 间隔，`None` 表示不发送 ping
    pub ping_interval: Option<Duration>,
    pub ping_event_name: String,
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            retry_interval: None,
            ping_interval: None,
            ping_event_name: "ping".to_string(),
        }
    }
}

impl SseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    pub fn ping_event_name(mut self, name: impl Into<String>) -> Self {
        self.ping_event_name = name.into();
        self
    }
}

/// 单个事件的可选字段
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
}

impl SseEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.event = Some(name.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug)]
enum SseMessage {
    Data(Bytes),
    Close,
}

#[derive(Debug)]
struct SseInner {
    sender: mpsc::UnboundedSender<SseMessage>,
    last_event_id: Option<String>,
    ping_seq: AtomicU64,
    cancel: Notify,
    closed: AtomicBool,
}

/// SSE 通道
#[derive(Debug, Clone)]
pub struct SseChannel {
    inner: Arc<SseInner>,
}

/// 单行字段里的换行会破坏事件边界
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

impl SseChannel {
    /// 接管响应并开始事件流
    pub fn new(req: &mut HttpRequest, res: &mut HttpResponse, options: SseOptions) -> Self {
        if let Some(conn) = req.connection() {
            conn.disable_idle_timeout();
            if let Err(e) = conn.set_nodelay(true) {
                warn!("⚠️ [SSE] 设置 TCP_NODELAY 失败: {}", e);
            }
        }
        req.disable_compression();

        res.status(StatusCode::OK);
        res.set_header("content-type", "text/event-stream");
        res.set_header("connection", "keep-alive");
        res.set_header("cache-control", "no-cache");

        let (sender, receiver) = mpsc::unbounded_channel();
        let stream = UnboundedReceiverStream::new(receiver)
            .take_while(|msg| future::ready(matches!(msg, SseMessage::Data(_))))
            .map(|msg| match msg {
                SseMessage::Data(bytes) => Ok::<Bytes, BoxError>(bytes),
                SseMessage::Close => Ok(Bytes::new()),
            });
        res.claim_for_sse(Box::pin(stream));

        let channel = Self {
            inner: Arc::new(SseInner {
                sender,
                last_event_id: req.header("last-event-id").map(str::to_string),
                ping_seq: AtomicU64::new(0),
                cancel: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        };

        if let Some(retry) = options.retry_interval {
            channel.write(format!("retry: {}\n\n", retry.as_millis()));
        }
        if let Some(interval) = options.ping_interval {
            channel.spawn_ping(interval, options.ping_event_name);
        }

        info!("🔗 [SSE] 建立事件流: {}", req.path());
        channel
    }

    fn write(&self, frame: String) -> bool {
        self.inner.sender.send(SseMessage::Data(Bytes::from(frame))).is_ok()
    }

    fn spawn_ping(&self, interval: Duration, event_name: String) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = inner.cancel.notified() => break,
                    _ = inner.sender.closed() => {
                        debug!("🔌 [SSE] 客户端已断开，停止 ping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let seq = inner.ping_seq.fetch_add(1, Ordering::Relaxed) + 1;
                        let frame = format!("event: {}\nid: {}\ndata: {}\n\n", event_name, seq, seq);
                        if inner.sender.send(SseMessage::Data(Bytes::from(frame))).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// 按 SSE 格式序列化一个事件
    ///
    /// 字符串原样输出（含换行时按 JSON 编码以保证只有一行 `data:`），其余值输出 JSON。
    pub fn format_event(payload: &Value, event: &SseEvent) -> String {
        let mut frame = String::new();
        if let Some(name) = &event.event {
            frame.push_str(&format!("event: {}\n", single_line(name)));
        }
        if let Some(id) = &event.id {
            frame.push_str(&format!("id: {}\n", single_line(id)));
        }
        let data = match payload {
            Value::String(s) if !s.contains(['\r', '\n']) => s.clone(),
            other => other.to_string(),
        };
        frame.push_str(&format!("data: {}\n\n", data));
        frame
    }

    /// 推送一个事件
    pub fn send_data(&self, payload: impl Into<Value>, event: SseEvent) -> Result<(), String> {
        if self.is_closed() {
            return Err("SSE 通道已关闭".to_string());
        }
        let frame = Self::format_event(&payload.into(), &event);
        if self.write(frame) {
            Ok(())
        } else {
            Err("客户端已断开".to_string())
        }
    }

    /// 客户端通过 `Last-Event-ID` 声明的续传位置
    pub fn last_event_id(&self) -> Option<&str> {
        self.inner.last_event_id.as_deref()
    }

    /// 已发送的 ping 数量
    pub fn ping_count(&self) -> u64 {
        self.inner.ping_seq.load(Ordering::Relaxed)
    }

    /// 结束事件流并停止 ping
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.notify_one();
        let _ = self.inner.sender.send(SseMessage::Close);
        debug!("🔌 [SSE] 通道已关闭");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.sender.is_closed()
    }
}
