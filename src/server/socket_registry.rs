//! 连接注册表
//!
//! 服务器为每个接受的 TCP 连接登记一个 [`ConnectionHandle`]，关闭时移除。
//! 句柄持有套接字的一个复制描述符，用于在请求处理中调整套接字选项（SSE 关闭 Nagle），
//! 以及在服务器关闭时强制断开所有连接。

use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::TcpStream;

use crate::utils::logger::{debug, warn};

#[derive(Debug)]
struct ConnectionState {
    id: u64,
    remote_addr: SocketAddr,
    socket: std::net::TcpStream,
    idle_timeout_disabled: AtomicBool,
    in_flight: AtomicUsize,
    last_activity: Mutex<Instant>,
}

/// 单个连接的句柄
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    state: Arc<ConnectionState>,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.state.remote_addr
    }

    /// 设置 TCP_NODELAY
    pub fn set_nodelay(&self, nodelay: bool) -> std::io::Result<()> {
        self.state.socket.set_nodelay(nodelay)
    }

    /// 关闭该连接的空闲超时（长连接流式响应使用）
    pub fn disable_idle_timeout(&self) {
        self.state.idle_timeout_disabled.store(true, Ordering::Release);
    }

    pub fn idle_timeout_disabled(&self) -> bool {
        self.state.idle_timeout_disabled.load(Ordering::Acquire)
    }

    pub(crate) fn request_started(&self) {
        self.state.in_flight.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    pub(crate) fn request_finished(&self) {
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.touch();
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    fn touch(&self) {
        if let Ok(mut last) = self.state.last_activity.lock() {
            *last = Instant::now();
        }
    }

    /// 距离上一次请求开始/结束的时间
    pub fn idle_for(&self) -> Duration {
        self.state
            .last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// 强制断开连接
    pub fn destroy(&self) {
        if let Err(e) = self.state.socket.shutdown(Shutdown::Both) {
            debug!("🔌 [连接注册表] 关闭连接 {} 失败（可能已断开）: {}", self.state.id, e);
        }
    }
}

/// 连接注册表
#[derive(Debug, Default)]
pub struct SocketRegistry {
    sockets: DashMap<u64, ConnectionHandle>,
    next_id: AtomicU64,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个新连接，返回继续交给 hyper 使用的流与连接句柄
    pub fn register(&self, stream: TcpStream, remote_addr: SocketAddr) -> std::io::Result<(TcpStream, ConnectionHandle)> {
        let std_stream = stream.into_std()?;
        let control = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = ConnectionHandle {
            state: Arc::new(ConnectionState {
                id,
                remote_addr,
                socket: control,
                idle_timeout_disabled: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                last_activity: Mutex::new(Instant::now()),
            }),
        };
        self.sockets.insert(id, handle.clone());
        debug!("🔗 [连接注册表] 登记连接 {} ({})", id, remote_addr);
        Ok((stream, handle))
    }

    pub fn remove(&self, id: u64) {
        if self.sockets.remove(&id).is_some() {
            debug!("🔌 [连接注册表] 移除连接 {}", id);
        }
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// 强制断开并清空所有连接
    pub fn destroy_all(&self) -> usize {
        let handles: Vec<ConnectionHandle> = self.sockets.iter().map(|entry| entry.value().clone()).collect();
        for handle in &handles {
            handle.destroy();
        }
        self.sockets.clear();
        if !handles.is_empty() {
            warn!("🛑 [连接注册表] 已强制断开 {} 个连接", handles.len());
        }
        handles.len()
    }
}
