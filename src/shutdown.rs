use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 一次关闭的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// 在期限内退出的后台任务
    pub completed: Vec<String>,
    /// 超过期限被强制中止的后台任务
    pub aborted: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty()
    }
}

/// 优雅关闭协调
///
/// 后台循环通过 [`ShutdownManager::subscribe`] 获得关闭信号；
/// 由 [`ShutdownManager::track`] 登记的任务在关闭时按期限等待，超时的直接中止。
pub struct ShutdownManager {
    signal: broadcast::Sender<()>,
    triggered: AtomicBool,
    tracked: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (signal, _) = broadcast::channel(4);
        Self {
            signal,
            triggered: AtomicBool::new(false),
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// 订阅关闭信号，已经触发过时返回的接收器立即就绪
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        if self.is_triggered() {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.signal.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// 登记需要在关闭时等待的后台任务
    pub async fn track(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tracked.lock().await.push((name.into(), handle));
    }

    /// 只广播关闭信号，不等待后台任务
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("关闭信号已经发送过");
            return;
        }
        let receivers = self.signal.send(()).unwrap_or(0);
        info!("关闭信号已发送给 {} 个订阅者", receivers);
    }

    /// 广播关闭信号并在期限内等待登记的任务退出
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        self.trigger();

        let tracked = std::mem::take(&mut *self.tracked.lock().await);
        let until = Instant::now() + deadline;
        let mut report = ShutdownReport::default();

        for (name, mut handle) in tracked {
            match tokio::time::timeout_at(until, &mut handle).await {
                Ok(Ok(())) => report.completed.push(name),
                Ok(Err(e)) => {
                    warn!("后台任务 {} 异常退出: {}", name, e);
                    report.completed.push(name);
                }
                Err(_) => {
                    warn!("后台任务 {} 未在 {:?} 内退出，强制中止", name, deadline);
                    handle.abort();
                    report.aborted.push(name);
                }
            }
        }
        report
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
