use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

/// 併發試驗排程器
///
/// 以號誌限制同時執行的試驗數；取消訊號一旦發出就不再核發
/// 新許可，在途任務於寬限時間內收尾，逾時強制中止。
pub struct TrialScheduler {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<()>,
    cancel_rx: watch::Receiver<bool>,
    grace: Duration,
}

impl TrialScheduler {
    pub fn new(max_concurrent: usize, cancel_rx: watch::Receiver<bool>, grace: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: JoinSet::new(),
            cancel_rx,
            grace,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// 取得派發許可；收到取消訊號時回傳 `None`
    pub async fn acquire(&mut self) -> Option<OwnedSemaphorePermit> {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => {
                // 號誌在排程器存活期間不關閉
                permit.ok()
            }
            _ = self.cancel_rx.changed() => None,
        }
    }

    /// 派發一個持有許可的試驗任務
    pub fn dispatch<F>(&mut self, permit: OwnedSemaphorePermit, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            fut.await;
            drop(permit);
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// 等待所有在途任務完成
    pub async fn drain(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// 寬限等待後強制中止殘餘任務；回傳被中止的任務數
    pub async fn shutdown(&mut self) -> usize {
        let deadline = tokio::time::Instant::now() + self.grace;
        loop {
            if self.tasks.is_empty() {
                return 0;
            }
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return 0,
                Err(_) => {
                    let killed = self.tasks.len();
                    warn!(killed, "寬限逾時，強制中止在途試驗");
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    return killed;
                }
            }
        }
    }
}
