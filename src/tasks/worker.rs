use crate::app::AppContext;
use crate::tasks::broker::{QueuedTask, TaskBroker};
use crate::tasks::TaskKind;
use crate::utils::error::{Result, ScraperError};
use chrono::Duration as ChronoDuration;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Done { id: i64, task: String },
    Retried { id: i64, task: String, attempt: i64 },
    Failed { id: i64, task: String, error: String },
}

/// 從指定佇列取出工作並執行
#[derive(Clone)]
pub struct Worker {
    ctx: AppContext,
    broker: TaskBroker,
    queues: Vec<String>,
    concurrency: usize,
    poll_interval: Duration,
    time_limit: Duration,
    retry_delay: ChronoDuration,
}

impl Worker {
    pub fn new(ctx: AppContext, queues: Vec<String>, concurrency: usize) -> Self {
        let config = &ctx.config.worker;
        Self {
            broker: TaskBroker::new(ctx.db.clone()),
            queues,
            concurrency: concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            time_limit: Duration::from_secs(config.time_limit_seconds),
            retry_delay: ChronoDuration::seconds(config.retry_delay_seconds),
            ctx,
        }
    }

    /// 依設定檔的 queues / concurrency 建立
    pub fn from_config(ctx: AppContext) -> Self {
        let queues = ctx.config.worker.queues.clone();
        let concurrency = ctx.config.worker.concurrency;
        Self::new(ctx, queues, concurrency)
    }

    pub fn broker(&self) -> &TaskBroker {
        &self.broker
    }

    /// 取出一筆到期的工作並執行；佇列為空時回傳 None
    pub async fn run_once(&self) -> Result<Option<TaskOutcome>> {
        let Some(task) = self.broker.claim(&self.queues, self.ctx.now()).await? else {
            return Ok(None);
        };

        tracing::info!(
            "▶️ Task {} [{}] (id {}, attempt {})",
            task.task,
            task.queue,
            task.id,
            task.attempts
        );

        let outcome = match self.execute(&task).await {
            Ok(result) => {
                self.broker.complete(task.id, &result, self.ctx.now()).await?;
                tracing::info!("✅ Task {} (id {}) done", task.task, task.id);
                TaskOutcome::Done {
                    id: task.id,
                    task: task.task,
                }
            }
            Err(e) if task.can_retry() && e.is_retryable() => {
                let eta = self.ctx.now() + self.retry_delay;
                tracing::warn!(
                    "🔁 Task {} (id {}) failed, retry at {}: {}",
                    task.task,
                    task.id,
                    eta,
                    e
                );
                self.broker.retry(task.id, &e.to_string(), eta).await?;
                TaskOutcome::Retried {
                    id: task.id,
                    task: task.task,
                    attempt: task.attempts,
                }
            }
            Err(e) => {
                tracing::error!("❌ Task {} (id {}) failed: {}", task.task, task.id, e);
                let error = e.to_string();
                self.broker.fail(task.id, &error, self.ctx.now()).await?;
                TaskOutcome::Failed {
                    id: task.id,
                    task: task.task,
                    error,
                }
            }
        };

        Ok(Some(outcome))
    }

    /// 工作本體在獨立的 tokio task 中執行，panic 只會讓這筆工作失敗
    async fn execute(&self, task: &QueuedTask) -> Result<serde_json::Value> {
        let kind: TaskKind = task.task.parse()?;
        let ctx = self.ctx.clone();
        let mut handle = tokio::spawn(async move { kind.run(&ctx).await });

        match timeout(self.time_limit, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ScraperError::TaskPanicError {
                task: task.task.clone(),
                message: panic_message(e),
            }),
            Err(_) => {
                handle.abort();
                Err(ScraperError::TaskTimeoutError {
                    task: task.task.clone(),
                    seconds: self.time_limit.as_secs(),
                })
            }
        }
    }

    /// 啟動 concurrency 個取工作迴圈，直到 shutdown 變為 true
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            "👷 Worker started: queues [{}], concurrency {}",
            self.queues.join(", "),
            self.concurrency
        );

        let stale_before = self.ctx.now()
            - ChronoDuration::seconds(self.time_limit.as_secs() as i64)
            - self.retry_delay;
        self.broker.requeue_stale(stale_before).await?;
        self.ctx.monitor.log_stats("Worker startup");

        let mut handles = Vec::with_capacity(self.concurrency);
        for slot in 0..self.concurrency {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.claim_loop(slot, shutdown).await }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker loop panicked: {}", e);
            }
        }

        self.ctx.monitor.log_stats("Worker shutdown");
        tracing::info!("👋 Worker stopped");
        Ok(())
    }

    async fn claim_loop(&self, slot: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    tracing::error!("Worker slot {} error: {}", slot, e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(e) => e.to_string(),
    }
}
