use crate::adapters::Database;
use crate::app::AppContext;
use crate::config::toml_config::ScheduleEntryConfig;
use crate::domain::market_hours::{nepal_offset, to_nepal};
use crate::domain::ports::Clock;
use crate::tasks::broker::TaskBroker;
use crate::tasks::TaskKind;
use crate::utils::error::{Result, ScraperError};
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// 排程規則，crontab 以尼泊爾時間計算
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    Interval {
        every_seconds: u64,
    },
    Crontab {
        hour: u32,
        minute: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days: Option<Vec<Weekday>>,
    },
}

impl Schedule {
    pub fn from_config(entry: &ScheduleEntryConfig) -> Result<Self> {
        match (&entry.every_seconds, &entry.crontab) {
            (Some(every_seconds), None) => Ok(Self::Interval {
                every_seconds: *every_seconds,
            }),
            (None, Some(cron)) => {
                let days = match &cron.days {
                    Some(days) => Some(
                        days.iter()
                            .map(|day| {
                                day.parse::<Weekday>().map_err(|_| {
                                    ScraperError::InvalidConfigValueError {
                                        field: format!("beat.schedule.{}.crontab.days", entry.name),
                                        value: day.clone(),
                                        reason: "Expected sun, mon, tue, wed, thu, fri or sat"
                                            .to_string(),
                                    }
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    None => None,
                };
                Ok(Self::Crontab {
                    hour: cron.hour,
                    minute: cron.minute,
                    days,
                })
            }
            _ => Err(ScraperError::ConfigValidationError {
                field: format!("beat.schedule.{}", entry.name),
                message: "Exactly one of every_seconds or crontab must be set".to_string(),
            }),
        }
    }

    /// last_run 之後的下一次執行時間
    pub fn next_after(&self, last_run: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every_seconds } => {
                Some(last_run + Duration::seconds(i64::try_from(*every_seconds).ok()?))
            }
            Self::Crontab { hour, minute, days } => {
                let at = NaiveTime::from_hms_opt(*hour, *minute, 0)?;
                let last_local = to_nepal(last_run);
                (0..=7)
                    .map(|offset| last_local.date() + Duration::days(offset))
                    .filter(|date| {
                        days.as_ref()
                            .map_or(true, |days| days.contains(&date.weekday()))
                    })
                    .map(|date| date.and_time(at))
                    .find(|candidate| *candidate > last_local)
                    .and_then(from_nepal)
            }
        }
    }

    pub fn is_due(&self, last_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_after(last_run).is_some_and(|next| next <= now)
    }
}

fn from_nepal(local: NaiveDateTime) -> Option<DateTime<Utc>> {
    nepal_offset()
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// 設定檔中的一筆排程，已解析任務名稱與佇列
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicEntry {
    pub name: String,
    pub task: TaskKind,
    pub queue: String,
    pub schedule: Schedule,
    pub enabled: bool,
}

impl PeriodicEntry {
    pub fn from_config(entry: &ScheduleEntryConfig) -> Result<Self> {
        let task: TaskKind = entry.task.parse()?;
        Ok(Self {
            name: entry.name.clone(),
            task,
            queue: entry
                .queue
                .clone()
                .unwrap_or_else(|| task.default_queue().to_string()),
            schedule: Schedule::from_config(entry)?,
            enabled: entry.enabled,
        })
    }
}

/// periodic_tasks 表中的一筆
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PeriodicTask {
    pub name: String,
    pub task: String,
    pub queue: String,
    pub schedule: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_run_count: i64,
}

/// 定期把到期的排程送進工作佇列
pub struct Beat {
    db: Database,
    broker: TaskBroker,
    entries: Vec<PeriodicEntry>,
    tick: std::time::Duration,
}

impl Beat {
    pub fn new(db: Database, entries: Vec<PeriodicEntry>, tick: std::time::Duration) -> Self {
        Self {
            broker: TaskBroker::new(db.clone()),
            db,
            entries,
            tick,
        }
    }

    pub fn from_context(ctx: &AppContext) -> Result<Self> {
        let entries = ctx
            .config
            .beat
            .schedule
            .iter()
            .map(PeriodicEntry::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(
            ctx.db.clone(),
            entries,
            std::time::Duration::from_secs(ctx.config.beat.tick_seconds),
        ))
    }

    /// 把設定寫入 periodic_tasks；新項目的 last_run_at 設為 now，
    /// 設定中已不存在的項目停用
    pub async fn sync(&self, now: DateTime<Utc>) -> Result<()> {
        for entry in &self.entries {
            let schedule = serde_json::to_string(&entry.schedule)?;
            sqlx::query(
                "INSERT INTO periodic_tasks (name, task, queue, schedule, enabled, last_run_at, \
                 total_run_count) VALUES (?, ?, ?, ?, ?, ?, 0) ON CONFLICT(name) DO UPDATE SET \
                 task = excluded.task, queue = excluded.queue, schedule = excluded.schedule, \
                 enabled = excluded.enabled",
            )
            .bind(&entry.name)
            .bind(entry.task.name())
            .bind(&entry.queue)
            .bind(schedule)
            .bind(entry.enabled)
            .bind(now)
            .execute(self.db.pool())
            .await?;
        }

        for task in self.periodic_tasks().await? {
            if task.enabled && !self.entries.iter().any(|e| e.name == task.name) {
                tracing::info!("Disabling removed schedule entry {}", task.name);
                sqlx::query("UPDATE periodic_tasks SET enabled = 0 WHERE name = ?")
                    .bind(&task.name)
                    .execute(self.db.pool())
                    .await?;
            }
        }

        tracing::info!("📅 Synced {} schedule entries", self.entries.len());
        Ok(())
    }

    pub async fn periodic_tasks(&self) -> Result<Vec<PeriodicTask>> {
        let tasks = sqlx::query_as::<_, PeriodicTask>(
            "SELECT name, task, queue, schedule, enabled, last_run_at, total_run_count \
             FROM periodic_tasks ORDER BY name",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(tasks)
    }

    /// 送出所有到期的排程，回傳送出的項目名稱
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut sent = Vec::new();

        for row in self.periodic_tasks().await? {
            if !row.enabled {
                continue;
            }

            let schedule: Schedule = match serde_json::from_str(&row.schedule) {
                Ok(schedule) => schedule,
                Err(e) => {
                    tracing::warn!("⚠️ Invalid schedule for {}: {}", row.name, e);
                    continue;
                }
            };
            let last_run = row.last_run_at.unwrap_or(now);
            if row.last_run_at.is_some() && !schedule.is_due(last_run, now) {
                continue;
            }

            let max_retries = row
                .task
                .parse::<TaskKind>()
                .map(|kind| kind.max_retries())
                .unwrap_or(0);
            let id = self
                .broker
                .enqueue(&row.task, &row.queue, max_retries, now, now)
                .await?;

            sqlx::query(
                "UPDATE periodic_tasks SET last_run_at = ?, total_run_count = total_run_count + 1 \
                 WHERE name = ?",
            )
            .bind(now)
            .bind(&row.name)
            .execute(self.db.pool())
            .await?;

            tracing::info!(
                "⏰ Scheduler: sending {} ({}) to {} [id {}]",
                row.name,
                row.task,
                row.queue,
                id
            );
            sent.push(row.name);
        }

        Ok(sent)
    }

    pub async fn run(
        self,
        clock: &dyn Clock,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        self.sync(clock.now()).await?;
        tracing::info!("🫀 Beat started, ticking every {:?}", self.tick);

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.tick(clock.now()).await {
                tracing::error!("Beat tick failed: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("👋 Beat stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::toml_config::default_schedule;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn nepal(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        nepal_offset()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn entries() -> Vec<PeriodicEntry> {
        default_schedule()
            .iter()
            .map(|e| PeriodicEntry::from_config(e).unwrap())
            .collect()
    }

    #[test]
    fn test_crontab_next_after_skips_non_trading_days() {
        let closing = Schedule::Crontab {
            hour: 15,
            minute: 30,
            days: Some(vec![Weekday::Sun, Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu]),
        };

        // Thursday 2024-06-06 16:00 -> next Sunday 2024-06-09 15:30
        let next = closing.next_after(nepal(2024, 6, 6, 16, 0)).unwrap();
        assert_eq!(next, nepal(2024, 6, 9, 15, 30));

        // same day, before the time
        let next = closing.next_after(nepal(2024, 6, 2, 9, 0)).unwrap();
        assert_eq!(next, nepal(2024, 6, 2, 15, 30));
        assert_eq!(next, utc(2024, 6, 2, 9, 45));
    }

    #[test]
    fn test_interval_due() {
        let every = Schedule::Interval { every_seconds: 1800 };
        let last = utc(2024, 6, 2, 6, 0);
        assert!(!every.is_due(last, last + Duration::minutes(29)));
        assert!(every.is_due(last, last + Duration::minutes(30)));
    }

    #[test]
    fn test_entry_defaults_queue_from_task() {
        let entry = PeriodicEntry::from_config(&ScheduleEntryConfig {
            name: "health".to_string(),
            task: "health_check".to_string(),
            queue: None,
            every_seconds: Some(60),
            crontab: None,
            enabled: true,
        })
        .unwrap();
        assert_eq!(entry.queue, "maintenance");

        let unknown = PeriodicEntry::from_config(&ScheduleEntryConfig {
            name: "cleanup".to_string(),
            task: "celery.backend_cleanup".to_string(),
            queue: None,
            every_seconds: Some(60),
            crontab: None,
            enabled: true,
        });
        assert!(unknown.is_err());
    }

    #[tokio::test]
    async fn test_sync_then_tick_enqueues_due_entries() {
        let db = Database::in_memory().await.unwrap();
        let beat = Beat::new(db.clone(), entries(), std::time::Duration::from_secs(5));

        // Sunday 2024-06-02 10:00 Nepal
        let start = nepal(2024, 6, 2, 10, 0);
        beat.sync(start).await.unwrap();
        assert_eq!(beat.periodic_tasks().await.unwrap().len(), 8);

        // 剛同步完沒有到期的項目
        assert!(beat.tick(start).await.unwrap().is_empty());

        // 10:55 market opening, the 30 minute interval is also due
        let sent = beat.tick(nepal(2024, 6, 2, 10, 55)).await.unwrap();
        assert_eq!(
            sent,
            vec![
                "market-opening-10-55-am".to_string(),
                "scrape-every-30-minutes".to_string(),
            ]
        );

        // one hour after sync
        let sent = beat.tick(nepal(2024, 6, 2, 11, 0)).await.unwrap();
        assert_eq!(
            sent,
            vec![
                "health-check-hourly".to_string(),
                "quick-test-hourly".to_string(),
            ]
        );

        let tasks = beat.periodic_tasks().await.unwrap();
        let scrape = tasks
            .iter()
            .find(|t| t.name == "scrape-every-30-minutes")
            .unwrap();
        assert_eq!(scrape.total_run_count, 1);
        assert_eq!(scrape.last_run_at, Some(nepal(2024, 6, 2, 10, 55)));

        let pending = TaskBroker::new(db)
            .count_with_status(crate::tasks::TaskStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending, 4);
    }

    #[tokio::test]
    async fn test_sync_disables_removed_entries_and_keeps_history() {
        let db = Database::in_memory().await.unwrap();
        let start = nepal(2024, 6, 2, 10, 0);
        Beat::new(db.clone(), entries(), std::time::Duration::from_secs(5))
            .sync(start)
            .await
            .unwrap();

        let only_scrape: Vec<_> = entries()
            .into_iter()
            .filter(|e| e.name == "scrape-every-30-minutes")
            .collect();
        let beat = Beat::new(db, only_scrape, std::time::Duration::from_secs(5));
        beat.sync(start + Duration::hours(1)).await.unwrap();

        let tasks = beat.periodic_tasks().await.unwrap();
        assert_eq!(tasks.iter().filter(|t| t.enabled).count(), 1);
        let scrape = tasks
            .iter()
            .find(|t| t.name == "scrape-every-30-minutes")
            .unwrap();
        assert_eq!(scrape.last_run_at, Some(start));
    }
}
