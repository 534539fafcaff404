use chrono::{DateTime, FixedOffset, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::manager::{TaskManager, TaskRunReport};

/// Результат попытки запуска
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(TaskRunReport),
    Failed,
    /// Предыдущий прогон ещё выполняется
    Skipped,
}

/// Фоновый воркер одной задачи по cron-расписанию.
pub struct ScheduledTaskWorker {
    manager: Arc<dyn TaskManager>,
    schedule: cron::Schedule,
    offset: FixedOffset,
    run_on_start: bool,
    running: AtomicBool,
}

/// Снимает флаг выполнения при любом выходе из прогона
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScheduledTaskWorker {
    pub fn new(
        manager: Arc<dyn TaskManager>,
        schedule: cron::Schedule,
        offset: FixedOffset,
        run_on_start: bool,
    ) -> Self {
        Self {
            manager,
            schedule,
            offset,
            run_on_start,
            running: AtomicBool::new(false),
        }
    }

    /// Ближайший запуск после `now` в часовом поясе расписания
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&self.offset))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Один прогон. Параллельный второй прогон пропускается.
    pub async fn run_once(&self) -> RunOutcome {
        let task_type = self.manager.task_type();
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Task '{}' is still running, skipping this tick", task_type);
            return RunOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        match self.manager.run().await {
            Ok(report) => {
                info!(
                    "Task '{}' completed: matched {}, modified {}",
                    task_type, report.matched, report.modified
                );
                RunOutcome::Completed(report)
            }
            Err(e) => {
                error!("Task '{}' failed: {:?}", task_type, e);
                RunOutcome::Failed
            }
        }
    }

    /// Запускает цикл выполнения задачи.
    pub async fn run_loop(self: Arc<Self>) {
        let task_type = self.manager.task_type();
        info!("Scheduled task worker '{}' started", task_type);

        if self.run_on_start {
            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                worker.run_once().await;
            });
        }

        loop {
            let now = Utc::now();
            let Some(next) = self.next_run_after(now) else {
                warn!("Schedule of task '{}' has no upcoming runs, worker stopped", task_type);
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next run of '{}' at {}", task_type, next.with_timezone(&self.offset));
            tokio::time::sleep(wait).await;

            // отдельная задача: долгий прогон не сдвигает расписание
            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                worker.run_once().await;
            });
        }
    }
}
