use anyhow::Result;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use super::{managers::DeadlineSweepManager, worker::ScheduledTaskWorker};
use crate::shared::clock::Clock;
use crate::shared::config::SweepConfig;

/// Инициализирует воркер закрытия групп по дедлайну.
/// Ошибка в расписании или часовом поясе останавливает запуск.
pub fn initialize_scheduled_tasks(
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
    config: &SweepConfig,
) -> Result<ScheduledTaskWorker> {
    let schedule = config.schedule()?;
    let offset = config.offset()?;
    tracing::info!(
        "Group deadline sweep: cron '{}', timezone {}, run on start: {}",
        config.cron,
        offset,
        config.run_on_start
    );

    let manager = Arc::new(DeadlineSweepManager::new(db, clock));
    Ok(ScheduledTaskWorker::new(
        manager,
        schedule,
        offset,
        config.run_on_start,
    ))
}
