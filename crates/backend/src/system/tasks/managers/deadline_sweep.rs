use anyhow::Result;
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::domain::a001_group::sweep::close_expired_groups;
use crate::shared::clock::Clock;
use crate::system::tasks::manager::{TaskManager, TaskRunReport};

/// Менеджер закрытия групп с наступившим дедлайном
pub struct DeadlineSweepManager {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl DeadlineSweepManager {
    pub fn new(db: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

#[async_trait]
impl TaskManager for DeadlineSweepManager {
    fn task_type(&self) -> &'static str {
        "a001_group_deadline_sweep"
    }

    async fn run(&self) -> Result<TaskRunReport> {
        let outcome = close_expired_groups(&self.db, self.clock.now()).await?;
        Ok(TaskRunReport {
            matched: outcome.matched,
            modified: outcome.modified,
        })
    }
}
