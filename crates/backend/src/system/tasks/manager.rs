use anyhow::Result;
use async_trait::async_trait;

/// Итог одного прогона задачи
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskRunReport {
    /// Сколько записей подошло под условие
    pub matched: u64,
    /// Сколько записей изменено
    pub modified: u64,
}

/// Трейт для менеджеров фоновых задач.
/// Каждый тип задачи имеет свою реализацию.
#[async_trait]
pub trait TaskManager: Send + Sync {
    /// Возвращает тип задачи, который обрабатывает этот менеджер.
    fn task_type(&self) -> &'static str;

    /// Один прогон задачи. Выбор записей должен зависеть только от их состояния,
    /// чтобы повторный прогон после сбоя был безопасен.
    async fn run(&self) -> Result<TaskRunReport>;
}
