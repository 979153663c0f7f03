use super::errors::AssetError;
use std::{
    borrow::Borrow,
    fmt,
    sync::Arc,
};


/// Неизменяемый идентификатор ассета (путь или хэш)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey(Arc<str>);

impl AssetKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for AssetKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl Borrow<str> for AssetKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}


/// Состояние ассета: Pending -> Loading -> {Ready | Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetState {
    Pending,
    Loading,
    Ready,
    Failed,
}

impl AssetState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, AssetState::Ready | AssetState::Failed)
    }

    /// Переходы только вперед, из терминального состояния выхода нет
    pub fn can_advance(self, next: AssetState) -> bool {
        use AssetState::*;
        matches!(
            (self, next),
            (Pending, Loading) | (Pending, Failed) | (Loading, Ready) | (Loading, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetState::Pending => "pending",
            AssetState::Loading => "loading",
            AssetState::Ready => "ready",
            AssetState::Failed => "failed",
        }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSnapshot {
    pub key: AssetKey,
    pub state: AssetState,
    pub error: Option<AssetError>,
    pub subscribers: usize,
}


#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
    pub total_requested: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl PoolMetrics {
    pub fn idle_workers(&self) -> usize {
        self.workers.saturating_sub(self.busy_workers)
    }

    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        self.busy_workers as f64 / self.workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}


/// Порядок результатов пакетного запроса
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOrdering {
    /// В порядке запросов
    Ordered,
    /// В порядке завершения
    UnOrdered,
}
