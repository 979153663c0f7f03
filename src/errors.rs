use super::model::AssetKey;
use std::sync::Arc;
use thiserror::Error;

/// Результат загрузки ассета, общий для всех подписчиков
pub type AssetResult<T> = Result<Arc<T>, AssetError>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum AssetError {
    #[error("failed to load asset `{key}`: {reason}")]
    LoadFailed { key: AssetKey, reason: String },
    #[error("loader for asset `{key}` panicked: {message}")]
    LoaderPanicked { key: AssetKey, message: String },
    #[error("task queue is closed")]
    QueueClosed,
    #[error("asset `{0}` was never requested")]
    NotRequested(AssetKey),
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
    #[error("result channel closed")]
    ChannelClosed,
    #[error("timed out waiting for asset")]
    Timeout,
}

impl AssetError {
    pub fn load_failed(key: &AssetKey, err: &anyhow::Error) -> Self {
        Self::LoadFailed {
            key: key.clone(),
            reason: format!("{:#}", err),
        }
    }
}
