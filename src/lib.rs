//! Асинхронная загрузка ассетов для движка Unicorn
//!
//! # Features
//! - Пул воркеров с блокирующей очередью задач и приоритетами
//! - Дедупликация запросов: один загрузчик на ключ, сколько бы ни было запросов
//! - Подписки с гарантией однократного уведомления
//! - Потокобезопасная шардированная хэш-таблица с атомарным `swap`
//! - Graceful shutdown: текущие загрузки доводятся до конца
//! - Метрики и мониторинг

pub mod errors;
pub mod handle;
pub mod handler;
pub mod map;
pub mod model;
pub mod pool;
pub mod queue;
pub mod storage;

pub use errors::{AssetError, AssetResult};
pub use handle::AssetHandle;
pub use handler::{AssetEntry, Handler, Subscriber};
pub use map::ConcurrentMap;
pub use model::{AssetKey, AssetState, JoinOrdering, PoolMetrics, Priority};
pub use pool::{CompletionSink, Config, WorkerPool};
pub use queue::{Loader, Task, TaskQueue};
pub use storage::Storage;
