use super::{
    errors::{AssetError, AssetResult},
    handle::AssetHandle,
    handler::{Attach, Handler, Subscriber},
    model::{AssetKey, AssetSnapshot, AssetState, JoinOrdering, PoolMetrics, Priority},
    pool::{CompletionSink, Config, WorkerPool},
    queue::{Task, TaskQueue},
};
use crossbeam::utils::CachePadded;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, warn};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::{sync::oneshot, time::Duration};
use tokio_util::sync::CancellationToken;


/// Фасад асинхронной загрузки ассетов одного типа
///
/// Принимает запросы, дедуплицирует их по ключу, ставит задачи в очередь
/// и владеет пулом воркеров. Результаты рассылаются через [`Handler`].
pub struct Storage<T: 'static> {
    handler: Arc<Handler<T>>,
    queue: Arc<TaskQueue<T>>,
    pool: WorkerPool<T>,
    total_requested: CachePadded<AtomicUsize>,
}

impl<T: Send + Sync + 'static> Storage<T> {
    pub fn new(num_workers: usize) -> Self {
        Self::with_config(Config::with_workers(num_workers))
    }

    pub fn with_config(config: Config) -> Self {
        let handler = Arc::new(Handler::new());
        let queue = Arc::new(TaskQueue::new());
        let sink: Arc<dyn CompletionSink<T>> = handler.clone();
        let autostart = config.autostart;

        let storage = Self {
            pool: WorkerPool::new(config, queue.clone(), sink),
            handler,
            queue,
            total_requested: CachePadded::new(AtomicUsize::new(0)),
        };

        if autostart {
            if let Err(err) = storage.start_workers() {
                error!("asset storage started without a full worker set: {}", err);
            }
        }
        storage
    }

    pub fn request<K, F>(&self, key: K, loader: F) -> AssetHandle<T>
    where
        K: Into<AssetKey>,
        F: FnOnce(&AssetKey) -> anyhow::Result<T> + Send + 'static,
    {
        self.request_with_priority(key, Priority::Normal, loader)
    }

    /// Запрос ассета. Не блокирует вызывающего.
    ///
    /// Первый запрос ключа создает запись `Pending` и задачу, повторные
    /// только подписываются. Для завершенного ассета handle готов сразу.
    /// `priority` учитывается только первым запросом.
    pub fn request_with_priority<K, F>(&self, key: K, priority: Priority, loader: F) -> AssetHandle<T>
    where
        K: Into<AssetKey>,
        F: FnOnce(&AssetKey) -> anyhow::Result<T> + Send + 'static,
    {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        let subscriber: Subscriber<T> = Box::new(move |result| {
            let _ = tx.send(result);
        });

        match self.handler.attach(key.clone(), subscriber) {
            Attach::Created => {
                self.total_requested.fetch_add(1, Ordering::Relaxed);
                debug!("queueing asset `{}` with {:?} priority", key, priority);
                if let Err(err) = self.queue.push(Task::new(key.clone(), priority, loader)) {
                    warn!("asset `{}` requested after shutdown", key);
                    self.handler.notify(&key, Err(err));
                }
            }
            Attach::Attached => debug!("asset `{}` already in flight, subscriber attached", key),
            Attach::Settled => debug!("asset `{}` served from cache", key),
        }

        AssetHandle::new(key, rx)
    }

    /// Пакетный запрос с ожиданием всех результатов
    pub async fn request_all<K, F, I>(&self, requests: I, ordering: JoinOrdering) -> Vec<(AssetKey, AssetResult<T>)>
    where
        K: Into<AssetKey>,
        F: FnOnce(&AssetKey) -> anyhow::Result<T> + Send + 'static,
        I: IntoIterator<Item = (K, F)>,
    {
        let mut pending: FuturesUnordered<_> = requests
            .into_iter()
            .enumerate()
            .map(|(idx, (key, loader))| {
                let handle = self.request(key, loader);
                async move {
                    let key = handle.key().clone();
                    (idx, key, handle.await)
                }
            })
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        while let Some(item) = pending.next().await {
            results.push(item);
        }

        if let JoinOrdering::Ordered = ordering {
            results.sort_unstable_by_key(|(idx, _, _)| *idx);
        }
        results
            .into_iter()
            .map(|(_, key, result)| (key, result))
            .collect()
    }

    /// Запускает воркеры, если они еще не запускались
    pub fn start_workers(&self) -> Result<(), AssetError> {
        self.pool.start()
    }

    /// Дожидается текущих загрузок и останавливает воркеры.
    /// Незапущенные задачи завершаются с `QueueClosed`. Повторный вызов ничего не делает.
    pub fn stop_workers(&self) {
        self.pool.stop();
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Мониторинг метрик с callback. Должен вызываться внутри tokio рантайма.
    /// Пока токен не отменен, задача держит ссылку на storage.
    pub fn start_monitoring<F>(self: &Arc<Self>, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(PoolMetrics) + Send + 'static,
    {
        let storage = Arc::clone(self);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        callback(storage.metrics());
                    }
                    _ = token_clone.cancelled() => {
                        drop(storage);
                        break;
                    }
                }
            }
        });

        token
    }
}

impl<T: 'static> Storage<T> {
    pub fn subscribe<F>(&self, key: &AssetKey, callback: F) -> Result<(), AssetError>
    where
        F: FnOnce(AssetResult<T>) + Send + 'static,
    {
        self.handler.subscribe(key, callback)
    }

    /// `None`, если ассет не запрашивался
    pub fn state(&self, key: &AssetKey) -> Option<AssetState> {
        self.handler.state(key)
    }

    /// Результат уже завершенной загрузки
    pub fn get(&self, key: &AssetKey) -> Option<AssetResult<T>> {
        self.handler.result(key)
    }

    pub fn len(&self) -> usize {
        self.handler.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handler.is_empty()
    }

    pub fn snapshot(&self) -> Vec<AssetSnapshot> {
        self.handler.snapshot()
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            total_requested: self.total_requested.load(Ordering::Relaxed),
            ..self.pool.metrics()
        }
    }
}
