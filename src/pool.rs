use super::{
    errors::{AssetError, AssetResult},
    model::{AssetKey, PoolMetrics},
    queue::{Loader, TaskQueue},
};
use crossbeam::utils::CachePadded;
use log::{debug, error, info, warn};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle, ThreadId},
};


/// Конфигурация пула загрузчиков
#[derive(Debug, Clone)]
pub struct Config {
    pub num_workers: usize,
    pub thread_name: String,
    /// Запускать воркеры сразу при создании `Storage`
    pub autostart: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            thread_name: "unicorn-asset".to_string(),
            autostart: true,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            num_workers: num_cpus::get(),
            ..Default::default()
        }
    }

    /// Для загрузчиков, которые в основном ждут диск или сеть
    pub fn io_bound() -> Self {
        Self {
            num_workers: num_cpus::get() * 2,
            ..Default::default()
        }
    }

    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }
}


/// Получатель результатов от воркеров
pub trait CompletionSink<T>: Send + Sync + 'static {
    /// Воркер забрал задачу и начинает загрузку
    fn on_loading(&self, key: &AssetKey);
    /// Вызывается ровно один раз на задачу
    fn on_complete(&self, key: &AssetKey, result: AssetResult<T>);
}


enum Lifecycle {
    Idle,
    Running(Vec<JoinHandle<()>>),
    /// Идет остановка, в списке потоки, которые сейчас джойнятся
    Stopping(Vec<ThreadId>),
    Stopped,
}

#[derive(Default)]
struct Counters {
    busy: CachePadded<AtomicUsize>,
    completed: CachePadded<AtomicUsize>,
    failed: CachePadded<AtomicUsize>,
}


/// Фиксированный набор потоков, разбирающих `TaskQueue`
pub struct WorkerPool<T: 'static> {
    queue: Arc<TaskQueue<T>>,
    sink: Arc<dyn CompletionSink<T>>,
    config: Config,
    lifecycle: Mutex<Lifecycle>,
    stopped: Condvar,
    counters: Arc<Counters>,
}

impl<T: Send + Sync + 'static> WorkerPool<T> {
    pub fn new(config: Config, queue: Arc<TaskQueue<T>>, sink: Arc<dyn CompletionSink<T>>) -> Self {
        let config = Config {
            num_workers: config.num_workers.max(1),
            ..config
        };
        Self {
            queue,
            sink,
            config,
            lifecycle: Mutex::new(Lifecycle::Idle),
            stopped: Condvar::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Запуск воркеров. Повторный вызов и вызов после `stop` ничего не делают.
    pub fn start(&self) -> Result<(), AssetError> {
        let mut lifecycle = self.lifecycle();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Ok(());
        }

        let mut handles = Vec::with_capacity(self.config.num_workers);
        for id in 0..self.config.num_workers {
            let queue = self.queue.clone();
            let sink = self.sink.clone();
            let counters = self.counters.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.config.thread_name, id))
                .spawn(move || worker_loop(id, &queue, &*sink, &counters));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!("failed to spawn asset worker {}: {}", id, err);
                    // Уже запущенные воркеры продолжают работать
                    *lifecycle = Lifecycle::Running(handles);
                    return Err(AssetError::WorkerSpawn(err.to_string()));
                }
            }
        }

        info!("started {} asset workers", handles.len());
        *lifecycle = Lifecycle::Running(handles);
        Ok(())
    }
}

impl<T: 'static> WorkerPool<T> {
    #[inline]
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Закрывает очередь и дожидается воркеров.
    /// Текущие загрузки доводятся до конца, задачи из очереди завершаются с `QueueClosed`.
    /// Конкурентные вызовы ждут, пока первый не дождется всех воркеров.
    pub fn stop(&self) {
        let current = thread::current().id();
        let handles = {
            let mut lifecycle = self.lifecycle();
            loop {
                let in_progress = match &*lifecycle {
                    Lifecycle::Stopped => return,
                    // Воркер не может ждать собственного join
                    Lifecycle::Stopping(workers) if workers.contains(&current) => return,
                    Lifecycle::Stopping(_) => true,
                    Lifecycle::Idle | Lifecycle::Running(_) => false,
                };
                if !in_progress {
                    break;
                }
                lifecycle = self
                    .stopped
                    .wait(lifecycle)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopping(Vec::new())) {
                Lifecycle::Running(handles) => {
                    *lifecycle = Lifecycle::Stopping(handles.iter().map(|h| h.thread().id()).collect());
                    handles
                }
                _ => Vec::new(),
            }
        };

        let orphaned = self.queue.close();
        if !orphaned.is_empty() {
            warn!("dropping {} queued asset tasks on shutdown", orphaned.len());
        }
        for task in orphaned {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.sink.on_complete(task.key(), Err(AssetError::QueueClosed));
        }

        // Остановка из колбэка на воркере: себя не джойним
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("asset worker terminated abnormally");
            }
        }
        *self.lifecycle() = Lifecycle::Stopped;
        self.stopped.notify_all();
        info!("asset workers stopped");
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running(_))
    }

    /// `total_requested` заполняет владелец пула
    pub fn metrics(&self) -> PoolMetrics {
        let workers = match &*self.lifecycle() {
            Lifecycle::Running(handles) => handles.len(),
            _ => 0,
        };
        PoolMetrics {
            workers,
            busy_workers: self.counters.busy.load(Ordering::Relaxed),
            queued_tasks: self.queue.len(),
            total_requested: 0,
            completed_tasks: self.counters.completed.load(Ordering::Relaxed),
            failed_tasks: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl<T: 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.stop();
    }
}


fn worker_loop<T: 'static>(id: usize, queue: &TaskQueue<T>, sink: &dyn CompletionSink<T>, counters: &Counters) {
    debug!("asset worker {} waiting for tasks", id);

    while let Some(task) = queue.snatch() {
        counters.busy.fetch_add(1, Ordering::Relaxed);
        let (key, loader) = task.into_parts();
        debug!("asset worker {} loading `{}`", id, key);

        sink.on_loading(&key);
        let result = run_loader(&key, loader);
        if result.is_ok() {
            counters.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        sink.on_complete(&key, result);

        counters.busy.fetch_sub(1, Ordering::Release);
    }

    debug!("asset worker {} exiting", id);
}

/// Ошибки и паники загрузчика не выходят за пределы воркера
fn run_loader<T>(key: &AssetKey, loader: Loader<T>) -> AssetResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(|| loader(key))) {
        Ok(Ok(value)) => Ok(Arc::new(value)),
        Ok(Err(err)) => {
            warn!("asset `{}` failed to load: {:#}", key, err);
            Err(AssetError::load_failed(key, &err))
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            error!("loader for asset `{}` panicked: {}", key, message);
            Err(AssetError::LoaderPanicked {
                key: key.clone(),
                message,
            })
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
