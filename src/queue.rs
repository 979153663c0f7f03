use super::{
    errors::AssetError,
    model::{AssetKey, Priority},
};
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};


/// Функция загрузки, предоставляется вызывающей стороной
pub type Loader<T> = Box<dyn FnOnce(&AssetKey) -> anyhow::Result<T> + Send + 'static>;

/// Единица отложенной работы для одного ассета.
/// Принадлежит очереди до тех пор, пока её не заберет воркер.
pub struct Task<T> {
    key: AssetKey,
    loader: Loader<T>,
    priority: Priority,
    seq: u64,
}

impl<T> Task<T> {
    pub fn new<F>(key: AssetKey, priority: Priority, loader: F) -> Self
    where
        F: FnOnce(&AssetKey) -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            key,
            loader: Box::new(loader),
            priority,
            seq: 0,
        }
    }

    #[inline]
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Порядковый номер, присвоенный при `push`
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Разбирает задачу на ключ и загрузчик
    pub fn into_parts(self) -> (AssetKey, Loader<T>) {
        (self.key, self.loader)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish()
    }
}

// Max-heap: сначала приоритет, затем меньший seq
impl<T> PartialEq for Task<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Task<T> {}

impl<T> PartialOrd for Task<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Task<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}


struct QueueState<T> {
    tasks: BinaryHeap<Task<T>>,
    next_seq: u64,
    closed: bool,
}


/// Блокирующая очередь задач загрузки
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ставит задачу в очередь и будит одного ждущего воркера.
    /// После `close` задача отбрасывается.
    pub fn push(&self, mut task: Task<T>) -> Result<(), AssetError> {
        let mut state = self.lock();
        if state.closed {
            return Err(AssetError::QueueClosed);
        }
        task.seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.push(task);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Блокирует воркера до появления задачи.
    /// `None` означает, что очередь закрыта.
    pub fn snatch(&self) -> Option<Task<T>> {
        let mut state = self.lock();
        loop {
            if let Some(task) = state.tasks.pop() {
                return Some(task);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn try_snatch(&self) -> Option<Task<T>> {
        self.lock().tasks.pop()
    }

    /// Закрывает очередь и забирает задачи, которые никто не успел взять.
    /// Все ждущие в `snatch` сразу получают `None`.
    pub fn close(&self) -> Vec<Task<T>> {
        let mut state = self.lock();
        state.closed = true;
        let mut orphaned = Vec::with_capacity(state.tasks.len());
        while let Some(task) = state.tasks.pop() {
            orphaned.push(task);
        }
        drop(state);
        self.available.notify_all();
        orphaned
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
