use super::{
    errors::{AssetError, AssetResult},
    map::ConcurrentMap,
    model::{AssetKey, AssetSnapshot, AssetState},
    pool::{panic_message, CompletionSink},
};
use log::{debug, error, warn};
use std::panic::{self, AssertUnwindSafe};


/// Колбэк подписчика. Вызывается ровно один раз, с потока воркера или вызывающего.
pub type Subscriber<T> = Box<dyn FnOnce(AssetResult<T>) + Send + 'static>;


/// Запись о состоянии ассета вместе со списком ожидающих подписчиков.
/// Состояние и подписчики меняются под одной блокировкой шарда.
pub struct AssetEntry<T> {
    state: AssetState,
    outcome: Option<AssetResult<T>>,
    subscribers: Vec<Subscriber<T>>,
}

impl<T> AssetEntry<T> {
    pub fn pending() -> Self {
        Self {
            state: AssetState::Pending,
            outcome: None,
            subscribers: Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> AssetState {
        self.state
    }

    pub fn outcome(&self) -> Option<&AssetResult<T>> {
        self.outcome.as_ref()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn advance(&mut self, next: AssetState) -> bool {
        if !self.state.can_advance(next) {
            return false;
        }
        self.state = next;
        true
    }

    /// Переводит запись в терминальное состояние и отдает подписчиков на уведомление
    fn settle(&mut self, result: &AssetResult<T>) -> Option<Vec<Subscriber<T>>> {
        let next = if result.is_ok() {
            AssetState::Ready
        } else {
            AssetState::Failed
        };
        if !self.advance(next) {
            return None;
        }
        self.outcome = Some(result.clone());
        Some(std::mem::take(&mut self.subscribers))
    }
}


pub(crate) enum Attach {
    /// Запись создана, нужно поставить задачу
    Created,
    /// Загрузка уже идет, подписчик добавлен
    Attached,
    /// Ассет уже в терминальном состоянии, подписчик вызван сразу
    Settled,
}


/// Брокер подписок: хранит записи ассетов и рассылает результаты
pub struct Handler<T> {
    entries: ConcurrentMap<AssetKey, AssetEntry<T>>,
}

impl<T> Default for Handler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Handler<T> {
    pub fn new() -> Self {
        Self {
            entries: ConcurrentMap::new(),
        }
    }

    /// Подписка на завершение загрузки.
    /// Если ассет уже загружен или упал, колбэк вызывается сразу в этом потоке.
    pub fn subscribe<F>(&self, key: &AssetKey, callback: F) -> Result<(), AssetError>
    where
        F: FnOnce(AssetResult<T>) + Send + 'static,
    {
        let callback: Subscriber<T> = Box::new(callback);
        let settled = self
            .entries
            .update(key, move |entry| match &entry.outcome {
                Some(result) => Some((callback, result.clone())),
                None => {
                    entry.subscribers.push(callback);
                    None
                }
            })
            .ok_or_else(|| AssetError::NotRequested(key.clone()))?;

        if let Some((callback, result)) = settled {
            fire(key, vec![callback], result);
        }
        Ok(())
    }

    /// Доставляет результат всем подписчикам, зарегистрированным на момент завершения.
    /// Повторное уведомление для терминальной записи игнорируется.
    pub(crate) fn notify(&self, key: &AssetKey, result: AssetResult<T>) {
        match self.entries.update(key, |entry| entry.settle(&result)) {
            Some(Some(subscribers)) => {
                debug!(
                    "asset `{}` is {}, notifying {} subscribers",
                    key,
                    if result.is_ok() { "ready" } else { "failed" },
                    subscribers.len()
                );
                fire(key, subscribers, result);
            }
            Some(None) => debug!("asset `{}` already settled, notification ignored", key),
            None => warn!("notification for unknown asset `{}`", key),
        }
    }

    /// Проверка и создание записи под одной блокировкой:
    /// повторный запрос того же ключа только добавляет подписчика.
    pub(crate) fn attach(&self, key: AssetKey, callback: Subscriber<T>) -> Attach {
        let mut settled = None;
        let attach = self.entries.upsert(key.clone(), AssetEntry::pending, |entry, created| {
            if let Some(result) = &entry.outcome {
                settled = Some((callback, result.clone()));
                return Attach::Settled;
            }
            entry.subscribers.push(callback);
            if created {
                Attach::Created
            } else {
                Attach::Attached
            }
        });

        if let Some((callback, result)) = settled {
            fire(&key, vec![callback], result);
        }
        attach
    }

    pub(crate) fn mark_loading(&self, key: &AssetKey) {
        let advanced = self.entries.update(key, |entry| entry.advance(AssetState::Loading));
        if advanced != Some(true) {
            warn!("asset `{}` could not enter loading state", key);
        }
    }

    pub fn state(&self, key: &AssetKey) -> Option<AssetState> {
        self.entries.update(key, |entry| entry.state)
    }

    /// Результат для терминального ассета
    pub fn result(&self, key: &AssetKey) -> Option<AssetResult<T>> {
        self.entries.update(key, |entry| entry.outcome.clone()).flatten()
    }

    pub fn len(&self) -> usize {
        self.entries.size()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<AssetSnapshot> {
        self.entries.snapshot_with(|key, entry| AssetSnapshot {
            key: key.clone(),
            state: entry.state(),
            error: match entry.outcome() {
                Some(Err(err)) => Some(err.clone()),
                _ => None,
            },
            subscribers: entry.subscriber_count(),
        })
    }
}

impl<T: Send + Sync + 'static> CompletionSink<T> for Handler<T> {
    fn on_loading(&self, key: &AssetKey) {
        self.mark_loading(key);
    }

    fn on_complete(&self, key: &AssetKey, result: AssetResult<T>) {
        self.notify(key, result);
    }
}


/// Колбэки вызываются вне блокировок, паника подписчика не роняет воркер
fn fire<T>(key: &AssetKey, subscribers: Vec<Subscriber<T>>, result: AssetResult<T>) {
    for callback in subscribers {
        let result = result.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(result))) {
            error!(
                "subscriber for asset `{}` panicked: {}",
                key,
                panic_message(&*payload)
            );
        }
    }
}
