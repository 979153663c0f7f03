use ahash::RandomState;
use crossbeam::sync::ShardedLock;
use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::Hash,
    ptr,
    sync::{Mutex, MutexGuard, PoisonError},
};

const DEFAULT_SHARDS: usize = 16;

type Shard<K, V> = Mutex<HashMap<K, V>>;

struct Table<K, V> {
    shards: Box<[Shard<K, V>]>,
    hasher: RandomState,
}

impl<K: Hash + Eq, V> Table<K, V> {
    fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard<Q>(&self, key: &Q) -> MutexGuard<'_, HashMap<K, V>>
    where
        Q: Hash + ?Sized,
    {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        lock(&self.shards[idx])
    }
}

#[inline]
fn lock<K, V>(shard: &Shard<K, V>) -> MutexGuard<'_, HashMap<K, V>> {
    // Каждая критическая секция оставляет HashMap целостной, поэтому отравление игнорируем
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}


/// Потокобезопасная хэш-таблица с шардированием
///
/// Операции над одним ключом сериализуются мьютексом его шарда.
/// Весь набор шардов лежит за `ShardedLock`: обычные операции берут его на чтение,
/// `swap` - на запись, поэтому частично выполненный обмен никто не увидит.
pub struct ConcurrentMap<K, V> {
    table: ShardedLock<Table<K, V>>,
}

impl<K: Hash + Eq, V> Default for ConcurrentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> ConcurrentMap<K, V> {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        Self {
            table: ShardedLock::new(Table::new(shards)),
        }
    }

    #[inline]
    fn with_table<R>(&self, f: impl FnOnce(&Table<K, V>) -> R) -> R {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        f(&table)
    }

    /// Вставка с заменой, возвращает предыдущее значение
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.with_table(|t| t.shard(&key).insert(key, value))
    }

    pub fn find<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.with_table(|t| t.shard(key).get(key).cloned())
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_table(|t| t.shard(key).contains_key(key))
    }

    /// Атомарный read-modify-write существующего значения.
    /// `None`, если ключа нет.
    pub fn update<Q, R, F>(&self, key: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&mut V) -> R,
    {
        self.with_table(|t| t.shard(key).get_mut(key).map(f))
    }

    /// Проверка и вставка под одной блокировкой.
    /// `f` получает значение и флаг того, что оно только что создано через `make`.
    pub fn upsert<R, M, F>(&self, key: K, make: M, f: F) -> R
    where
        M: FnOnce() -> V,
        F: FnOnce(&mut V, bool) -> R,
    {
        self.with_table(|t| {
            let mut shard = t.shard(&key);
            let created = !shard.contains_key(&key);
            let value = shard.entry(key).or_insert_with(make);
            f(value, created)
        })
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_table(|t| t.shard(key).remove(key))
    }

    pub fn size(&self) -> usize {
        self.with_table(|t| t.shards.iter().map(|s| lock(s).len()).sum())
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn clear(&self) {
        self.with_table(|t| t.shards.iter().for_each(|s| lock(s).clear()))
    }

    /// Обмен содержимым целиком
    pub fn swap(&self, other: &Self) {
        if ptr::eq(self, other) {
            return;
        }
        // Порядок захвата по адресу, иначе встречные swap зависнут
        let (first, second) = if (self as *const Self) < (other as *const Self) {
            (self, other)
        } else {
            (other, self)
        };
        let mut a = first.table.write().unwrap_or_else(PoisonError::into_inner);
        let mut b = second.table.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::swap(&mut *a, &mut *b);
    }

    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.snapshot_with(|k, v| (k.clone(), v.clone()))
    }

    /// Проекция всех пар. Шарды обходятся по очереди, но без конкурирующего `swap`.
    pub fn snapshot_with<R>(&self, mut f: impl FnMut(&K, &V) -> R) -> Vec<R> {
        self.with_table(|t| {
            let mut out = Vec::new();
            for shard in t.shards.iter() {
                out.extend(lock(shard).iter().map(|(k, v)| f(k, v)));
            }
            out
        })
    }
}
