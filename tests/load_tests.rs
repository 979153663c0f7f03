#[cfg(test)]
mod tests {
    use unicorn_assets::{
        map::ConcurrentMap,
        model::{AssetKey, JoinOrdering, Priority},
        pool::Config,
        queue::{Task, TaskQueue},
        storage::Storage,
    };
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Barrier,
        },
        thread,
        time::{Duration, Instant},
    };

    fn measure<T>(name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        println!("✓ {}: {:?}", name, start.elapsed());
        result
    }

    #[test]
    fn load_test_1_concurrent_requests_same_key() {
        println!("\n=== LOAD TEST 1: 32 потока запрашивают один ключ ===");
        let storage = Arc::new(Storage::new(4));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(32));

        let payloads = measure("32 concurrent requests", || {
            let threads: Vec<_> = (0..32)
                .map(|_| {
                    let storage = storage.clone();
                    let calls = calls.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        storage
                            .request("shared/atlas.png", move |_| {
                                calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(20));
                                Ok(vec![0u8; 1024])
                            })
                            .wait()
                            .unwrap()
                    })
                })
                .collect();
            threads
                .into_iter()
                .map(|t| t.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1, "загрузчик должен выполниться один раз");
        assert!(payloads.iter().all(|p| Arc::ptr_eq(p, &payloads[0])));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn load_test_2_many_tasks_few_workers() {
        println!("\n=== LOAD TEST 2: 5k задач на 8 воркерах ===");
        let storage = Storage::with_config(Config::with_workers(8));
        let executions: Arc<ConcurrentMap<AssetKey, usize>> = Arc::new(ConcurrentMap::new());

        let handles: Vec<_> = measure("5k requests", || {
            (0..5_000)
                .map(|i| {
                    let executions = executions.clone();
                    storage.request(format!("chunk_{}", i), move |key| {
                        executions.upsert(key.clone(), || 0, |n, _| *n += 1);
                        Ok(i)
                    })
                })
                .collect()
        });

        let results = measure("5k results", || {
            handles
                .into_iter()
                .map(|h| *h.wait().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(results, (0..5_000).collect::<Vec<_>>());
        assert_eq!(executions.size(), 5_000);
        assert!(executions.snapshot().iter().all(|(_, n)| *n == 1), "задача выполнена дважды");

        storage.stop_workers();
        let metrics = storage.metrics();
        println!("  Успешно: {}/{}", metrics.completed_tasks, metrics.total_requested);
        assert_eq!(metrics.completed_tasks, 5_000);
        assert_eq!(metrics.total_requested, 5_000);
        assert_eq!(metrics.busy_workers, 0);
    }

    #[test]
    fn load_test_3_snatch_never_duplicates() {
        println!("\n=== LOAD TEST 3: 8 воркеров x 20k задач ===");
        const TASKS: usize = 20_000;
        let queue: Arc<TaskQueue<()>> = Arc::new(TaskQueue::new());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(task) = queue.snatch() {
                        seen.push(task.seq());
                    }
                    seen
                })
            })
            .collect();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..TASKS / 4 {
                        let priority = if i % 3 == 0 { Priority::High } else { Priority::Normal };
                        queue
                            .push(Task::new(AssetKey::from(format!("{}_{}", p, i)), priority, |_| Ok(())))
                            .unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        // Ждем, пока воркеры разберут очередь, затем закрываем
        let deadline = Instant::now() + Duration::from_secs(10);
        while !queue.is_empty() {
            assert!(Instant::now() < deadline, "очередь не разобрана");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(queue.close().is_empty());

        let mut all = HashSet::new();
        let mut total = 0;
        for w in workers {
            let seen = w.join().unwrap();
            total += seen.len();
            all.extend(seen);
        }
        println!("  Получено задач: {}", total);
        assert_eq!(total, TASKS);
        assert_eq!(all.len(), TASKS, "одна задача досталась двум воркерам");
    }

    #[test]
    fn load_test_4_mixed_failures() {
        println!("\n=== LOAD TEST 4: каждая десятая загрузка падает ===");
        let storage = Storage::new(6);

        let handles: Vec<_> = (0..1_000)
            .map(|i| {
                storage.request(format!("asset_{}", i), move |_| {
                    if i % 10 == 0 {
                        anyhow::bail!("bad asset {}", i);
                    }
                    Ok(i)
                })
            })
            .collect();

        let failed = handles
            .into_iter()
            .map(|h| h.wait())
            .filter(|r| r.is_err())
            .count();

        assert_eq!(failed, 100);
        storage.stop_workers();
        let metrics = storage.metrics();
        assert_eq!(metrics.failed_tasks, 100);
        println!("  Success rate: {:.1}%", metrics.success_rate() * 100.0);
        assert!((metrics.success_rate() - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_test_5_request_all() {
        println!("\n=== LOAD TEST 5: пакетный запрос 2k ассетов с повторами ===");
        let storage = Storage::with_config(Config::io_bound());
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..2_000).map(|i| {
            let calls = calls.clone();
            let loader = move |key: &AssetKey| -> anyhow::Result<String> {
                calls.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_micros(200));
                Ok(key.to_string())
            };
            (format!("sprite_{}", i % 500), loader)
        });

        let start = Instant::now();
        let results = storage.request_all(requests, JoinOrdering::UnOrdered).await;
        println!("✓ 2k requests: {:?}", start.elapsed());

        assert_eq!(results.len(), 2_000);
        assert!(results.iter().all(|(key, r)| r.as_ref().unwrap().as_str() == key.as_str()));
        assert_eq!(calls.load(Ordering::Relaxed), 500);
        assert_eq!(storage.len(), 500);
    }
}
