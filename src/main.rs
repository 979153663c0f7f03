use unicorn_assets::{AssetKey, Config, JoinOrdering, Storage};
use anyhow::bail;
use tokio::runtime::Builder;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};


fn load_texture(key: &AssetKey) -> anyhow::Result<Vec<u8>> {
    if key.as_str().starts_with("missing") {
        bail!("file not found");
    }
    thread::sleep(Duration::from_millis(20));
    Ok(key.as_str().bytes().collect())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let now = Instant::now();
        let storage = Arc::new(Storage::with_config(Config::io_bound()));
        let monitor = storage.start_monitoring(Duration::from_millis(50), |metrics| {
            log::info!(
                "busy {}/{} idle {} queued {} done {} failed {}",
                metrics.busy_workers, metrics.workers, metrics.idle_workers(), metrics.queued_tasks,
                metrics.completed_tasks, metrics.failed_tasks
            );
        });

        let keys = (0..64)
            .map(|i| format!("textures/{}.png", i % 48))
            .chain(["missing/atlas.png".to_string()]);
        let results = storage
            .request_all(keys.map(|k| (k, load_texture)), JoinOrdering::UnOrdered)
            .await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        monitor.cancel();
        storage.stop_workers();

        let metrics = storage.metrics();
        println!(
            "requests: {}, unique assets: {}, loads: {}, failed: {}, elapsed: {:?}",
            results.len(),
            storage.len(),
            metrics.completed_tasks + metrics.failed_tasks,
            failed,
            now.elapsed()
        );
    });

    Ok(())
}
