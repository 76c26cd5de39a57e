use super::*;
use async_executor::Executor;
use futures_lite::future;
use std::env;
use std::sync::atomic::AtomicBool as StdAtomicBool;

fn init() {
    let mut builder = env_logger::builder();
    if env::var(env_logger::DEFAULT_FILTER_ENV).is_err() {
        builder.filter_level(log::LevelFilter::Off);
    }
    let _ = builder.is_test(true).try_init();
}

fn worker_binary() -> PathBuf {
    env::var("MEDIASOUP_WORKER_BIN").map(|path| path.into()).unwrap_or_else(|_| "../worker/out/Release/mediasoup-worker".into())
}

#[test]
fn spawns_and_reports_resource_usage() {
    init();

    future::block_on(async move {
        let executor = Arc::new(Executor::new());
        let worker = Worker::new(Arc::clone(&executor), worker_binary(), WorkerSettings::default()).await.unwrap();

        assert!(worker.pid() > 0);
        assert!(!worker.closed());

        worker.get_resource_usage().await.unwrap();

        let dump = worker.dump().await.unwrap();
        assert_eq!(dump.pid, worker.pid());
        assert!(dump.router_ids.is_empty());
    });
}

#[test]
fn create_router_fires_new_router_handler() {
    init();

    future::block_on(async move {
        let executor = Arc::new(Executor::new());
        let worker = Worker::new(Arc::clone(&executor), worker_binary(), WorkerSettings::default()).await.unwrap();

        let fired = Arc::new(StdAtomicBool::new(false));
        let fired_in_handler = Arc::clone(&fired);
        worker.on_new_router(move |_router| {
            fired_in_handler.store(true, Ordering::SeqCst);
        });

        let router = worker.create_router(RouterOptions::new(Vec::new())).await.unwrap();

        assert!(fired.load(Ordering::SeqCst));

        let dump = worker.dump().await.unwrap();
        assert_eq!(dump.router_ids, vec![router.id()]);
    });
}

#[test]
fn on_close_fires_once_last_handle_drops() {
    init();

    future::block_on(async move {
        let executor = Arc::new(Executor::new());
        let worker = Worker::new(Arc::clone(&executor), worker_binary(), WorkerSettings::default()).await.unwrap();

        let closed = Arc::new(StdAtomicBool::new(false));
        let closed_in_handler = Arc::clone(&closed);
        worker.on_close(move || {
            closed_in_handler.store(true, Ordering::SeqCst);
        });

        drop(worker);

        assert!(closed.load(Ordering::SeqCst));
    });
}
