use super::*;
use async_executor::Executor;
use futures_lite::future;
use std::env;

fn init() {
    {
        let mut builder = env_logger::builder();
        if env::var(env_logger::DEFAULT_FILTER_ENV).is_err() {
            builder.filter_level(log::LevelFilter::Off);
        }
        let _ = builder.is_test(true).try_init();
    }
}

fn worker_binary() -> PathBuf {
    env::var("MEDIASOUP_WORKER_BIN")
        .map(|path| path.into())
        .unwrap_or_else(|_| "../worker/out/Release/mediasoup-worker".into())
}

#[test]
fn spawns_pool_and_round_robins_router_allocation() {
    init();

    future::block_on(async move {
        let executor = Arc::new(Executor::new());
        let worker_manager = WorkerManager::new_uniform(executor, worker_binary(), 2, WorkerSettings::default())
            .await
            .unwrap();

        assert_eq!(worker_manager.workers().len(), 2);

        let media_codecs = Vec::new();
        let router_a = worker_manager.create_router(RouterOptions::new(media_codecs.clone())).await.unwrap();
        let router_b = worker_manager.create_router(RouterOptions::new(media_codecs.clone())).await.unwrap();
        let router_c = worker_manager.create_router(RouterOptions::new(media_codecs)).await.unwrap();

        // 2 workers: pointer should wrap, handing router_c back to the same worker as router_a.
        assert_ne!(router_a.id(), router_b.id());
        assert_ne!(router_b.id(), router_c.id());
    });
}

#[test]
fn seeds_webrtc_server_per_worker_ordinal() {
    init();

    future::block_on(async move {
        let executor = Arc::new(Executor::new());
        let webrtc_settings = WebRtcServerSettings { ip: "127.0.0.1".to_string(), announced_ip: None, base_port: 44000 };
        let worker_manager = WorkerManager::new(
            executor,
            worker_binary(),
            2,
            |_ordinal| WorkerSettings::default(),
            Some(webrtc_settings),
        )
        .await
        .unwrap();

        assert_eq!(worker_manager.webrtc_servers().len(), 2);
    });
}
