use std::env;
use std::sync::Arc;

use chainfill::config::Config;
use chainfill::constants::settings;
use chainfill::framework::NotificationSink;
use chainfill::framework::RedisSink;
use chainfill::handlers;
use chainfill::monitor::Monitor;
use chainfill::receiver::StateReceiver;
use chainfill::ship::BlockReader;
use chainfill::ship::ReaderConfig;

#[tokio::main]
async fn main() {
    // Configure tracing subscriber
    let level = match env::var("CHAINFILL_LOG_DEBUG") {
        Ok(_) => tracing::Level::DEBUG,
        _ => tracing::Level::INFO,
    };
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_max_level(level)
        .finish();
    let _guard = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("starting chainfill");

    let config_path = env::var("CHAINFILL_CONFIG").unwrap_or_else(|_| "config.json".to_owned());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    let sink: Arc<dyn NotificationSink> = match RedisSink::connect(&config.redis_uri).await {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::error!("cannot reach message broker: {e}");
            std::process::exit(1);
        }
    };

    let mut monitor = Monitor::new(config.monitor_port);
    let monitor_tx = monitor.sender();

    let handlers = match handlers::build(&config, &sink) {
        Ok(handlers) => handlers,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    tracing::info!("configuring receiver");
    let receiver = match StateReceiver::new(config.clone(), handlers, sink, monitor_tx).await {
        Ok(receiver) => receiver,
        Err(e) => {
            tracing::error!("receiver setup failed: {e}");
            std::process::exit(1);
        }
    };

    let (reader, blocks) = BlockReader::new(ReaderConfig {
        ship_endpoint: config.ship_endpoint.clone(),
        start_block: receiver.start_block(),
        stop_block: config.stop_block,
        ack_batch: config.ship_ack_batch,
        window: config.ship_window,
        ds_threads: config.ds_threads,
        backoff_base_ms: settings::BACKOFF_BASE_MS,
        backoff_cap_ms: settings::BACKOFF_CAP_MS,
    });

    tokio::spawn(async move {
        monitor.start().await;
    });
    tokio::spawn(async move {
        reader.start().await;
    });

    // The receiver runs on this task until shutdown or stream end.
    match receiver.start(blocks).await {
        Ok(last_committed) => {
            tracing::info!("clean shutdown - last committed block {last_committed}");
        }
        Err(e) => {
            tracing::error!("unrecoverable failure: {e}");
            std::process::exit(1);
        }
    }
}
