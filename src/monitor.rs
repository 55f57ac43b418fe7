use axum::extract::Extension;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::types::BlockNum;

#[derive(Debug)]
pub enum MonitorMessage {
    Block(BlockMessage),
    Rollback(BlockNum),
}

#[derive(Debug)]
pub struct BlockMessage {
    reader: String,
    height: BlockNum,
    last_irreversible: BlockNum,
}

impl BlockMessage {
    pub fn new(reader: String, height: BlockNum, last_irreversible: BlockNum) -> Self {
        Self {
            reader,
            height,
            last_irreversible,
        }
    }
}

/// Ingestion counters, aggregated since process start.
struct ReaderState {
    reader: String,
    height: BlockNum,
    last_irreversible: BlockNum,
    blocks_processed: u64,
    forks_handled: u64,
    started: Instant,
}

impl ReaderState {
    fn new() -> Self {
        Self {
            reader: String::new(),
            height: 0,
            last_irreversible: 0,
            blocks_processed: 0,
            forks_handled: 0,
            started: Instant::now(),
        }
    }

    fn apply(&mut self, msg: MonitorMessage) {
        match msg {
            MonitorMessage::Block(msg) => {
                self.reader = msg.reader;
                self.height = msg.height;
                self.last_irreversible = msg.last_irreversible;
                self.blocks_processed += 1;
            }
            MonitorMessage::Rollback(_height) => {
                self.forks_handled += 1;
            }
        }
    }
}

/// What `/status` serves. Rates are computed at request time.
#[derive(Serialize)]
struct Status {
    reader: String,
    height: BlockNum,
    last_irreversible: BlockNum,
    blocks_processed: u64,
    forks_handled: u64,
    uptime_seconds: u64,
    blocks_per_second: f64,
}

impl Status {
    fn of(state: &ReaderState) -> Self {
        let uptime = state.started.elapsed();
        let blocks_per_second = if uptime.as_secs_f64() > 0.0 {
            state.blocks_processed as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };
        Self {
            reader: state.reader.clone(),
            height: state.height,
            last_irreversible: state.last_irreversible,
            blocks_processed: state.blocks_processed,
            forks_handled: state.forks_handled,
            uptime_seconds: uptime.as_secs(),
            blocks_per_second,
        }
    }
}

type SharedState = Arc<RwLock<ReaderState>>;

pub struct Monitor {
    port: u16,
    tx: mpsc::Sender<MonitorMessage>,
    rx: mpsc::Receiver<MonitorMessage>,
}

impl Monitor {
    pub fn new(port: u16) -> Self {
        let (tx, rx) = mpsc::channel(32);
        Self { port, tx, rx }
    }

    pub fn sender(&self) -> mpsc::Sender<MonitorMessage> {
        self.tx.clone()
    }

    pub async fn start(&mut self) {
        let state: SharedState = Arc::new(RwLock::new(ReaderState::new()));

        self.start_server(state.clone());

        while let Some(msg) = self.rx.recv().await {
            state.write().unwrap().apply(msg);
        }
    }

    fn start_server(&self, state: SharedState) {
        let app = Router::new()
            .route("/status", get(status))
            .layer(Extension(state));

        let address = SocketAddr::from(([0, 0, 0, 0], self.port));
        tokio::spawn(async move {
            tracing::info!("status endpoint listening on {}", &address);

            axum::Server::bind(&address)
                .serve(app.into_make_service())
                .await
                .unwrap()
        });
    }
}

async fn status(Extension(state): Extension<SharedState>) -> Json<Status> {
    let status = Status::of(&state.read().unwrap());
    Json(status)
}
