use thiserror::Error;

use crate::types::BlockNum;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown ABI type `{0}`")]
    UnknownType(String),
    #[error("unexpected end of input while decoding `{0}`")]
    Eof(String),
    #[error("decoded {consumed} of {len} bytes for `{type_name}` - ABI drift?")]
    TrailingBytes {
        type_name: String,
        consumed: usize,
        len: usize,
    },
    #[error("unsupported table delta variant `{0}`")]
    UnsupportedDelta(String),
    #[error("varint overflow while decoding `{0}`")]
    VarintOverflow(String),
    #[error("invalid ABI document: {0}")]
    BadAbi(String),
    #[error("deserializer worker gone")]
    WorkerGone,
}

#[derive(Error, Debug)]
pub enum ShipError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("state-history connection closed")]
    Closed,
    #[error("expected the state-history ABI as first message")]
    MissingAbi,
    #[error("unexpected state-history message: {0}")]
    UnexpectedMessage(String),
    #[error("received block {received} does not follow {expected}")]
    OutOfOrder { expected: BlockNum, received: BlockNum },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("malformed state-history result: {0}")]
    BadResult(String),
}

#[derive(Error, Debug)]
pub enum ChainApiError {
    #[error("chain API is unreachable")]
    Unreachable,
    #[error("bad chain API request: {0}")]
    BadRequest(String),
    #[error("chain API request not found: {0}")]
    NotFound(String),
    #[error("error while requesting ({0})")]
    Api(String),
    #[error("failed parsing response from chain API")]
    Deserialization,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("transaction is poisoned by an earlier error")]
    Poisoned,
    #[error("invalid row value for column `{0}`")]
    BadValue(String),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("message broker error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Top-level taxonomy driving the receiver's retry/halt policy.
#[derive(Error, Debug)]
pub enum FillError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Ship(#[from] ShipError),
    #[error(transparent)]
    ChainApi(#[from] ChainApiError),
    #[error("handler `{handler}` failed at {site}: {message}")]
    Handler {
        handler: &'static str,
        site: &'static str,
        message: String,
    },
    #[error("config error: {0}")]
    Config(String),
}

impl FillError {
    pub fn handler(handler: &'static str, site: &'static str, message: impl ToString) -> Self {
        Self::Handler {
            handler,
            site,
            message: message.to_string(),
        }
    }
}
