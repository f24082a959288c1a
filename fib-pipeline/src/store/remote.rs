//! TCP client for a running store process.
//!
//! One long-lived connection carries request/response traffic, one request
//! in flight at a time. Each subscription opens its own connection because
//! a subscribed connection only ever receives events.

use std::{collections::BTreeMap, net::SocketAddr};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tokio::{
    io::BufReader,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};
use tracing::{debug, info, warn};

use super::{DurableLog, EventBus, ResultCache, Subscription};
use crate::{
    model::{CacheValue, Index, SubmissionRecord, parse_index},
    protocol::{StoreRequest, StoreResponse, read_message, write_message},
    retry::{RetryPolicy, retry},
};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to store at {addr}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn call(&mut self, request: &StoreRequest) -> Result<StoreResponse> {
        write_message(&mut self.writer, request).await?;
        read_message::<_, StoreResponse>(&mut self.reader)
            .await?
            .ok_or_else(|| anyhow!("store closed the connection"))
    }
}

pub struct RemoteStore {
    addr: SocketAddr,
    // `None` after a failed or abandoned call; the next request dials again.
    conn: Mutex<Option<Connection>>,
}

impl RemoteStore {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let conn = Connection::open(addr).await?;
        Ok(Self {
            addr,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Blocks until the store accepts a connection or the policy gives up.
    pub async fn connect_with_retry(addr: SocketAddr, policy: RetryPolicy) -> Result<Self> {
        let store = retry(policy, "store", || Self::connect(addr)).await?;
        info!(%addr, "connected to store");
        Ok(store)
    }

    async fn request(&self, request: StoreRequest) -> Result<StoreResponse> {
        let mut guard = self.conn.lock().await;
        // Out of the slot while the call is in flight. A call that fails or is
        // dropped before reading its reply never returns the connection, so
        // nobody reads a stale response off it.
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => {
                debug!(addr = %self.addr, "redialing store");
                Connection::open(self.addr).await?
            }
        };

        let response = conn.call(&request).await?;
        *guard = Some(conn);

        match response {
            StoreResponse::Error { message } => bail!("store rejected request: {message}"),
            response => Ok(response),
        }
    }
}

fn unexpected(response: StoreResponse) -> anyhow::Error {
    anyhow!("unexpected store response: {response:?}")
}

#[async_trait]
impl ResultCache for RemoteStore {
    async fn set(&self, index: Index, value: CacheValue) -> Result<()> {
        let request = StoreRequest::Set {
            field: index.to_string(),
            value: value.to_string(),
        };
        match self.request(request).await? {
            StoreResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn snapshot(&self) -> Result<BTreeMap<Index, CacheValue>> {
        let entries = match self.request(StoreRequest::GetAll).await? {
            StoreResponse::Values { entries } => entries,
            other => return Err(unexpected(other)),
        };

        let mut snapshot = BTreeMap::new();
        for (field, value) in entries {
            match (parse_index(&field), value.parse::<CacheValue>()) {
                (Ok(index), Ok(value)) => {
                    snapshot.insert(index, value);
                }
                _ => warn!(%field, %value, "ignoring malformed cache entry"),
            }
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl DurableLog for RemoteStore {
    async fn append(&self, record: SubmissionRecord) -> Result<()> {
        let request = StoreRequest::Append {
            number: record.number,
        };
        match self.request(request).await? {
            StoreResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn read_all(&self) -> Result<Vec<SubmissionRecord>> {
        match self.request(StoreRequest::ReadLog).await? {
            StoreResponse::Log { records } => Ok(records),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl EventBus for RemoteStore {
    async fn publish(&self, topic: &str, payload: String) -> Result<usize> {
        let request = StoreRequest::Publish {
            topic: topic.to_string(),
            payload,
        };
        match self.request(request).await? {
            StoreResponse::Published { receivers } => Ok(receivers),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let mut conn = Connection::open(self.addr).await?;
        let request = StoreRequest::Subscribe {
            topic: topic.to_string(),
        };
        match conn.call(&request).await? {
            StoreResponse::Ok => {}
            StoreResponse::Error { message } => bail!("subscribe rejected: {message}"),
            other => return Err(unexpected(other)),
        }

        Ok(Box::new(RemoteSubscription {
            reader: conn.reader,
            _writer: conn.writer,
        }))
    }
}

pub struct RemoteSubscription {
    reader: BufReader<OwnedReadHalf>,
    // Held so the store does not see our side close.
    _writer: OwnedWriteHalf,
}

#[async_trait]
impl Subscription for RemoteSubscription {
    async fn next(&mut self) -> Option<String> {
        loop {
            match read_message::<_, StoreResponse>(&mut self.reader).await {
                Ok(Some(StoreResponse::Event { payload, .. })) => return Some(payload),
                Ok(Some(other)) => debug!(?other, "ignoring non-event on subscription"),
                Ok(None) => return None,
                Err(err) => {
                    warn!(error = %err, "subscription stream failed");
                    return None;
                }
            }
        }
    }
}
