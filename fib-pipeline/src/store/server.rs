use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
    task::JoinSet,
};
use tracing::{debug, info, warn};

use super::{
    DurableLog, EventBus, ResultCache, Subscription,
    memory::{MemoryBus, MemoryCache},
};
use crate::{
    model::{CacheValue, SubmissionRecord, parse_index},
    protocol::{StoreRequest, StoreResponse, read_message, write_message},
};

/// The store process: result cache, durable log and event bus behind one
/// TCP listener.
pub struct StoreServer {
    listener: TcpListener,
    state: Arc<StoreState>,
}

impl StoreServer {
    pub fn new(listener: TcpListener, log: Arc<dyn DurableLog>) -> Self {
        Self {
            listener,
            state: Arc::new(StoreState {
                cache: MemoryCache::new(),
                log,
                bus: MemoryBus::new(),
            }),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let StoreServer { listener, state } = self;
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("store shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state, &mut connections);
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Open connections go down with the store, subscribers included.
        connections.shutdown().await;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

struct StoreState {
    cache: MemoryCache,
    log: Arc<dyn DurableLog>,
    bus: MemoryBus,
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<StoreState>,
    connections: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state, connections),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<StoreState>,
    connections: &mut JoinSet<()>,
) {
    let state = Arc::clone(state);
    connections.spawn(async move {
        if let Err(err) = handle_connection(stream, state).await {
            warn!(peer = %peer, error = ?err, "store connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, state: Arc<StoreState>) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    debug!(?peer, "store connection opened");

    while let Some(request) = read_message::<_, StoreRequest>(&mut reader).await? {
        match request {
            StoreRequest::Subscribe { topic } => {
                info!(?peer, %topic, "subscriber attached");
                run_subscriber(&state, &topic, &mut reader, &mut writer).await?;
                info!(?peer, %topic, "subscriber detached");
                return Ok(());
            }
            request => {
                let response = dispatch(&state, request).await;
                write_message(&mut writer, &response).await?;
            }
        }
    }

    debug!(?peer, "store connection closed");
    Ok(())
}

async fn dispatch(state: &StoreState, request: StoreRequest) -> StoreResponse {
    match apply(state, request).await {
        Ok(response) => response,
        Err(err) => StoreResponse::Error {
            message: format!("{err:#}"),
        },
    }
}

async fn apply(state: &StoreState, request: StoreRequest) -> Result<StoreResponse> {
    let response = match request {
        StoreRequest::Set { field, value } => {
            let index = parse_index(&field)?;
            let value: CacheValue = value.parse()?;
            state.cache.set(index, value).await?;
            StoreResponse::Ok
        }
        StoreRequest::GetAll => {
            let entries = state
                .cache
                .snapshot()
                .await?
                .into_iter()
                .map(|(index, value)| (index.to_string(), value.to_string()))
                .collect();
            StoreResponse::Values { entries }
        }
        StoreRequest::Append { number } => {
            state.log.append(SubmissionRecord::new(number)).await?;
            StoreResponse::Ok
        }
        StoreRequest::ReadLog => StoreResponse::Log {
            records: state.log.read_all().await?,
        },
        StoreRequest::Publish { topic, payload } => {
            let receivers = state.bus.publish(&topic, payload).await?;
            debug!(%topic, receivers, "published");
            StoreResponse::Published { receivers }
        }
        StoreRequest::Subscribe { .. } => {
            anyhow::bail!("subscribe must be the first request on a connection")
        }
    };
    Ok(response)
}

async fn run_subscriber<R, W>(
    state: &StoreState,
    topic: &str,
    reader: &mut R,
    writer: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut events = state.bus.subscribe_topic(topic).await;
    // Acknowledge only once registered, so the peer knows events will reach it.
    write_message(writer, &StoreResponse::Ok).await?;

    loop {
        select! {
            incoming = read_message::<_, StoreRequest>(reader) => {
                match incoming? {
                    Some(_) => {
                        write_message(writer, &StoreResponse::Error {
                            message: "subscribed connections only receive events".to_string(),
                        })
                        .await?;
                    }
                    None => break,
                }
            }
            payload = events.next() => {
                let Some(payload) = payload else { break };
                let event = StoreResponse::Event {
                    topic: topic.to_string(),
                    payload,
                };
                if let Err(err) = write_message(writer, &event).await {
                    debug!(?err, "failed to deliver event to subscriber");
                    break;
                }
            }
        }
    }

    Ok(())
}
