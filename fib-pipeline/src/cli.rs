use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::{
    model::{DEFAULT_MAX_INDEX, MAX_SAFE_INDEX},
    retry::RetryPolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the store: result cache, durable log and event bus.
    Store(StoreArgs),
    /// Run the HTTP ingestion and query service.
    Api(ApiArgs),
    /// Run a compute worker subscribed to the event bus.
    Worker(WorkerArgs),
    /// Talk to a running api over HTTP.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Socket address the store should bind to. Use 0 for an ephemeral port.
    #[arg(long, env = "FIB_LISTEN", default_value = "127.0.0.1:6400")]
    pub listen: SocketAddr,

    /// Directory holding the durable log journal.
    #[arg(long, env = "FIB_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,
}

/// How to reach the store at startup.
#[derive(Args, Debug, Clone)]
pub struct StoreConnectArgs {
    /// Address of the store process.
    #[arg(long, env = "FIB_STORE_ADDR", default_value = "127.0.0.1:6400")]
    pub store: SocketAddr,

    /// Connection attempts before giving up on the store.
    #[arg(long, env = "FIB_CONNECT_ATTEMPTS", default_value_t = RetryPolicy::DEFAULT_ATTEMPTS)]
    pub connect_attempts: u32,
}

impl StoreConnectArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.connect_attempts)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ApiArgs {
    /// Socket address the HTTP server should bind to. Use 0 for an ephemeral port.
    #[arg(long, env = "FIB_LISTEN", default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Largest index accepted for computation.
    #[arg(
        long,
        env = "FIB_MAX_INDEX",
        default_value_t = DEFAULT_MAX_INDEX,
        value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_SAFE_INDEX))
    )]
    pub max_index: u32,

    #[command(flatten)]
    pub connect: StoreConnectArgs,
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub connect: StoreConnectArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Base URL of the api process.
    #[arg(long, env = "FIB_API_URL", default_value = "http://127.0.0.1:5000")]
    pub api_url: String,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ClientCommand {
    /// Submit an index for computation.
    Submit {
        /// Index to compute; validated by the api.
        #[arg(allow_hyphen_values = true)]
        index: String,
    },
    /// Print the current cache contents.
    Current,
    /// Print every submitted index in order.
    All,
}
