use std::{net::SocketAddr, time::Duration};

use clap::Parser;

use crate::connection::ConnectionConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the live poll server", long_about = None)]
pub struct Cli {
    /// Socket address the HTTP server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, env = "LIVE_POLL_LISTEN", default_value = "0.0.0.0:8899")]
    pub listen: SocketAddr,

    /// Shared secret required by the admin endpoints (X-Token header or `pwd` cookie).
    #[arg(long, env = "LIVE_POLL_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: String,

    /// Seconds a client may go without answering a ping before it is dropped.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub pong_wait_secs: u64,

    /// Seconds allowed for a single frame write.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub write_wait_secs: u64,

    /// Largest inbound socket message accepted, in bytes.
    #[arg(long, default_value_t = 512)]
    pub max_message_size: usize,
}

impl Cli {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            write_wait: Duration::from_secs(self.write_wait_secs),
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            max_message_size: self.max_message_size,
        }
    }
}
