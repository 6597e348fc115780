//! TCP adapter for the enforcement daemon.
//!
//! Speaks a line-delimited JSON protocol: one request object per line, one
//! reply object per line. The session is shared by the monitor loop and the
//! block synchronizer, so calls serialize on the underlying stream.

use crate::config::MonitorConfig;
use crate::firewall::{BlockRange, ConnectionRecord, FirewallError, FirewallSession};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Remote targets get this many connect attempts before giving up.
const REMOTE_CONNECT_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Error string the daemon uses for an unknown filter name.
const FILTER_NOT_FOUND: &str = "filter_not_found";

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Auth { user: &'a str, password: &'a str },
    Snapshot,
    GetFilter { name: &'a str },
    ReplaceFilter { name: &'a str, ranges: &'a [BlockRange] },
}

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    connections: Option<Vec<ConnectionRecord>>,
    #[serde(default)]
    ranges: Option<Vec<BlockRange>>,
}

/// Live session with the daemon. Stays open across polling cycles; torn
/// down only on process exit.
pub struct RpcSession {
    io: Mutex<BufStream<TcpStream>>,
}

impl RpcSession {
    pub async fn connect(host: &str, port: u16) -> Result<Self, FirewallError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| FirewallError::Connect(format!("{host}:{port}: {e}")))?;

        Ok(Self {
            io: Mutex::new(BufStream::new(stream)),
        })
    }

    pub async fn authenticate(&self, user: &str, password: &str) -> Result<(), FirewallError> {
        let reply = self.call(&Request::Auth { user, password }).await?;
        if reply.ok {
            Ok(())
        } else {
            Err(FirewallError::Auth(
                reply.error.unwrap_or_else(|| "rejected".to_string()),
            ))
        }
    }

    async fn call(&self, request: &Request<'_>) -> Result<Reply, FirewallError> {
        let mut io = self.io.lock().await;

        let mut line = serde_json::to_string(request)
            .map_err(|e| FirewallError::Protocol(e.to_string()))?;
        line.push('\n');
        io.write_all(line.as_bytes()).await?;
        io.flush().await?;

        let mut reply = String::new();
        let read = io.read_line(&mut reply).await?;
        if read == 0 {
            return Err(FirewallError::Protocol("daemon closed the connection".to_string()));
        }

        serde_json::from_str(reply.trim())
            .map_err(|e| FirewallError::Protocol(format!("bad reply: {e}")))
    }
}

#[async_trait]
impl FirewallSession for RpcSession {
    async fn snapshot(&self) -> Result<Vec<ConnectionRecord>, FirewallError> {
        let reply = self.call(&Request::Snapshot).await?;
        if !reply.ok {
            return Err(FirewallError::Protocol(
                reply.error.unwrap_or_else(|| "snapshot refused".to_string()),
            ));
        }
        reply
            .connections
            .ok_or_else(|| FirewallError::Protocol("snapshot reply without connections".to_string()))
    }

    async fn filter_ranges(&self, name: &str) -> Result<Option<Vec<BlockRange>>, FirewallError> {
        let reply = self.call(&Request::GetFilter { name }).await?;
        if !reply.ok {
            return match reply.error.as_deref() {
                Some(FILTER_NOT_FOUND) => Ok(None),
                other => Err(FirewallError::Protocol(
                    other.unwrap_or("filter read refused").to_string(),
                )),
            };
        }
        Ok(Some(reply.ranges.unwrap_or_default()))
    }

    async fn replace_filter_ranges(
        &self,
        name: &str,
        ranges: &[BlockRange],
    ) -> Result<(), FirewallError> {
        let reply = self.call(&Request::ReplaceFilter { name, ranges }).await?;
        if !reply.ok {
            return Err(FirewallError::Protocol(
                reply.error.unwrap_or_else(|| "filter write refused".to_string()),
            ));
        }
        Ok(())
    }
}

/// Establish the session per the connect policy: local targets get one
/// direct uncredentialed attempt; remote targets get up to three
/// credentialed attempts. Failure here is the one fatal path.
pub async fn establish(config: &MonitorConfig) -> Result<RpcSession, FirewallError> {
    if config.is_local() {
        let session = RpcSession::connect(&config.host, config.port).await?;
        info!(host = %config.host, port = config.port, "Connected to local enforcement daemon");
        return Ok(session);
    }

    let session = connect_with_retries(REMOTE_CONNECT_ATTEMPTS, move || async move {
        let session = RpcSession::connect(&config.host, config.port).await?;
        session.authenticate(&config.user, &config.password).await?;
        Ok(session)
    })
    .await?;

    info!(host = %config.host, port = config.port, "Connected to remote enforcement daemon");
    Ok(session)
}

async fn connect_with_retries<F, Fut, T>(attempts: u32, mut connect: F) -> Result<T, FirewallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FirewallError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect().await {
            Ok(session) => return Ok(session),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!(attempt, error = %e, "Connect attempt failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}
