//! Remote cache client speaking the memcache ASCII protocol.
//!
//! # Responsibilities
//! - Encode get/set/delete commands
//! - Parse the matching replies
//! - Keep a small pool of idle TCP connections to the server
//!
//! # Design Decisions
//! - Every operation is bounded by `op_timeout`, including connecting
//! - An operation owns its connection for its whole duration; concurrent
//!   operations use separate connections and never wait on each other
//! - A connection that saw an error or timeout is discarded, since its
//!   protocol state is unknown

use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::cache::store::{CacheError, CacheStore};

/// Longest key the server accepts.
pub const MAX_KEY_LEN: usize = 250;

/// Largest item the server stores by default.
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

/// Idle connections kept for reuse; extra ones are closed.
const MAX_IDLE: usize = 16;

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);

/// A memcache command.
#[derive(Debug, Clone)]
enum Command<'a> {
    /// `get <key>\r\n`
    Get { key: &'a str },
    /// `set <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
    Set {
        key: &'a str,
        value: &'a [u8],
        exptime: u32,
    },
    /// `delete <key>\r\n`
    Delete { key: &'a str },
}

impl Command<'_> {
    fn key(&self) -> &str {
        match self {
            Command::Get { key } | Command::Set { key, .. } | Command::Delete { key } => key,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        match self {
            Command::Get { key } => write!(buf, "get {}\r\n", key),
            Command::Set {
                key,
                value,
                exptime,
            } => {
                write!(buf, "set {} 0 {} {}\r\n", key, exptime, value.len())?;
                buf.extend_from_slice(value);
                buf.extend_from_slice(b"\r\n");
                Ok(())
            }
            Command::Delete { key } => write!(buf, "delete {}\r\n", key),
        }
    }
}

/// A parsed server reply.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Value(Option<Vec<u8>>),
    Stored,
    NotStored,
    Deleted,
    NotFound,
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, CacheError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(CacheError::Protocol("connection closed".to_string()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read the reply to `command` from `reader`.
async fn read_reply<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    command: &Command<'_>,
) -> Result<Reply, CacheError> {
    let line = read_line(reader).await?;

    match command {
        Command::Get { .. } => {
            if line == "END" {
                return Ok(Reply::Value(None));
            }
            // VALUE <key> <flags> <bytes> [<cas unique>]
            let mut parts = line.split(' ');
            let len = match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some("VALUE"), Some(_), Some(_), Some(len)) => len
                    .parse::<usize>()
                    .map_err(|_| CacheError::Protocol(line.clone()))?,
                _ => return Err(CacheError::Protocol(line.clone())),
            };
            if len > MAX_VALUE_LEN {
                return Err(CacheError::Protocol(format!("value of {} bytes exceeds item limit", len)));
            }

            let mut data = vec![0u8; len + 2];
            reader.read_exact(&mut data).await?;
            if !data.ends_with(b"\r\n") {
                return Err(CacheError::Protocol("value not terminated by CRLF".to_string()));
            }
            data.truncate(len);

            let end = read_line(reader).await?;
            if end != "END" {
                return Err(CacheError::Protocol(end));
            }
            Ok(Reply::Value(Some(data)))
        }
        Command::Set { .. } => match line.as_str() {
            "STORED" => Ok(Reply::Stored),
            "NOT_STORED" => Ok(Reply::NotStored),
            _ => Err(CacheError::Protocol(line)),
        },
        Command::Delete { .. } => match line.as_str() {
            "DELETED" => Ok(Reply::Deleted),
            "NOT_FOUND" => Ok(Reply::NotFound),
            _ => Err(CacheError::Protocol(line)),
        },
    }
}

type Conn = BufReader<TcpStream>;

async fn connect(addr: &str) -> Result<Conn, CacheError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    tracing::debug!(addr = %addr, "Connected to memcache");
    Ok(BufReader::new(stream))
}

async fn exchange(conn: &mut Conn, encoded: &[u8], command: &Command<'_>) -> Result<Reply, CacheError> {
    conn.get_mut().write_all(encoded).await?;
    read_reply(conn, command).await
}

/// Memcache-backed [`CacheStore`].
#[derive(Debug)]
pub struct MemcacheStore {
    addr: String,
    op_timeout: Duration,
    idle: Mutex<Vec<Conn>>,
}

impl MemcacheStore {
    /// Client for the server at `addr` (`host:port`). No connection is made until first use.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            op_timeout: DEFAULT_OP_TIMEOUT,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of pooled connections waiting for reuse.
    pub fn idle_connections(&self) -> usize {
        self.idle().len()
    }

    // Never held across an await.
    fn idle(&self) -> MutexGuard<'_, Vec<Conn>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn checkin(&self, conn: Conn) {
        let mut idle = self.idle();
        if idle.len() < MAX_IDLE {
            idle.push(conn);
        }
    }

    async fn execute(&self, command: Command<'_>) -> Result<Reply, CacheError> {
        validate_key(command.key())?;

        let mut encoded = Vec::new();
        command.encode(&mut encoded)?;

        let pooled = self.idle().pop();
        let operation = async {
            let mut conn = match pooled {
                Some(conn) => conn,
                None => connect(&self.addr).await?,
            };
            let reply = exchange(&mut conn, &encoded, &command).await?;
            Ok::<_, CacheError>((conn, reply))
        };

        match tokio::time::timeout(self.op_timeout, operation).await {
            Ok(Ok((conn, reply))) => {
                self.checkin(conn);
                Ok(reply)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CacheError::Timeout(self.op_timeout)),
        }
    }
}

#[async_trait]
impl CacheStore for MemcacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.execute(Command::Get { key }).await? {
            Reply::Value(value) => Ok(value),
            other => Err(CacheError::Protocol(format!("{:?}", other))),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let reply = self
            .execute(Command::Set {
                key,
                value,
                exptime: 0,
            })
            .await?;
        if reply == Reply::NotStored {
            tracing::debug!(key = %key, "Memcache declined to store entry");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.execute(Command::Delete { key }).await.map(|_| ())
    }
}
