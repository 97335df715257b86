//! Memcached backend over the text protocol.
//!
//! One connection is opened lazily and shared behind an async mutex. Any I/O
//! or protocol failure drops the connection; the next command reconnects.
//!
//! ## Commands Used
//!
//! ```text
//! get <key>                                  -> VALUE <key> <flags> <bytes>\r\n<data>\r\nEND | END
//! set <key> 0 <exptime> <bytes>\r\n<data>    -> STORED
//! delete <key>                               -> DELETED | NOT_FOUND
//! incr <key> 1                               -> <value> | NOT_FOUND
//! add <key> 0 0 1\r\n0                       -> STORED | NOT_STORED
//! flush_all                                  -> OK
//! version                                    -> VERSION <version>
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use smartcache_core::constants::{MEMCACHED_MAX_RELATIVE_TTL, MEMCACHED_MAX_VALUE_SIZE};
use smartcache_core::error::{Result, SmartCacheError};
use smartcache_core::traits::CacheBackend;
use smartcache_core::types::CacheKey;

const BACKEND_NAME: &str = "memcached";

type Connection = BufStream<TcpStream>;

/// Server reply to one command.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Line(String),
    Value(Option<Vec<u8>>),
}

/// Memcached cache backend.
pub struct MemcachedBackend {
    addr: String,
    connect_timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl MemcachedBackend {
    /// Creates a backend for `addr` (`host:port`). No connection is opened yet.
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            connection: Mutex::new(None),
        }
    }

    /// Returns the server address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn open(&self) -> Result<Connection> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                SmartCacheError::ConnectionTimeout(format!(
                    "memcached at {} after {:?}",
                    self.addr, self.connect_timeout
                ))
            })?
            .map_err(|e| SmartCacheError::BackendUnavailable(format!("memcached at {}: {}", self.addr, e)))?;

        stream.set_nodelay(true)?;
        info!(addr = %self.addr, "Opened memcached connection");
        Ok(BufStream::new(stream))
    }

    /// Sends one request and reads its reply, reconnecting if needed.
    async fn call(&self, request: &[u8], reads_value: bool) -> Result<Reply> {
        let mut guard = self.connection.lock().await;

        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.open().await?,
        };

        let result = exchange(&mut stream, request, reads_value).await;

        match &result {
            Err(e) if e.is_backend_error() => {
                debug!(addr = %self.addr, error = %e, "Dropping memcached connection");
            }
            _ => *guard = Some(stream),
        }

        result
    }

    async fn call_line(&self, request: &[u8]) -> Result<String> {
        match self.call(request, false).await? {
            Reply::Line(line) => Ok(line),
            Reply::Value(_) => Err(SmartCacheError::InternalError("expected a status line".into())),
        }
    }

    async fn add_zero(&self, key: &CacheKey) -> Result<()> {
        let request = format!("add {key} 0 0 1\r\n0\r\n");
        match self.call_line(request.as_bytes()).await?.as_str() {
            "STORED" | "NOT_STORED" => Ok(()),
            other => Err(unexpected("add", other)),
        }
    }

    async fn incr_once(&self, key: &CacheKey) -> Result<Option<u64>> {
        let request = format!("incr {key} 1\r\n");
        let line = self.call_line(request.as_bytes()).await?;
        if line == "NOT_FOUND" {
            return Ok(None);
        }
        line.parse::<u64>()
            .map(Some)
            .map_err(|_| unexpected("incr", &line))
    }
}

async fn exchange(stream: &mut Connection, request: &[u8], reads_value: bool) -> Result<Reply> {
    stream.write_all(request).await?;
    stream.flush().await?;

    if reads_value {
        read_value(stream).await.map(Reply::Value)
    } else {
        read_line(stream).await.map(Reply::Line)
    }
}

/// Reads one `\r\n`-terminated line without its terminator.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(SmartCacheError::BackendUnavailable(
            "memcached closed the connection".into(),
        ));
    }
    if !line.ends_with("\r\n") {
        return Err(SmartCacheError::ProtocolError(format!(
            "unterminated reply line: {line:?}"
        )));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

/// Reads the reply to a single-key `get`.
async fn read_value<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let header = read_line(reader).await?;
    if header == "END" {
        return Ok(None);
    }

    let parts: Vec<&str> = header.split(' ').collect();
    if parts.len() < 4 || parts[0] != "VALUE" {
        return Err(unexpected("get", &header));
    }
    let len: usize = parts[3]
        .parse()
        .map_err(|_| SmartCacheError::ProtocolError(format!("bad value length in {header:?}")))?;
    if len > MEMCACHED_MAX_VALUE_SIZE {
        return Err(SmartCacheError::ProtocolError(format!(
            "value length {len} exceeds {MEMCACHED_MAX_VALUE_SIZE} bytes"
        )));
    }

    let mut data = vec![0u8; len + 2];
    reader.read_exact(&mut data).await?;
    if !data.ends_with(b"\r\n") {
        return Err(SmartCacheError::ProtocolError("value block not terminated".into()));
    }
    data.truncate(len);

    let trailer = read_line(reader).await?;
    if trailer != "END" {
        return Err(unexpected("get", &trailer));
    }

    Ok(Some(data))
}

/// Maps an unexpected reply line to the matching error.
fn unexpected(command: &str, line: &str) -> SmartCacheError {
    if line == "ERROR" || line.starts_with("CLIENT_ERROR") || line.starts_with("SERVER_ERROR") {
        SmartCacheError::backend(BACKEND_NAME, format!("{command}: {line}"))
    } else {
        SmartCacheError::ProtocolError(format!("unexpected reply to {command}: {line:?}"))
    }
}

/// Computes the memcached exptime field for a TTL.
///
/// `None` and zero mean no expiry. Sub-second TTLs round up to one second.
/// TTLs beyond 30 days must be sent as absolute unix timestamps.
fn expiration_for(ttl: Option<Duration>, now_unix: u64) -> u64 {
    let Some(ttl) = ttl else {
        return 0;
    };
    if ttl.is_zero() {
        return 0;
    }

    let mut seconds = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        seconds = seconds.saturating_add(1);
    }

    if seconds > MEMCACHED_MAX_RELATIVE_TTL {
        now_unix.saturating_add(seconds)
    } else {
        seconds
    }
}

#[async_trait]
impl CacheBackend for MemcachedBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let request = format!("get {key}\r\n");
        match self.call(request.as_bytes(), true).await? {
            Reply::Value(value) => Ok(value),
            Reply::Line(_) => Err(SmartCacheError::InternalError("expected a value reply".into())),
        }
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let now = Utc::now().timestamp().max(0) as u64;
        let exptime = expiration_for(ttl, now);

        let mut request = format!("set {key} 0 {exptime} {}\r\n", value.len()).into_bytes();
        request.extend_from_slice(&value);
        request.extend_from_slice(b"\r\n");

        match self.call_line(&request).await?.as_str() {
            "STORED" => Ok(()),
            other => Err(unexpected("set", other)),
        }
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let request = format!("delete {key}\r\n");
        match self.call_line(request.as_bytes()).await?.as_str() {
            "DELETED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            other => Err(unexpected("delete", other)),
        }
    }

    async fn incr(&self, key: &CacheKey) -> Result<u64> {
        if let Some(value) = self.incr_once(key).await? {
            return Ok(value);
        }

        // memcached cannot increment a missing key; seed it, then retry
        self.add_zero(key).await?;
        self.incr_once(key)
            .await?
            .ok_or_else(|| SmartCacheError::backend(BACKEND_NAME, format!("counter {key} vanished")))
    }

    #[instrument(skip(self))]
    async fn purge(&self, prefix: &str) -> Result<()> {
        warn!(addr = %self.addr, "memcached cannot purge by prefix; flushing the whole server");
        match self.call_line(b"flush_all\r\n").await?.as_str() {
            "OK" => Ok(()),
            other => Err(unexpected("flush_all", other)),
        }
    }

    async fn ping(&self) -> Result<()> {
        let line = self.call_line(b"version\r\n").await?;
        if line.starts_with("VERSION") {
            debug!(addr = %self.addr, reply = %line, "memcached ping");
            Ok(())
        } else {
            Err(unexpected("version", &line))
        }
    }
}
