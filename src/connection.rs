//! Per-client connection handler: the core data-plane state machine.
//!
//! Grounded in `original_source/SocketHandler.py::handleRequest`,
//! generalized per the REDESIGN FLAGS: requests are read until the header
//! block is complete (and, when declared, the body too) rather than a
//! single 8192-byte buffer (grounded in the teacher's `main_backup.rs`
//! read-until-`\r\n\r\n` loop); the upstream socket is reused across
//! requests to the same destination, narrowed from `connection_pool.rs`'s
//! per-host pool down to the single active upstream a sequential
//! connection needs.

use crate::cache::{CacheEngine, FetchResult};
use crate::denylist::Denylist;
use crate::error::ProxyError;
use crate::key::{Encoding, ResourceKey};
use crate::message::{KeepAliveParam, Request, Response};
use crate::timer::{self, TimerSink};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const BUFFER_SIZE: usize = 8192;
const DEFAULT_KEEP_ALIVE_TIMEOUT_SECS: u64 = 20;
const DEFAULT_KEEP_ALIVE_MAX: u32 = 100;
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TICK: Duration = Duration::from_secs(1);
const MAX_IDLE_TICKS: u32 = 3;

/// Shared with the per-response timer so a late callback from a
/// superseded epoch is a no-op, per spec's timer-epoch invalidation rule.
struct SharedState {
    timer_epoch: AtomicU64,
    timed_out: AtomicBool,
}

impl TimerSink for SharedState {
    fn mark_timed_out(&self, epoch: u64) {
        if self.timer_epoch.load(Ordering::SeqCst) == epoch {
            self.timed_out.store(true, Ordering::SeqCst);
        }
    }
}

pub struct Connection {
    client: TcpStream,
    engine: CacheEngine,
    denylist: Arc<Denylist>,
    shutdown: watch::Receiver<bool>,
    shared: Arc<SharedState>,
    upstream: Option<(TcpStream, SocketAddr)>,
    remaining_transmissions: u32,
    is_first_response: bool,
    /// Set when an origin round trip fails and a synthesized 404/504 was
    /// sent in its place; spec's error table requires closing rather than
    /// continuing keep-alive accounting on that path.
    close_after_response: bool,
}

impl Connection {
    pub fn new(
        client: TcpStream,
        engine: CacheEngine,
        denylist: Arc<Denylist>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            engine,
            denylist,
            shutdown,
            shared: Arc::new(SharedState {
                timer_epoch: AtomicU64::new(0),
                timed_out: AtomicBool::new(false),
            }),
            upstream: None,
            remaining_transmissions: DEFAULT_KEEP_ALIVE_MAX,
            is_first_response: true,
            close_after_response: false,
        }
    }

    /// Runs `ReadRequest -> (Denied | Tunnel | ServeHTTP) -> AccountKeepAlive
    /// -> (ReadRequest | Close)` until the client disconnects, a request
    /// asks to close, the keep-alive budget is spent, or the timer fires.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let raw_request = match self.read_request().await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "closing connection: request read failed");
                    break;
                }
            };
            let request = match Request::parse(&raw_request) {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, "closing connection: request parse failed");
                    break;
                }
            };

            let Some((host, port)) = request.host_and_port() else {
                self.reply_raw(&Response::synthesize_404(&request).to_bytes()).await;
                break;
            };

            if self.denylist.is_blocked(&host).await {
                self.reply_raw(&Response::synthesize_404(&request).to_bytes()).await;
                break;
            }

            if request.is_connect() {
                self.tunnel(&host, port).await;
                break;
            }

            let response = self.serve(&request, &host, port).await;
            if self.close_after_response || !self.account_keep_alive(&response, &request) {
                break;
            }
        }
    }

    /// Reads bytes until the header block is complete and, if
    /// `Content-Length` was declared, until the body is too. Returns
    /// `Ok(None)` when the client closed before sending anything.
    async fn read_request(&mut self) -> Result<Option<Vec<u8>>, ProxyError> {
        let mut buf = Vec::with_capacity(BUFFER_SIZE);
        let mut scratch = [0u8; BUFFER_SIZE];
        loop {
            let n = self
                .client
                .read(&mut scratch)
                .await
                .map_err(|_| ProxyError::ConnectionReset)?;
            if n == 0 {
                return Ok(if buf.is_empty() { None } else { Some(buf) });
            }
            buf.extend_from_slice(&scratch[..n]);
            if let Some(header_end) = find_crlfcrlf(&buf) {
                let declared = content_length_hint(&buf[..header_end]);
                if buf.len() - header_end >= declared {
                    return Ok(Some(buf));
                }
            }
        }
    }

    async fn reply_raw(&mut self, bytes: &[u8]) {
        if let Err(e) = self.client.write_all(bytes).await {
            debug!(error = %e, "write to client failed");
        }
    }

    async fn tunnel(&mut self, host: &str, port: u16) {
        match tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
            Ok(Ok(mut upstream)) => {
                if self
                    .client
                    .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                    .await
                    .is_err()
                {
                    return;
                }
                match tokio::io::copy_bidirectional(&mut self.client, &mut upstream).await {
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "tunnel ended"),
                }
            }
            _ => {
                warn!(host, port, "tunnel upstream connect failed");
            }
        }
    }

    /// Decision tree for GET requests; everything else bypasses the cache.
    async fn serve(&mut self, request: &Request, host: &str, port: u16) -> Response {
        if !request.is_get() {
            return self.forward_without_cache(request, host, port).await;
        }
        let Some(key) = ResourceKey::new(host, request.file_path()) else {
            return self.forward_without_cache(request, host, port).await;
        };

        let fetch = self
            .engine
            .fetch(&key, request.accept_encoding())
            .await
            .unwrap_or(FetchResult::Miss);

        match fetch {
            FetchResult::Miss | FetchResult::Corrupt => {
                self.fetch_miss(request, host, port, &key).await
            }
            FetchResult::Hit { chunks, expiry } => {
                let cached = match Response::parse(&chunks[0]) {
                    Ok(r) => r,
                    Err(_) => return self.fetch_miss(request, host, port, &key).await,
                };

                if request.if_modified_since().is_some() {
                    return self
                        .revalidate(request, host, port, &key, Some((cached, chunks)))
                        .await;
                }
                if expiry.is_future() {
                    self.write_chunks(&chunks).await;
                    return cached;
                }
                let mut forwarded = request.clone();
                if let Some(date) = cached.date() {
                    forwarded.set_if_modified_since(&date);
                }
                self.revalidate(&forwarded, host, port, &key, Some((cached, chunks)))
                    .await
            }
        }
    }

    async fn fetch_miss(
        &mut self,
        request: &Request,
        host: &str,
        port: u16,
        key: &ResourceKey,
    ) -> Response {
        let (response, first, rest) = match self.origin_round_trip(request, host, port).await {
            Ok(triple) => triple,
            Err(e) => return self.synthesize_and_send_504(request, e).await,
        };
        if matches!(response.status(), 200 | 206) {
            self.store_response(key, &response, &first, &rest).await;
        }
        self.write_raw(&first, &rest).await;
        response
    }

    async fn revalidate(
        &mut self,
        request: &Request,
        host: &str,
        port: u16,
        key: &ResourceKey,
        substitute: Option<(Response, Vec<Bytes>)>,
    ) -> Response {
        let (response, first, rest) = match self.origin_round_trip(request, host, port).await {
            Ok(triple) => triple,
            Err(e) => return self.synthesize_and_send_504(request, e).await,
        };
        match response.status() {
            200 => {
                self.store_response(key, &response, &first, &rest).await;
                self.write_raw(&first, &rest).await;
                response
            }
            304 => {
                if let Some((mut sub_response, sub_chunks)) = substitute {
                    // The origin's 304 carries the current Date; the cached
                    // body is stale on that one header, so stamp it before
                    // replaying the body to the client. Only the first chunk
                    // holds the headers (and any body bytes read alongside
                    // them), so it alone is reserialized; later chunks are
                    // raw body continuation and go out unchanged.
                    if let Some(date) = response.date() {
                        sub_response.set_date(&date);
                    }
                    let mut to_send = vec![Bytes::from(sub_response.to_bytes())];
                    to_send.extend(sub_chunks.into_iter().skip(1));
                    self.write_chunks(&to_send).await;
                    sub_response
                } else {
                    self.write_raw(&first, &rest).await;
                    response
                }
            }
            404 => {
                self.engine.spawn_delete(key.clone()).await;
                self.write_raw(&first, &rest).await;
                response
            }
            _ => {
                self.write_raw(&first, &rest).await;
                response
            }
        }
    }

    async fn forward_without_cache(&mut self, request: &Request, host: &str, port: u16) -> Response {
        match self.origin_round_trip(request, host, port).await {
            Ok((response, first, rest)) => {
                self.write_raw(&first, &rest).await;
                response
            }
            Err(e) => self.synthesize_and_send_504(request, e).await,
        }
    }

    async fn synthesize_and_send_504(&mut self, request: &Request, error: ProxyError) -> Response {
        debug!(error = %error, "origin round trip failed");
        let response = match error {
            ProxyError::DnsFailure { .. } => Response::synthesize_404(request),
            _ => Response::synthesize_504(request),
        };
        self.reply_raw(&response.to_bytes()).await;
        self.close_after_response = true;
        response
    }

    async fn store_response(
        &self,
        key: &ResourceKey,
        response: &Response,
        first: &Bytes,
        rest: &[Bytes],
    ) {
        let mut chunks = Vec::with_capacity(1 + rest.len());
        chunks.push(first.clone());
        chunks.extend(rest.iter().cloned());
        let encoding = Encoding::from_header(response.content_encoding());
        self.engine
            .spawn_store(
                key.clone(),
                encoding,
                response.cache_control_tokens(),
                response.date(),
                chunks,
            )
            .await;
    }

    async fn write_raw(&mut self, first: &Bytes, rest: &[Bytes]) {
        if let Err(e) = self.client.write_all(first).await {
            debug!(error = %e, "write to client failed");
            return;
        }
        for chunk in rest {
            if let Err(e) = self.client.write_all(chunk).await {
                debug!(error = %e, "write to client failed");
                return;
            }
        }
    }

    async fn write_chunks(&mut self, chunks: &[Bytes]) {
        for chunk in chunks {
            if let Err(e) = self.client.write_all(chunk).await {
                debug!(error = %e, "write to client failed");
                return;
            }
        }
    }

    /// Connects (or reuses) the upstream socket, sends `request`, and
    /// reads the response: one buffer normally, or a chunked-assembly
    /// loop when the response is chunked, `206`, or shorter than its
    /// declared `Content-Length`.
    async fn origin_round_trip(
        &mut self,
        request: &Request,
        host: &str,
        port: u16,
    ) -> Result<(Response, Bytes, Vec<Bytes>), ProxyError> {
        self.ensure_upstream(host, port).await?;
        let (stream, _) = self.upstream.as_mut().expect("just ensured");
        stream
            .write_all(&request.to_bytes())
            .await
            .map_err(|_| ProxyError::ConnectionReset)?;

        let mut first_buf = vec![0u8; BUFFER_SIZE];
        let n = stream
            .read(&mut first_buf)
            .await
            .map_err(|_| ProxyError::ConnectionReset)?;
        if n == 0 {
            self.upstream = None;
            return Err(ProxyError::ConnectionReset);
        }
        first_buf.truncate(n);
        let response = Response::parse(&first_buf)?;

        let content_length = response
            .header("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok());
        let needs_more = response.is_chunked()
            || response.status() == 206
            || content_length
                .map(|want| response.body().len() < want)
                .unwrap_or(false);

        let mut extra = Vec::new();
        if needs_more {
            let mut total_body = response.body().len();
            let mut idle_ticks = 0u32;
            loop {
                if response.is_chunked() {
                    let tail: &[u8] = extra
                        .last()
                        .map(|c: &Bytes| c.as_ref())
                        .unwrap_or_else(|| response.body());
                    if tail.ends_with(b"0\r\n\r\n") {
                        break;
                    }
                } else if let Some(want) = content_length {
                    if total_body >= want {
                        break;
                    }
                } else {
                    break;
                }

                let mut buf = vec![0u8; BUFFER_SIZE];
                let (stream, _) = self.upstream.as_mut().expect("still connected");
                match tokio::time::timeout(IDLE_TICK, stream.read(&mut buf)).await {
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => {
                        buf.truncate(n);
                        total_body += n;
                        idle_ticks = 0;
                        extra.push(Bytes::from(buf));
                    }
                    Ok(Err(_)) => break,
                    Err(_) => {
                        idle_ticks += 1;
                        if idle_ticks >= MAX_IDLE_TICKS {
                            break;
                        }
                    }
                }
            }
        }

        Ok((response, Bytes::from(first_buf), extra))
    }

    async fn ensure_upstream(&mut self, host: &str, port: u16) -> Result<(), ProxyError> {
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| ProxyError::DnsFailure { host: host.to_string() })?;
        let addr = addrs
            .next()
            .ok_or_else(|| ProxyError::DnsFailure { host: host.to_string() })?;

        if let Some((_, existing)) = &self.upstream {
            if *existing == addr {
                return Ok(());
            }
        }
        // A new upstream socket invalidates any in-flight timer from the
        // old one: bump the epoch before connecting.
        self.shared.timer_epoch.fetch_add(1, Ordering::SeqCst);

        let stream = tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProxyError::UpstreamConnectTimeout {
                host: host.to_string(),
                port,
            })?
            .map_err(|_| ProxyError::UpstreamConnectTimeout {
                host: host.to_string(),
                port,
            })?;
        self.upstream = Some((stream, addr));
        Ok(())
    }

    /// Starts the next inactivity timer, applies first-response keep-alive
    /// defaults, and decrements the transmission budget. Returns whether
    /// another request should be read on this connection.
    fn account_keep_alive(&mut self, response: &Response, request: &Request) -> bool {
        let epoch = self.shared.timer_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let timeout_secs = response
            .keep_alive_param(KeepAliveParam::Timeout)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_KEEP_ALIVE_TIMEOUT_SECS);
        timer::spawn(epoch, timeout_secs, self.shared.clone(), self.shutdown.clone());

        if self.is_first_response {
            self.remaining_transmissions = response
                .keep_alive_param(KeepAliveParam::Max)
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_KEEP_ALIVE_MAX);
            self.is_first_response = false;
        }

        if request.connection().eq_ignore_ascii_case("close") {
            return false;
        }

        self.remaining_transmissions = self.remaining_transmissions.saturating_sub(1);
        if self.remaining_transmissions == 0 || self.shared.timed_out.load(Ordering::SeqCst) {
            return false;
        }
        true
    }
}

fn find_crlfcrlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn content_length_hint(header_bytes: &[u8]) -> usize {
    let text = String::from_utf8_lossy(header_bytes);
    for line in text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                return value.trim().parse().unwrap_or(0);
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_header_boundary() {
        let buf = b"GET / HTTP/1.1\r\nHost: h\r\n\r\nbody";
        let end = find_crlfcrlf(buf).unwrap();
        assert_eq!(&buf[end..], b"body");
    }

    #[test]
    fn missing_boundary_returns_none() {
        assert!(find_crlfcrlf(b"GET / HTTP/1.1\r\nHost: h").is_none());
    }

    #[test]
    fn content_length_hint_is_case_insensitive() {
        let headers = b"POST / HTTP/1.1\r\nContent-Length: 42\r\n";
        assert_eq!(content_length_hint(headers), 42);
    }

    #[test]
    fn content_length_hint_defaults_to_zero() {
        let headers = b"GET / HTTP/1.1\r\nHost: h\r\n";
        assert_eq!(content_length_hint(headers), 0);
    }

    #[test]
    fn shared_state_ignores_stale_epoch() {
        let shared = SharedState {
            timer_epoch: AtomicU64::new(5),
            timed_out: AtomicBool::new(false),
        };
        shared.mark_timed_out(4);
        assert!(!shared.timed_out.load(Ordering::SeqCst));
        shared.mark_timed_out(5);
        assert!(shared.timed_out.load(Ordering::SeqCst));
    }
}
