//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::subscriber::DefaultGuard;

/// Accept connections forever, handing each to `handler` on its own task.
pub async fn start_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move { handler(socket).await });
        }
    });

    addr
}

/// Read an HTTP/1.1 request head (up to and including the blank line).
pub async fn read_request_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.ends_with(b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

fn response_bytes(status: &str, headers: &[(&str, &str)], body: &str) -> Vec<u8> {
    let mut response = format!("HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n", status, body.len());
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("\r\n");
    response.push_str(body);
    response.into_bytes()
}

/// A backend that answers every request with `200 OK` and `body` after `delay`.
pub async fn start_mock_backend(body: &'static str, delay: Duration) -> SocketAddr {
    start_server(move |mut socket| async move {
        read_request_head(&mut socket).await;
        tokio::time::sleep(delay).await;
        let _ = socket.write_all(&response_bytes("200 OK", &[], body)).await;
        let _ = socket.shutdown().await;
    })
    .await
}

/// A backend that records every request head it receives.
pub async fn start_recording_backend() -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let addr = start_server(move |mut socket| {
        let recorder = recorder.clone();
        async move {
            let head = read_request_head(&mut socket).await;
            recorder.lock().unwrap().push(head);
            let _ = socket.write_all(&response_bytes("200 OK", &[], "ok")).await;
            let _ = socket.shutdown().await;
        }
    })
    .await;
    (addr, seen)
}

/// A backend that answers cacheably and counts requests.
pub async fn start_counting_backend(cache_control: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let addr = start_server(move |mut socket| {
        let counter = counter.clone();
        async move {
            read_request_head(&mut socket).await;
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let body = format!("response {}", n);
            let _ = socket
                .write_all(&response_bytes("200 OK", &[("Cache-Control", cache_control)], &body))
                .await;
            let _ = socket.shutdown().await;
        }
    })
    .await;
    (addr, count)
}

/// A backend that reads the request and then never responds.
pub async fn start_silent_backend() -> SocketAddr {
    start_server(|mut socket| async move {
        read_request_head(&mut socket).await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        drop(socket);
    })
    .await
}

/// A backend that accepts connections and never reads or writes.
pub async fn start_mute_backend() -> SocketAddr {
    start_server(|socket| async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        drop(socket);
    })
    .await
}

/// A backend that sends headers and half the body, then stalls.
pub async fn start_stalled_body_backend() -> SocketAddr {
    start_server(|mut socket| async move {
        read_request_head(&mut socket).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\nhello")
            .await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        drop(socket);
    })
    .await
}

/// A backend that writes `first`, waits `gap`, then writes `second`.
pub async fn start_trickle_backend(first: &'static [u8], gap: Duration, second: &'static [u8]) -> SocketAddr {
    start_server(move |mut socket| async move {
        let _ = socket.write_all(first).await;
        tokio::time::sleep(gap).await;
        let _ = socket.write_all(second).await;
        let _ = socket.shutdown().await;
    })
    .await
}

/// A listener whose accept backlog is full, so new connects hang in SYN-SENT.
pub struct SaturatedListener {
    pub addr: SocketAddr,
    _listener: TcpListener,
    _fillers: Vec<TcpStream>,
}

pub async fn start_saturated_listener() -> SaturatedListener {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = socket.local_addr().unwrap();
    let listener = socket.listen(0).unwrap();

    let mut fillers = Vec::new();
    for _ in 0..16 {
        match tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => fillers.push(stream),
            _ => break,
        }
    }

    SaturatedListener {
        addr,
        _listener: listener,
        _fillers: fillers,
    }
}

/// Collects formatted log output emitted on the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's events into the capture until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A minimal memcache server (ASCII get/set/delete).
pub async fn start_fake_memcache() -> (SocketAddr, Arc<Mutex<HashMap<String, Vec<u8>>>>) {
    let data = Arc::new(Mutex::new(HashMap::new()));
    let shared = data.clone();
    let addr = start_server(move |socket| {
        let data = shared.clone();
        async move { serve_memcache(socket, data).await }
    })
    .await;
    (addr, data)
}

async fn serve_memcache(socket: TcpStream, data: Arc<Mutex<HashMap<String, Vec<u8>>>>) {
    let mut reader = BufReader::new(socket);
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let parts: Vec<&str> = line.trim_end().split(' ').collect();
        let reply = match parts.as_slice() {
            ["get", key] => match data.lock().unwrap().get(*key) {
                Some(value) => {
                    let mut reply = format!("VALUE {} 0 {}\r\n", key, value.len()).into_bytes();
                    reply.extend_from_slice(value);
                    reply.extend_from_slice(b"\r\nEND\r\n");
                    reply
                }
                None => b"END\r\n".to_vec(),
            },
            ["set", key, _flags, _exptime, len] => {
                let len: usize = len.parse().unwrap();
                let mut value = vec![0u8; len + 2];
                reader.read_exact(&mut value).await.unwrap();
                value.truncate(len);
                data.lock().unwrap().insert(key.to_string(), value);
                b"STORED\r\n".to_vec()
            }
            ["delete", key] => match data.lock().unwrap().remove(*key) {
                Some(_) => b"DELETED\r\n".to_vec(),
                None => b"NOT_FOUND\r\n".to_vec(),
            },
            _ => b"ERROR\r\n".to_vec(),
        };
        if reader.get_mut().write_all(&reply).await.is_err() {
            return;
        }
    }
}
