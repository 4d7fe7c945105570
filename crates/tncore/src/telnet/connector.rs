//! TCP 連線建立
//!
//! 名稱解析與連線嘗試都包在同一個逾時之內，呼叫端不會被卡住超過 `limit`。

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// 連線錯誤
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("連線逾時")]
    Timeout,

    #[error("連線失敗: {0}")]
    Io(#[from] io::Error),

    #[error("DNS 解析失敗: {0}")]
    DnsResolutionFailed(String),
}

/// 遠端主機位址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 撥號位址；IPv6 字面值會加上中括號
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

/// 探測主機是否可連線，連上後立即關閉
pub async fn probe(endpoint: &Endpoint, limit: Duration) -> bool {
    match bounded(limit, dial(endpoint)).await {
        Ok(stream) => {
            drop(stream);
            debug!("{} 可連線", endpoint);
            true
        }
        Err(e) => {
            warn!("{} 無法連線: {}", endpoint, e);
            false
        }
    }
}

/// 建立連線並交出 stream 的所有權
pub async fn connect(endpoint: &Endpoint, limit: Duration) -> Result<TcpStream, ConnectError> {
    info!("正在連線到 {}", endpoint);

    let stream = bounded(limit, dial(endpoint)).await?;

    stream.set_nodelay(true)?;

    info!("已連線到 {}", endpoint);
    Ok(stream)
}

/// 名稱解析與連線共用同一個期限
async fn bounded<T, F>(limit: Duration, attempt: F) -> Result<T, ConnectError>
where
    F: Future<Output = Result<T, ConnectError>>,
{
    timeout(limit, attempt).await.map_err(|_| ConnectError::Timeout)?
}

async fn dial(endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
    let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host(endpoint.addr())
        .await
        .map_err(|e| ConnectError::DnsResolutionFailed(e.to_string()))?
        .collect();

    if socket_addrs.is_empty() {
        return Err(ConnectError::DnsResolutionFailed(format!(
            "無法解析主機: {}",
            endpoint.host()
        )));
    }

    debug!("已解析到位址: {:?}", socket_addrs);

    let mut last_error = None;
    for addr in socket_addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("{} 連線失敗: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(ConnectError::Io(e)),
        None => Err(ConnectError::DnsResolutionFailed(endpoint.host().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    async fn local_listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Endpoint::new("127.0.0.1", port))
    }

    #[test]
    fn test_endpoint_addr() {
        assert_eq!(Endpoint::new("10.0.0.1", 23).addr(), "10.0.0.1:23");
        assert_eq!(Endpoint::new("::1", 2323).addr(), "[::1]:2323");
        assert_eq!(Endpoint::new("router.lan", 23).to_string(), "router.lan:23");
    }

    #[tokio::test]
    async fn test_probe_open_port_leaves_no_connection() {
        let (listener, endpoint) = local_listener().await;

        assert!(probe(&endpoint, Duration::from_secs(2)).await);

        // 探測端已關閉，伺服器側應讀到 EOF
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_probe_refused_port() {
        let (listener, endpoint) = local_listener().await;
        drop(listener);

        let limit = Duration::from_secs(2);
        let started = Instant::now();
        assert!(!probe(&endpoint, limit).await);
        assert!(started.elapsed() < limit + Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_dial_bounded_by_timeout() {
        // 永遠不完成的連線嘗試，只能以逾時結束
        let limit = Duration::from_millis(300);
        let started = Instant::now();
        let result =
            bounded(limit, std::future::pending::<Result<TcpStream, ConnectError>>()).await;
        assert!(matches!(result, Err(ConnectError::Timeout)));
        assert!(started.elapsed() >= limit);
        assert!(started.elapsed() < limit + Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_connect_returns_stream() {
        let (listener, endpoint) = local_listener().await;
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let stream = connect(&endpoint, Duration::from_secs(2)).await.unwrap();
        assert!(stream.nodelay().unwrap());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, endpoint) = local_listener().await;
        drop(listener);

        let result = connect(&endpoint, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ConnectError::Io(_))));
    }

    #[tokio::test]
    async fn test_connect_unresolvable_host() {
        let endpoint = Endpoint::new("no-such-host.invalid", 23);
        let result = connect(&endpoint, Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(ConnectError::DnsResolutionFailed(_)) | Err(ConnectError::Timeout)
        ));
    }
}
