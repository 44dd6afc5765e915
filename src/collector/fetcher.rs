use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::config::GeneralSettings;

/// 两次重试之间的等待时间
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// 按 URL 取回原始文本
///
/// 失败、超时、非 200 或空内容都返回 `None`，调用方只需区分“有内容 / 没内容”。
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<String>;
}

pub struct HttpFetcher {
    client: Client,
    attempts: u32,
}

fn create_http_client(user_agent: &str, timeout: Duration) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

impl HttpFetcher {
    pub fn new(settings: &GeneralSettings) -> anyhow::Result<Self> {
        let client = create_http_client(
            &settings.user_agent,
            Duration::from_secs(settings.timeout),
        )?;
        Ok(Self {
            client,
            attempts: settings.retry.max(1),
        })
    }

    async fn fetch_once(&self, url: &str) -> anyhow::Result<Option<String>> {
        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            warn!("请求返回状态码 {}: {}", response.status().as_u16(), url);
            return Ok(None);
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(text))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        for attempt in 1..=self.attempts {
            match self.fetch_once(url).await {
                Ok(Some(text)) => {
                    debug!("获取成功 ({} 字节): {}", text.len(), url);
                    return Some(text);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("获取失败 (第 {}/{} 次): {} ({})", attempt, self.attempts, url, e);
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
        error!("多次尝试后仍无法获取: {}", url);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 对每个连接回复同一个 HTTP 响应
    async fn serve(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/sub", addr)
    }

    /// 第一次请求返回 500，之后返回 200，并统计请求次数
    async fn serve_flaky(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, payload) = if n == 0 {
                    ("500 Internal Server Error", "")
                } else {
                    ("200 OK", body)
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    payload.len(),
                    payload
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/sub", addr), hits)
    }

    fn settings(retry: u32) -> GeneralSettings {
        GeneralSettings {
            timeout: 5,
            retry,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_ok() {
        let url = serve("200 OK", "ss://abc\n").await;
        let fetcher = HttpFetcher::new(&settings(1)).unwrap();
        assert_eq!(fetcher.fetch(&url).await.as_deref(), Some("ss://abc\n"));
    }

    #[tokio::test]
    async fn test_fetch_non_200_and_blank_body() {
        let not_found = serve("404 Not Found", "missing").await;
        let blank = serve("200 OK", "   \n").await;
        let fetcher = HttpFetcher::new(&settings(1)).unwrap();
        assert!(fetcher.fetch(&not_found).await.is_none());
        assert!(fetcher.fetch(&blank).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let fetcher = HttpFetcher::new(&settings(1)).unwrap();
        assert!(fetcher.fetch(&format!("http://{}/", addr)).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_retries_after_server_error() {
        let (url, hits) = serve_flaky("vmess://abc\n").await;
        let fetcher = HttpFetcher::new(&settings(3)).unwrap();

        let start = Instant::now();
        assert_eq!(fetcher.fetch(&url).await.as_deref(), Some("vmess://abc\n"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_all_attempts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let fetcher = HttpFetcher::new(&settings(2)).unwrap();

        let start = Instant::now();
        assert!(fetcher.fetch(&format!("http://{}/", addr)).await.is_none());
        let elapsed = start.elapsed();
        // 两次尝试之间只等待一次
        assert!(elapsed >= RETRY_DELAY);
        assert!(elapsed < RETRY_DELAY * 2);
    }
}
