//! 公共仓库变更流客户端

use std::time::Duration;

use async_trait::async_trait;
use league_shared::config::FeedConfig;
use league_shared::stash::ChangePage;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("变更流限流，{retry_after_secs:?} 秒后重试")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("变更流返回 HTTP {status}")]
    Http { status: u16 },

    #[error("变更流网络错误: {0}")]
    Transport(String),

    #[error("变更流响应解析失败: {0}")]
    Decode(String),
}

impl FeedError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "FEED_RATE_LIMITED",
            Self::Http { .. } => "FEED_HTTP_ERROR",
            Self::Transport(_) => "FEED_TRANSPORT_ERROR",
            Self::Decode(_) => "FEED_DECODE_ERROR",
        }
    }

    /// 本次错误后应等待多久
    pub fn backoff(&self, config: &FeedConfig) -> Duration {
        match self {
            Self::RateLimited { retry_after_secs } => Duration::from_secs(
                retry_after_secs.unwrap_or(config.default_retry_after_seconds),
            ),
            _ => Duration::from_secs(config.error_backoff_seconds),
        }
    }
}

/// 分页变更接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeFeedClient: Send + Sync {
    /// 拉取游标处的一页；`None` 表示从接口当前位置开始
    async fn fetch_page(&self, cursor: Option<String>) -> Result<ChangePage, FeedError>;
}

/// 基于 reqwest 的 HTTP 实现
pub struct HttpChangeFeedClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChangeFeedClient {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/public-stash-tabs", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ChangeFeedClient for HttpChangeFeedClient {
    async fn fetch_page(&self, cursor: Option<String>) -> Result<ChangePage, FeedError> {
        let mut request = self.client.get(&self.endpoint);
        if let Some(cursor) = cursor.as_deref().filter(|c| !c.is_empty()) {
            request = request.query(&[("id", cursor)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FeedError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(FeedError::Http {
                status: status.as_u16(),
            });
        }

        let page: ChangePage = response
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        debug!(
            next_change_id = %page.next_change_id,
            stashes = page.stashes.len(),
            "变更页已拉取"
        );
        Ok(page)
    }
}

/// `Retry-After` 只接受秒数形式
fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after(" 12 "), Some(12));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_backoff() {
        let config = FeedConfig::default();
        let limited = FeedError::RateLimited {
            retry_after_secs: Some(7),
        };
        assert_eq!(limited.backoff(&config), Duration::from_secs(7));

        let limited_default = FeedError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(limited_default.backoff(&config), Duration::from_secs(1));

        let http = FeedError::Http { status: 502 };
        assert_eq!(http.backoff(&config), Duration::from_secs(60));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = FeedConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..FeedConfig::default()
        };
        let client = HttpChangeFeedClient::new(&config).unwrap();
        assert_eq!(client.endpoint, "http://localhost:8080/public-stash-tabs");
    }
}
