//! HTTP 存活探测

use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

/// 服务健康端点探测
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// 返回 HTTP 状态码
    async fn status(&self, url: &str) -> Result<u16, ProbeError>;
}

/// 基于 reqwest 的探测器，不跟随重定向（302 本身即视为存活）
#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(request_timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| ProbeError::Request {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn status(&self, url: &str) -> Result<u16, ProbeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(response.status().as_u16())
    }
}
