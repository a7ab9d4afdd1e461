// src/services/renderer.rs

//! Rendered-document capture through an external rendering service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{AppError, Result};
use crate::models::CaptureConfig;

/// External rendering engine.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render a page into a paginated document.
    async fn render(&self, url: &str) -> Result<Vec<u8>>;
}

/// A held rendering slot. Dropping it releases the slot on every exit path,
/// including timeout and cancellation of the owning task.
pub struct RenderSlot {
    _permit: OwnedSemaphorePermit,
}

/// Bounds the number of renders in flight.
#[derive(Clone)]
pub struct RenderSlots {
    semaphore: Arc<Semaphore>,
}

impl RenderSlots {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn acquire(&self) -> Result<RenderSlot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AppError::capture("-", "rendering engine is shut down"))?;
        Ok(RenderSlot { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Refuse new renders; slots already held stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    url: &'a str,
    wait_for_fonts: bool,
    print_background: bool,
}

/// Renders through an HTTP rendering service that answers with PDF bytes.
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    wait_for_fonts: bool,
}

impl HttpRenderer {
    pub fn new(client: reqwest::Client, config: &CaptureConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            wait_for_fonts: config.wait_for_fonts,
        }
    }
}

#[async_trait]
impl DocumentRenderer for HttpRenderer {
    async fn render(&self, url: &str) -> Result<Vec<u8>> {
        let request = RenderRequest {
            url,
            wait_for_fonts: self.wait_for_fonts,
            print_background: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::capture(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::capture(
                url,
                format!("rendering service returned {}", status),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::capture(url, e))?;
        if bytes.is_empty() {
            return Err(AppError::capture(url, "rendering service returned no data"));
        }

        Ok(bytes.to_vec())
    }
}
