//! Production-line directory with a TTL cache.
//!
//! The full list is fetched once and served from memory until it expires.
//! The cache lock is held across the fetch, so callers arriving while a
//! refresh is in flight wait for it and reuse its result instead of
//! issuing their own request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use linewatch_common::LineType;

use crate::errors::FetchError;
use crate::fetch::{BackendClient, LineEntry};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Where the directory comes from.
#[async_trait]
pub trait LineSource: Send + Sync {
    async fn load_lines(&self) -> Result<Vec<LineEntry>, FetchError>;
}

#[async_trait]
impl LineSource for BackendClient {
    async fn load_lines(&self) -> Result<Vec<LineEntry>, FetchError> {
        self.fetch_lines(None).await
    }
}

struct Cached {
    fetched_at: Instant,
    lines: Arc<Vec<LineEntry>>,
}

pub struct LineDirectory {
    source: Arc<dyn LineSource>,
    ttl: Duration,
    cache: Mutex<Option<Cached>>,
}

impl LineDirectory {
    pub fn new(source: Arc<dyn LineSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Every known line, refreshed when the cache has expired.
    pub async fn all(&self) -> Result<Arc<Vec<LineEntry>>, FetchError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(cached.lines.clone());
        }
        debug!("refreshing line directory");
        let lines = Arc::new(self.source.load_lines().await?);
        *cache = Some(Cached {
            fetched_at: Instant::now(),
            lines: lines.clone(),
        });
        Ok(lines)
    }

    /// Lines of one type, or all of them.
    pub async fn lines(&self, line_type: Option<LineType>) -> Result<Vec<LineEntry>, FetchError> {
        let all = self.all().await?;
        Ok(all
            .iter()
            .filter(|entry| line_type.is_none_or(|t| entry.kind() == t))
            .cloned()
            .collect())
    }

    /// Drop the cached list so the next call refetches.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}
