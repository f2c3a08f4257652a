use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::scheduler::{BackgroundTask, Context};

use super::StoreInner;

/// Periodically reclaims the space held by tombstoned and expired records.
pub struct CompactionTask {
    inner: Arc<Mutex<StoreInner>>,
    interval: Duration,
}

impl CompactionTask {
    pub(crate) fn new(inner: Arc<Mutex<StoreInner>>, interval: Duration) -> Self {
        Self { inner, interval }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for CompactionTask {
    fn name(&self) -> &'static str {
        "compaction"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.compact()
    }
}
