use std::sync::Arc;

use sluice_service::{AppendRowsRequest, AppendRowsResponse, IngestService, ServiceError};
use tracing::{debug, warn};

use crate::{batcher::metrics::IngestionMetrics, options::RetryPolicy};

/// Uploads batches to the service, retrying temporary failures.
#[derive(Clone)]
pub struct BatchUploader {
    service: Arc<dyn IngestService>,
    retry: RetryPolicy,
    metrics: Arc<IngestionMetrics>,
}

impl BatchUploader {
    pub fn new(
        service: Arc<dyn IngestService>,
        retry: RetryPolicy,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        Self {
            service,
            retry,
            metrics,
        }
    }

    /// Uploads the batch.
    ///
    /// Retrying is safe because the service ignores batch sequencers it
    /// already accepted.
    pub async fn upload(
        &self,
        request: AppendRowsRequest,
    ) -> Result<AppendRowsResponse, ServiceError> {
        let mut attempt = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            match self.service.append_rows(request.clone()).await {
                Ok(response) => {
                    debug!(
                        channel = %request.channel,
                        batch_sequencer = request.batch_sequencer,
                        num_rows = request.rows.len(),
                        accepted_row_sequencer = response.accepted_row_sequencer,
                        duplicate = response.duplicate,
                        "batch uploaded"
                    );
                    return Ok(response);
                }
                Err(error) if error.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        channel = %request.channel,
                        batch_sequencer = request.batch_sequencer,
                        attempt,
                        ?backoff,
                        %error,
                        "batch upload failed, retrying"
                    );
                    self.metrics.upload_retries.add(1, &[]);
                    tokio::time::sleep(backoff).await;
                    backoff = self.retry.next_backoff(backoff);
                }
                Err(error) => return Err(error),
            }
        }
    }
}
