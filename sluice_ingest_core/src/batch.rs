use std::sync::Arc;

use sluice_resources::{OffsetToken, Row};
use sluice_service::AppendRowsRequest;
use tokio::sync::oneshot;
use tokio_util::time::delay_queue;

use crate::{channel::ChannelInner, error::Result};

/// Rows of one channel uploaded together.
#[derive(Debug)]
pub struct RowBatch {
    pub channel: Arc<ChannelInner>,
    pub rows: Vec<Row>,
    /// Offset token of the last row.
    pub offset_token: OffsetToken,
    pub size_bytes: u64,
    /// The timer key for the max client lag timer.
    pub timer_key: delay_queue::Key,
}

pub type FlushReplySender = oneshot::Sender<Result<()>>;

impl RowBatch {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn into_request(self, batch_sequencer: u64) -> AppendRowsRequest {
        AppendRowsRequest {
            channel: self.channel.name.clone(),
            client_sequencer: self.channel.client_sequencer,
            batch_sequencer,
            offset_token: self.offset_token,
            rows: self.rows,
        }
    }
}
