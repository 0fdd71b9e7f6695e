use std::{collections::HashMap, sync::Arc, time::Duration};

use sluice_resources::{OffsetToken, Row};
use tokio_util::time::{DelayQueue, delay_queue};

use crate::{
    batch::RowBatch,
    channel::{ChannelId, ChannelInner},
    options::ClientOptions,
};

pub mod metrics;

/// Buffers rows per channel and cuts them into batches.
///
/// A batch is cut when the buffered size reaches the flush size, when it
/// holds the maximum number of rows, or when its lag timer expires. Rows
/// appended together are never split across batches, so every batch ends
/// with an offset token.
pub struct ChannelBatcher {
    channels: HashMap<ChannelId, ChannelBuffer>,
    flush_size: u64,
    max_rows: usize,
    max_lag: Duration,
}

struct ChannelBuffer {
    /// The channel
    channel: Arc<ChannelInner>,
    /// Rows waiting to be uploaded
    rows: Vec<Row>,
    /// Token of the last buffered row
    offset_token: OffsetToken,
    /// The current size of the buffer
    size_bytes: u64,
    /// The timer key for the lag timer
    timer_key: delay_queue::Key,
}

impl ChannelBatcher {
    pub fn new(options: &ClientOptions) -> Self {
        Self {
            channels: HashMap::new(),
            flush_size: options.flush_size.as_u64(),
            max_rows: options.max_batch_rows,
            max_lag: options.max_client_lag,
        }
    }

    /// Buffers rows for the channel, returning the batch to upload if the
    /// buffer is full.
    pub fn write(
        &mut self,
        channel: &Arc<ChannelInner>,
        rows: Vec<Row>,
        offset_token: OffsetToken,
        size_bytes: u64,
        delay_queue: &mut DelayQueue<ChannelId>,
    ) -> Option<RowBatch> {
        let buffer = self.channels.entry(channel.id).or_insert_with(|| {
            let timer_key = delay_queue.insert(channel.id, self.max_lag);
            ChannelBuffer {
                channel: channel.clone(),
                rows: Vec::new(),
                offset_token: offset_token.clone(),
                size_bytes: 0,
                timer_key,
            }
        });

        buffer.rows.extend(rows);
        buffer.offset_token = offset_token;
        buffer.size_bytes += size_bytes;

        if buffer.size_bytes >= self.flush_size || buffer.rows.len() >= self.max_rows {
            return self.take(channel.id);
        }

        None
    }

    /// Removes the channel's buffer, returning its rows as a batch.
    pub fn take(&mut self, id: ChannelId) -> Option<RowBatch> {
        let buffer = self.channels.remove(&id)?;
        Some(RowBatch {
            channel: buffer.channel,
            rows: buffer.rows,
            offset_token: buffer.offset_token,
            size_bytes: buffer.size_bytes,
            timer_key: buffer.timer_key,
        })
    }

    /// Number of rows buffered for all channels.
    pub fn buffered_rows(&self) -> usize {
        self.channels.values().map(|buffer| buffer.rows.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use bytesize::ByteSize;
    use futures::StreamExt;
    use sluice_resources::Row;

    use super::*;
    use crate::test_utils::{channel_inner, example_row};

    fn rows(range: std::ops::Range<u64>) -> (Vec<Row>, u64) {
        let rows = range.map(example_row).collect::<Vec<_>>();
        let size = rows.iter().map(|row| row.encoded_size() as u64).sum();
        (rows, size)
    }

    #[tokio::test]
    async fn test_cut_on_max_rows() {
        let options = ClientOptions::default().with_max_batch_rows(4);
        let mut batcher = ChannelBatcher::new(&options);
        let mut timers = DelayQueue::new();
        let channel = channel_inner(0, "c1");

        let (first, size) = rows(0..3);
        assert!(
            batcher
                .write(&channel, first, OffsetToken::from(2), size, &mut timers)
                .is_none()
        );
        assert_eq!(batcher.buffered_rows(), 3);

        let (second, size) = rows(3..5);
        let batch = batcher
            .write(&channel, second, OffsetToken::from(4), size, &mut timers)
            .expect("batch is full");
        assert_eq!(batch.num_rows(), 5);
        assert_eq!(batch.offset_token, "4");
        assert_eq!(batcher.buffered_rows(), 0);
    }

    #[tokio::test]
    async fn test_cut_on_size() {
        let options = ClientOptions::default().with_flush_size(ByteSize::b(1));
        let mut batcher = ChannelBatcher::new(&options);
        let mut timers = DelayQueue::new();
        let channel = channel_inner(0, "c1");

        let (first, size) = rows(0..1);
        let batch = batcher
            .write(&channel, first, OffsetToken::from(0), size, &mut timers)
            .expect("batch is full");
        assert_eq!(batch.num_rows(), 1);
        assert!(batch.size_bytes > 0);
    }

    #[tokio::test]
    async fn test_channels_are_buffered_separately() {
        tokio::time::pause();

        let options = ClientOptions::default().with_max_client_lag(Duration::from_millis(100));
        let mut batcher = ChannelBatcher::new(&options);
        let mut timers = DelayQueue::new();
        let first_channel = channel_inner(0, "c1");
        let second_channel = channel_inner(1, "c2");

        let (first, size) = rows(0..2);
        batcher.write(&first_channel, first, OffsetToken::from(1), size, &mut timers);
        let (second, size) = rows(0..3);
        batcher.write(&second_channel, second, OffsetToken::from(2), size, &mut timers);
        assert_eq!(batcher.buffered_rows(), 5);
        assert_eq!(timers.len(), 2);

        let expired = timers.next().await.expect("timer expired").into_inner();
        let batch = batcher.take(expired).expect("channel is buffered");
        assert_eq!(batch.channel.id, expired);
        assert_eq!(batcher.buffered_rows(), 5 - batch.num_rows());
    }
}
