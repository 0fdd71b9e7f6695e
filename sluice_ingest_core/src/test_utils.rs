use std::{
    io,
    sync::{Arc, Mutex},
};

use sluice_resources::{ChannelName, ColumnSchema, ColumnType, PipeName, PipeSchema, Row};
use sluice_service::{CommitState, OpenChannelResponse, OpenChannelStatus};
use tracing_subscriber::fmt::MakeWriter;

use crate::channel::{ChannelId, ChannelInner};

pub fn pipe() -> PipeName {
    PipeName::from_parts("MY_DATABASE", "MY_SCHEMA", "MY_PIPE").expect("valid pipe name")
}

/// Returns the schema used by the test rows: `c1` (integer) and `c2` (text).
pub fn schema() -> PipeSchema {
    PipeSchema::new(vec![
        ColumnSchema::new("c1", ColumnType::Integer).not_null(),
        ColumnSchema::new("c2", ColumnType::Text),
    ])
}

pub fn example_row(i: u64) -> Row {
    Row::new().with("c1", i).with("c2", i.to_string())
}

/// Creates the state of a freshly opened channel.
pub fn channel_inner(id: u64, name: &str) -> Arc<ChannelInner> {
    let response = OpenChannelResponse {
        channel: ChannelName::new(name, pipe()).expect("valid channel name"),
        status: OpenChannelStatus::Opened,
        client_sequencer: 0,
        accepted_row_sequencer: 0,
        committed: CommitState::default(),
        schema: schema(),
    };

    Arc::new(ChannelInner::new(ChannelId(id), response))
}

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
