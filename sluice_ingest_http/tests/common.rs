#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use sluice_ingest_http::HttpIngestServer;
use sluice_resources::{ColumnSchema, ColumnType, PipeName, PipeSchema, Row};
use sluice_service::InMemoryIngestService;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn pipe() -> PipeName {
    PipeName::from_parts("MY_DATABASE", "MY_SCHEMA", "MY_PIPE").expect("pipe name")
}

pub fn schema() -> PipeSchema {
    PipeSchema::new(vec![
        ColumnSchema::new("c1", ColumnType::Integer).not_null(),
        ColumnSchema::new("c2", ColumnType::Text),
    ])
}

pub fn example_row(i: u64) -> Row {
    Row::new().with("c1", i).with("c2", i.to_string())
}

pub fn create_service(commit_delay: Duration) -> Arc<InMemoryIngestService> {
    let service = InMemoryIngestService::new().with_commit_delay(commit_delay);
    service.create_pipe(pipe(), schema()).expect("create_pipe");
    Arc::new(service)
}

/// Starts an HTTP server on a random local port.
pub async fn start_server(
    service: Arc<InMemoryIngestService>,
    token: Option<&str>,
) -> (JoinHandle<()>, String, CancellationToken) {
    let mut server = HttpIngestServer::new(service);
    if let Some(token) = token {
        server = server.with_token(token);
    }

    let listener = sluice_ingest_http::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let address: SocketAddr = listener.local_addr().expect("local address");

    let ct = CancellationToken::new();
    let task = tokio::spawn({
        let ct = ct.clone();
        async move {
            sluice_ingest_http::serve(listener, server.into_router(), ct)
                .await
                .expect("server run");
        }
    });

    (task, format!("http://{address}"), ct)
}
