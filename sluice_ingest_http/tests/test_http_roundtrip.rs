use std::time::Duration;

use common::{create_service, example_row, pipe, start_server};
use sluice_ingest_core::{ClientOptions, IngestClient, IngestError, PollPolicy};
use sluice_push_client::HttpIngestService;
use sluice_resources::{ChannelName, ClientName, OffsetToken, Profile, Row};
use sluice_service::{
    AppendRowsRequest, ChannelStatusRequest, DropChannelRequest, ErrorKind, IngestService,
    OpenChannelRequest, OpenChannelStatus, ServiceError,
};

mod common;

fn channel(name: &str) -> ChannelName {
    ChannelName::new(name, pipe()).expect("channel name")
}

fn open_request(name: &str) -> OpenChannelRequest {
    OpenChannelRequest {
        client: ClientName::new("MY_CLIENT").expect("client name"),
        channel: channel(name),
        offset_token: None,
    }
}

#[tokio::test]
async fn test_channel_roundtrip() {
    let service = create_service(Duration::ZERO);
    let (task, url, ct) = start_server(service.clone(), None).await;
    let client = HttpIngestService::new(url);

    let opened = client
        .open_channel(open_request("MY_CHANNEL"))
        .await
        .expect("open_channel");
    assert_eq!(opened.status, OpenChannelStatus::Opened);
    assert_eq!(opened.schema, common::schema());

    let appended = client
        .append_rows(AppendRowsRequest {
            channel: channel("MY_CHANNEL"),
            client_sequencer: opened.client_sequencer,
            batch_sequencer: 0,
            offset_token: OffsetToken::from(2),
            rows: (0..3).map(example_row).collect(),
        })
        .await
        .expect("append_rows");
    assert_eq!(appended.accepted_row_sequencer, 3);
    assert!(!appended.duplicate);

    let status = client
        .channel_status(ChannelStatusRequest {
            channels: vec![channel("MY_CHANNEL")],
        })
        .await
        .expect("channel_status");
    assert_eq!(status.channels.len(), 1);
    assert_eq!(
        status.channels[0].committed.offset_token,
        Some(OffsetToken::from(2))
    );
    assert_eq!(service.committed_rows(&channel("MY_CHANNEL")).len(), 3);

    client
        .drop_channel(DropChannelRequest {
            channel: channel("MY_CHANNEL"),
        })
        .await
        .expect("drop_channel");

    ct.cancel();
    task.await.expect("server task");
}

#[tokio::test]
async fn test_errors_are_preserved() {
    let service = create_service(Duration::ZERO);
    let (task, url, ct) = start_server(service, None).await;
    let client = HttpIngestService::new(url);

    let err = client
        .channel_status(ChannelStatusRequest {
            channels: vec![channel("MISSING")],
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ServiceError::ChannelNotFound {
            channel: channel("MISSING")
        }
    );

    let opened = client
        .open_channel(open_request("MY_CHANNEL"))
        .await
        .expect("open_channel");
    let err = client
        .append_rows(AppendRowsRequest {
            channel: channel("MY_CHANNEL"),
            client_sequencer: opened.client_sequencer,
            batch_sequencer: 0,
            offset_token: OffsetToken::from(0),
            rows: vec![Row::new().with("c1", "not a number")],
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    client
        .open_channel(open_request("MY_CHANNEL"))
        .await
        .expect("reopen channel");
    let err = client
        .append_rows(AppendRowsRequest {
            channel: channel("MY_CHANNEL"),
            client_sequencer: opened.client_sequencer,
            batch_sequencer: 0,
            offset_token: OffsetToken::from(0),
            rows: vec![example_row(0)],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::StaleChannel { .. }));

    ct.cancel();
    task.await.expect("server task");
}

#[tokio::test]
async fn test_bearer_token_is_required() {
    let service = create_service(Duration::ZERO);
    let (task, url, ct) = start_server(service, Some("secret")).await;

    let anonymous = HttpIngestService::new(url.clone());
    let err = anonymous
        .open_channel(open_request("MY_CHANNEL"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized { .. }));
    assert!(!err.is_retryable());

    let wrong = HttpIngestService::from_profile(&Profile::new(url.clone()).with_token("wrong"))
        .expect("client");
    let err = wrong
        .open_channel(open_request("MY_CHANNEL"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized { .. }));

    let authorized = HttpIngestService::from_profile(&Profile::new(url).with_token("secret"))
        .expect("client");
    authorized
        .open_channel(open_request("MY_CHANNEL"))
        .await
        .expect("open_channel");

    ct.cancel();
    task.await.expect("server task");
}

#[tokio::test]
async fn test_ingest_over_http() -> sluice_ingest_core::Result<()> {
    let service = create_service(Duration::from_millis(50));
    let (task, url, ct) = start_server(service.clone(), Some("secret")).await;

    let mut profile = Profile::new(url).with_token("secret");
    profile.max_client_lag_ms = Some(20);

    let options = ClientOptions::default().with_commit_poll_interval(Duration::from_millis(20));
    let client = IngestClient::builder("MY_CLIENT", "MY_DATABASE", "MY_SCHEMA", "MY_PIPE")
        .with_profile(profile)
        .with_options(options)
        .build()?;
    let (channel, status) = client.open_channel("MY_CHANNEL").await?;
    assert_eq!(status, OpenChannelStatus::Opened);

    let num_rows = 100;
    for i in 0..num_rows {
        channel.append_row(example_row(i), OffsetToken::from(i)).await?;
    }

    let committed = channel
        .wait_for_offset_token(
            &OffsetToken::from(num_rows - 1),
            PollPolicy::new(100, Duration::from_millis(50)),
        )
        .await?;
    assert_eq!(committed, "99");

    let err = channel
        .append_row(Row::new().with("unknown", 1), OffsetToken::from(100))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidRow { .. }));

    channel.close().await?;
    client.close().await?;

    let rows = service.committed_rows(channel.name());
    assert_eq!(rows.len(), num_rows as usize);
    assert_eq!(rows[42], example_row(42));

    ct.cancel();
    task.await.expect("server task");

    Ok(())
}
