use sluice_observability::Counter;

pub struct IngestionMetrics {
    pub appended_rows: Counter<u64>,
    pub rejected_rows: Counter<u64>,
    pub uploaded_batches: Counter<u64>,
    pub uploaded_bytes: Counter<u64>,
    pub upload_retries: Counter<u64>,
}

impl Default for IngestionMetrics {
    fn default() -> Self {
        let meter = sluice_observability::meter("ingestion");
        Self {
            appended_rows: meter
                .u64_counter("client.channel.appended_rows")
                .with_unit("{row}")
                .with_description("number of rows appended to channels")
                .build(),
            rejected_rows: meter
                .u64_counter("client.channel.rejected_rows")
                .with_unit("{row}")
                .with_description("number of rows rejected by schema validation")
                .build(),
            uploaded_batches: meter
                .u64_counter("client.upload.batches")
                .with_unit("{batch}")
                .with_description("number of batches accepted by the service")
                .build(),
            uploaded_bytes: meter
                .u64_counter("client.upload.bytes")
                .with_unit("By")
                .with_description("bytes of row data accepted by the service")
                .build(),
            upload_retries: meter
                .u64_counter("client.upload.retries")
                .with_unit("{retry}")
                .with_description("number of retried batch uploads")
                .build(),
        }
    }
}
