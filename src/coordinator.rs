//! LoadCoordinator: owns the lifecycle of one load — init, idempotency
//! guard, streaming, batch commit, retry, and finalize (spec §4.8).

use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncBufRead;

use crate::audit::{AuditEntry, AuditStore, LoadStatus};
use crate::batch::{BatchBuffer, BatchHandle};
use crate::config::IngestConfig;
use crate::copyenc::ColumnPlan;
use crate::decompose::decompose;
use crate::error::{IngestError, IngestReport};
use crate::header::HeaderModel;
use crate::normalize::normalize;
use crate::progress::ProgressTracker;
use crate::reader::RecordReader;
use crate::refprovider::ReferenceProvider;
use crate::rowbuild::{build_row, fingerprint};

/// One database connection plus the write half of its COPY stream, as
/// acquired from the pool for the duration of exactly one batch (spec §5:
/// "Retries use per-attempt acquisition (no connection is held across
/// sleep)").
#[async_trait::async_trait]
pub trait BatchSink: Send + Sync {
    /// Streams `rows` to the database using `plan`'s column order.
    /// [`commit_batch`] retries only `IngestError::TransientDb` up to
    /// `retry_max_attempts`; every other variant (in particular
    /// `PermanentDb`, for schema mismatches and constraint violations)
    /// propagates immediately and aborts the shard. Implementations must
    /// return `TransientDb` for connection/pool failures and `PermanentDb`
    /// for errors a retry cannot fix.
    async fn write_batch(
        &self,
        rows: &[crate::rowbuild::TableRow],
        plan: &ColumnPlan,
    ) -> Result<(), IngestError>;
}

/// The final tally handed back to the caller after a load completes.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub rows_committed: u64,
    pub report: IngestReport,
}

/// Exponential backoff with a fixed base, no jitter (spec §4.8 step 5:
/// "bounded exponential backoff up to a configured cap").
fn backoff_delay(attempt: u32, base_ms: u64) -> std::time::Duration {
    let factor = 2u64.saturating_pow(attempt.min(16));
    std::time::Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Assigns a chromosome to one of `shard_count` disjoint partitions (spec
/// §5: "sharding the input into disjoint pipelines keyed by chromosome").
/// The same chromosome always maps to the same shard for the lifetime of
/// one process, which is all §5's ordering/disjointness guarantees require.
fn shard_for(chrom: &str, shard_count: usize) -> usize {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    chrom.hash(&mut hasher);
    (hasher.finish() % shard_count as u64) as usize
}

/// Writes one sealed batch, retrying only `IngestError::TransientDb`
/// failures with bounded exponential backoff (spec §4.8 step 5, §5
/// "per-attempt acquisition"). Any other error — in particular
/// `PermanentDb` — propagates immediately without consuming a retry. A
/// free function (rather than a `&self` method) so each shard worker can
/// run it as its own `tokio::task::spawn` task against an `Arc`-shared
/// sink and column plan (spec §5: "Each shard owns its own ... database
/// connection").
async fn commit_batch<S: BatchSink>(
    sink: Arc<S>,
    plan: Arc<ColumnPlan>,
    retry_max_attempts: u32,
    retry_backoff_base_ms: u64,
    batch: BatchHandle,
) -> Result<u64, (IngestError, u64)> {
    let row_count = batch.row_count() as u64;
    let failed_offset = batch.source_offset_end;
    let mut attempt = 0u32;
    loop {
        match sink.write_batch(&batch.rows, &plan).await {
            Ok(()) => return Ok(row_count),
            Err(err @ IngestError::TransientDb(_)) => {
                if attempt >= retry_max_attempts {
                    return Err((err, failed_offset));
                }
                let delay = backoff_delay(attempt, retry_backoff_base_ms);
                tracing::warn!(attempt, ?delay, error = %err, "transient batch write failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(error = %err, "permanent batch write failure, aborting");
                return Err((err, failed_offset));
            }
        }
    }
}

/// Awaits one shard worker's `JoinHandle`, folding a task panic into the
/// same fatal-error shape a write failure would produce.
async fn join_shard(
    handle: tokio::task::JoinHandle<Result<u64, (IngestError, u64)>>,
) -> Result<u64, (IngestError, u64)> {
    match handle.await {
        Ok(result) => result,
        Err(join_err) => Err((
            IngestError::PermanentDb(format!("shard worker task panicked: {join_err}")),
            0,
        )),
    }
}

/// Drives one load end to end: parse → decompose → normalize → build →
/// batch → encode, wrapped with the audit contract and retry policy.
pub struct LoadCoordinator<S: BatchSink, A: AuditStore> {
    config: IngestConfig,
    sink: Arc<S>,
    audit: A,
    header: Arc<HeaderModel>,
    plan: Arc<ColumnPlan>,
}

impl<S: BatchSink + 'static, A: AuditStore> LoadCoordinator<S, A> {
    pub fn new(config: IngestConfig, sink: S, audit: A, header: HeaderModel) -> Self {
        let header = Arc::new(header);
        let plan = Arc::new(ColumnPlan::from_header(&header));
        Self {
            config,
            sink: Arc::new(sink),
            audit,
            header,
            plan,
        }
    }

    /// Spawns one shard worker committing `batch`, sharing this load's sink
    /// and column plan via `Arc` clones rather than borrowing `&self`
    /// (required for `tokio::task::spawn`'s `'static` future bound).
    fn spawn_commit(&self, batch: BatchHandle) -> tokio::task::JoinHandle<Result<u64, (IngestError, u64)>> {
        let sink = Arc::clone(&self.sink);
        let plan = Arc::clone(&self.plan);
        let retry_max_attempts = self.config.retry_max_attempts;
        let retry_backoff_base_ms = self.config.retry_backoff_base_ms;
        tokio::task::spawn(commit_batch(sink, plan, retry_max_attempts, retry_backoff_base_ms, batch))
    }

    /// Runs the full load of `source_path`'s record body (the header must
    /// already have been consumed from `reader`) against `provider` for
    /// reference-assisted normalization.
    pub async fn run<R: AsyncBufRead + Unpin>(
        &self,
        reader: R,
        source_path: &str,
        source_fingerprint: &str,
        provider: &dyn ReferenceProvider,
    ) -> Result<LoadSummary, IngestError> {
        self.config
            .validate()
            .map_err(IngestError::PermanentDb)?;

        // Step 2: idempotency guard.
        if !self.config.force {
            if let Some(prior) = self
                .audit
                .find_completed_by_fingerprint(source_fingerprint)
                .await?
            {
                tracing::warn!(
                    source_path,
                    prior_batch_id = %prior.batch_id,
                    "source already loaded, refusing without force"
                );
                return Err(IngestError::AlreadyLoaded {
                    fingerprint: source_fingerprint.to_string(),
                });
            }
        }

        // Step 1: init, record Started.
        let audit_batch_id = uuid::Uuid::new_v4();
        let started = AuditEntry {
            batch_id: audit_batch_id,
            source_path: source_path.to_string(),
            source_fingerprint: source_fingerprint.to_string(),
            row_count: 0,
            status: LoadStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            failed_offset: None,
        };
        self.audit.insert_started(&started).await?;
        tracing::info!(source_path, batch_id = %audit_batch_id, "load started");

        let mut progress = ProgressTracker::new(std::time::Duration::from_secs(
            self.config.progress_log_interval_secs.max(1),
        ));
        match self.stream(reader, audit_batch_id, provider, &mut progress).await {
            Ok(summary) => {
                self.audit
                    .mark_completed(audit_batch_id, summary.rows_committed as i64, Utc::now())
                    .await?;
                progress.finish(&summary.report);
                tracing::info!(
                    source_path,
                    batch_id = %audit_batch_id,
                    rows = summary.rows_committed,
                    malformed = summary.report.malformed_records,
                    coercion_failures = summary.report.coercion_failures,
                    cardinality_mismatches = summary.report.array_cardinality_mismatches,
                    "load completed"
                );
                Ok(summary)
            }
            Err((err, failed_offset)) => {
                self.audit.mark_failed(audit_batch_id, failed_offset).await?;
                tracing::error!(source_path, batch_id = %audit_batch_id, failed_offset, error = %err, "load failed");
                Err(err)
            }
        }
    }

    /// Drives the parse-normalize-build front end on one cooperative,
    /// single-threaded stream (spec §5: decode/normalize/encode would
    /// contend for the same byte buffer if parallelized naively), then
    /// routes each row's batch to its chromosome-keyed shard. Shards commit
    /// concurrently as independent `tokio::task::spawn` tasks; within a
    /// shard, commits are awaited in order before the next is spawned, so
    /// per-shard input ordering (spec §5) is preserved while cross-shard
    /// commits overlap.
    async fn stream<R: AsyncBufRead + Unpin>(
        &self,
        reader: R,
        audit_batch_id: uuid::Uuid,
        provider: &dyn ReferenceProvider,
        progress: &mut ProgressTracker,
    ) -> Result<LoadSummary, (IngestError, u64)> {
        let mut record_reader = RecordReader::new(reader);
        let shard_count = self.config.shard_count.max(1);
        let mut buffers: Vec<BatchBuffer> = (0..shard_count)
            .map(|_| BatchBuffer::new(self.config.batch_size))
            .collect();
        let mut inflight: Vec<Option<tokio::task::JoinHandle<Result<u64, (IngestError, u64)>>>> =
            (0..shard_count).map(|_| None).collect();
        let mut rows_committed: u64 = 0;
        let mut report = IngestReport::default();
        let mut last_line_no: u64 = 0;

        loop {
            let next = record_reader
                .next_record()
                .await
                .map_err(|e| (e, last_line_no))?;
            let Some(raw) = next else { break };
            last_line_no = raw.line_no;

            let biallelic_rows = decompose(raw, &self.header, &mut report);
            for row in biallelic_rows {
                let line_no = row.line_no;
                let normalized = normalize(row, self.config.normalize_mode, provider)
                    .map_err(|e| (e, line_no))?;
                let table_row = build_row(normalized, self.config.chromosome_mode, audit_batch_id)
                    .map_err(|e| (e, line_no))?;
                let shard = shard_for(&table_row.chrom, shard_count);
                if let Some(sealed) = buffers[shard].push(table_row, line_no) {
                    if let Some(prev) = inflight[shard].take() {
                        let committed = join_shard(prev).await?;
                        rows_committed += committed;
                        progress.record_rows(committed);
                    }
                    inflight[shard] = Some(self.spawn_commit(sealed));
                }
            }
        }

        for shard in 0..shard_count {
            if !buffers[shard].is_empty() {
                let sealed = buffers[shard].seal();
                if let Some(prev) = inflight[shard].take() {
                    let committed = join_shard(prev).await?;
                    rows_committed += committed;
                    progress.record_rows(committed);
                }
                inflight[shard] = Some(self.spawn_commit(sealed));
            }
        }

        for handle in inflight.into_iter().flatten() {
            let committed = join_shard(handle).await?;
            rows_committed += committed;
            progress.record_rows(committed);
        }

        report.merge(&record_reader.report);
        report.rows_emitted = rows_committed;
        Ok(LoadSummary {
            rows_committed,
            report,
        })
    }
}

/// Computes the content fingerprint for an entire source file from its
/// header fileformat and sample list — a coarse but cheap proxy used only
/// to key the idempotency guard (spec §4.8 step 2). Callers that need a
/// content-addressed fingerprint of the full byte stream should hash the
/// file directly instead; this helper exists for the common case where the
/// header alone already identifies a distinct submission.
pub fn source_fingerprint(header: &HeaderModel, source_path: &str) -> String {
    let sample_key = header.sample_names.join(",");
    fingerprint(source_path, 0, &sample_key, header.fileformat.as_deref().unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::fake::InMemoryAuditStore;
    use crate::rowbuild::TableRow;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait::async_trait]
    impl BatchSink for CountingSink {
        async fn write_batch(&self, _rows: &[TableRow], _plan: &ColumnPlan) -> Result<(), IngestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n {
                return Err(IngestError::TransientDb("simulated transient failure".into()));
            }
            Ok(())
        }
    }

    fn header() -> HeaderModel {
        let text = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";
        let mut cursor = Cursor::new(text.as_bytes());
        HeaderModel::parse(&mut cursor).unwrap()
    }

    #[tokio::test]
    async fn basic_load_commits_all_rows_and_marks_completed() {
        let sink = CountingSink { calls: AtomicUsize::new(0), fail_first_n: 0 };
        let audit = InMemoryAuditStore::default();
        let mut config = IngestConfig::default();
        config.batch_size = 1;
        let coordinator = LoadCoordinator::new(config, sink, audit, header());

        let body = "chr1\t100\t.\tA\tG\t.\tPASS\t.\nchr1\t200\t.\tC\tT\t.\tPASS\t.\n";
        let reader = crate::io::buffer_reader(Cursor::new(body.as_bytes().to_vec()));
        let summary = coordinator
            .run(reader, "test.vcf", "fp-basic", &crate::refprovider::NullReferenceProvider)
            .await
            .unwrap();
        assert_eq!(summary.rows_committed, 2);
    }

    #[tokio::test]
    async fn duplicate_load_without_force_is_refused() {
        let sink = CountingSink { calls: AtomicUsize::new(0), fail_first_n: 0 };
        let audit = InMemoryAuditStore::default();
        let entry = AuditEntry {
            batch_id: uuid::Uuid::new_v4(),
            source_path: "test.vcf".to_string(),
            source_fingerprint: "fp-dup".to_string(),
            row_count: 10,
            status: LoadStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            failed_offset: None,
        };
        audit.insert_started(&entry).await.unwrap();
        audit.mark_completed(entry.batch_id, 10, Utc::now()).await.unwrap();

        let coordinator = LoadCoordinator::new(IngestConfig::default(), sink, audit, header());
        let reader = crate::io::buffer_reader(Cursor::new(Vec::new()));
        let err = coordinator
            .run(reader, "test.vcf", "fp-dup", &crate::refprovider::NullReferenceProvider)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::AlreadyLoaded { .. }));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let sink = CountingSink { calls: AtomicUsize::new(0), fail_first_n: 2 };
        let audit = InMemoryAuditStore::default();
        let mut config = IngestConfig::default();
        config.retry_backoff_base_ms = 1;
        let coordinator = LoadCoordinator::new(config, sink, audit, header());

        let body = "chr1\t100\t.\tA\tG\t.\tPASS\t.\n";
        let reader = crate::io::buffer_reader(Cursor::new(body.as_bytes().to_vec()));
        let summary = coordinator
            .run(reader, "test.vcf", "fp-retry", &crate::refprovider::NullReferenceProvider)
            .await
            .unwrap();
        assert_eq!(summary.rows_committed, 1);
    }

    struct AlwaysPermanentSink;

    #[async_trait::async_trait]
    impl BatchSink for AlwaysPermanentSink {
        async fn write_batch(&self, _rows: &[TableRow], _plan: &ColumnPlan) -> Result<(), IngestError> {
            Err(IngestError::PermanentDb("schema mismatch".into()))
        }
    }

    #[tokio::test]
    async fn permanent_failures_abort_without_retry() {
        let audit = InMemoryAuditStore::default();
        let mut config = IngestConfig::default();
        config.retry_max_attempts = 5;
        let coordinator = LoadCoordinator::new(config, AlwaysPermanentSink, audit, header());

        let body = "chr1\t100\t.\tA\tG\t.\tPASS\t.\n";
        let reader = crate::io::buffer_reader(Cursor::new(body.as_bytes().to_vec()));
        let err = coordinator
            .run(reader, "test.vcf", "fp-permanent", &crate::refprovider::NullReferenceProvider)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::PermanentDb(_)));
    }

    struct RecordingSink {
        batches: Arc<std::sync::Mutex<Vec<Vec<String>>>>,
    }

    #[async_trait::async_trait]
    impl BatchSink for RecordingSink {
        async fn write_batch(&self, rows: &[TableRow], _plan: &ColumnPlan) -> Result<(), IngestError> {
            let chroms = rows.iter().map(|r| r.chrom.clone()).collect();
            self.batches.lock().unwrap().push(chroms);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sharded_load_commits_all_rows_in_chromosome_disjoint_batches() {
        let batches = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = RecordingSink {
            batches: Arc::clone(&batches),
        };
        let audit = InMemoryAuditStore::default();
        let mut config = IngestConfig::default();
        config.batch_size = 1;
        config.shard_count = 4;
        let coordinator = LoadCoordinator::new(config, sink, audit, header());

        let body = "chr1\t100\t.\tA\tG\t.\tPASS\t.\n\
                     chr2\t100\t.\tA\tG\t.\tPASS\t.\n\
                     chrX\t100\t.\tA\tG\t.\tPASS\t.\n\
                     chrY\t100\t.\tA\tG\t.\tPASS\t.\n\
                     chr1\t200\t.\tA\tG\t.\tPASS\t.\n\
                     chr2\t200\t.\tA\tG\t.\tPASS\t.\n\
                     chrX\t200\t.\tA\tG\t.\tPASS\t.\n\
                     chrY\t200\t.\tA\tG\t.\tPASS\t.\n";
        let reader = crate::io::buffer_reader(Cursor::new(body.as_bytes().to_vec()));
        let summary = coordinator
            .run(reader, "test.vcf", "fp-shard", &crate::refprovider::NullReferenceProvider)
            .await
            .unwrap();
        assert_eq!(summary.rows_committed, 8);

        // Every committed batch's rows must map to the same shard (spec
        // testable property 10: shard disjointness), and every row in the
        // input must appear exactly once across all committed batches.
        let shard_count = 4;
        let recorded = batches.lock().unwrap();
        let mut committed_chroms: Vec<&str> = Vec::new();
        for batch in recorded.iter() {
            let shards: std::collections::HashSet<usize> =
                batch.iter().map(|c| shard_for(c, shard_count)).collect();
            assert_eq!(shards.len(), 1, "batch spans multiple shards: {batch:?}");
            committed_chroms.extend(batch.iter().map(String::as_str));
        }
        committed_chroms.sort_unstable();
        assert_eq!(
            committed_chroms,
            vec!["chr1", "chr1", "chr2", "chr2", "chrX", "chrX", "chrY", "chrY"]
        );
    }
}
