//! Replays a static dataset into an append-only table, a few ordering keys at
//! a time, pausing between batches so consumers see it arrive like a feed.
//!
//! The loop stops at the second-to-last distinct key: a batch is started only
//! while its first index is below `keys.len() - 1`. The last key's rows are
//! therefore appended only when an earlier window, clamped to the end of the
//! sequence, happens to reach it. Downstream row counts depend on this, so it
//! is kept as is.

pub mod pacer;
pub mod source;

pub use pacer::{CancelHandle, CancelToken, Pacer, TokioPacer, cancellation};
pub use source::TableSource;

use crate::table::ParquetLogTable;
use crate::utils::arrow::total_rows;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use common::config::ReplaySettings;
use common::{Error, Result};
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
    batch_size: NonZeroUsize,
    pause: Duration,
}

impl ReplayConfig {
    pub fn new(batch_size: i64, pause_secs: f64) -> Result<Self> {
        let batch_size = usize::try_from(batch_size)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| {
                Error::InvalidConfiguration(format!(
                    "batch size must be a positive integer, got {}",
                    batch_size
                ))
            })?;

        let pause = Duration::try_from_secs_f64(pause_secs).map_err(|e| {
            Error::InvalidConfiguration(format!(
                "pause must be a non-negative number of seconds, got {}: {}",
                pause_secs, e
            ))
        })?;

        Ok(Self { batch_size, pause })
    }

    pub fn from_settings(settings: &ReplaySettings) -> Result<Self> {
        Self::new(settings.batch_size, settings.pause_secs)
    }

    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::MIN.saturating_add(2),
            pause: Duration::from_secs(7),
        }
    }
}

/// Inclusive range of ordering keys covered by one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange<K = NaiveDate> {
    pub min: K,
    pub max: K,
}

/// Splits ascending distinct `keys` into consecutive windows of `batch_size`.
///
/// Windows start at `0, b, 2b, ...` while the start index is below
/// `keys.len() - 1`; the last window's end is clamped to the final key.
pub fn partition_into_batches<K: Clone>(keys: &[K], batch_size: NonZeroUsize) -> Vec<KeyRange<K>> {
    let size = batch_size.get();
    let Some(last_index) = keys.len().checked_sub(1) else {
        return Vec::new();
    };

    (0..last_index)
        .step_by(size)
        .map(|start| KeyRange {
            min: keys[start].clone(),
            max: keys[(start + size - 1).min(last_index)].clone(),
        })
        .collect()
}

#[async_trait]
pub trait ReplaySource: Send + Sync {
    /// Distinct ordering keys, ascending.
    async fn distinct_keys(&self) -> Result<Vec<NaiveDate>>;

    /// Every record whose key lies in `range`, bounds included.
    async fn select_range(&self, range: &KeyRange) -> Result<Vec<RecordBatch>>;
}

/// Append-capable target. One call must be atomic.
#[async_trait]
pub trait AppendSink: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the table version created by the append.
    async fn append(&self, batches: &[RecordBatch]) -> Result<u64>;
}

#[async_trait]
impl AppendSink for ParquetLogTable {
    fn name(&self) -> &str {
        self.uri()
    }

    async fn append(&self, batches: &[RecordBatch]) -> Result<u64> {
        ParquetLogTable::append(self, batches).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBatch {
    pub range: KeyRange,
    pub rows: usize,
    pub version: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub distinct_keys: usize,
    pub batches: Vec<CommittedBatch>,
    pub cancelled: bool,
}

impl ReplayReport {
    pub fn total_rows(&self) -> usize {
        self.batches.iter().map(|b| b.rows).sum()
    }
}

pub struct ReplayDriver<S, T, P> {
    source: S,
    sink: T,
    pacer: P,
    config: ReplayConfig,
    cancel: CancelToken,
}

impl<S, T, P> ReplayDriver<S, T, P>
where
    S: ReplaySource,
    T: AppendSink,
    P: Pacer,
{
    pub fn new(source: S, sink: T, pacer: P, config: ReplayConfig) -> Self {
        Self {
            source,
            sink,
            pacer,
            config,
            cancel: CancelToken::never(),
        }
    }

    /// Checked before each batch; an append in flight always completes.
    pub fn with_cancellation(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn sink(&self) -> &T {
        &self.sink
    }

    pub async fn run(&self) -> Result<ReplayReport> {
        let keys = self.source.distinct_keys().await?;
        let ranges = partition_into_batches(&keys, self.config.batch_size);

        info!(
            table = self.sink.name(),
            distinct_keys = keys.len(),
            batches = ranges.len(),
            batch_size = self.config.batch_size.get(),
            pause_secs = self.config.pause.as_secs_f64(),
            "Starting replay"
        );
        if let (Some(last_key), Some(last_range)) = (keys.last(), ranges.last()) {
            if last_range.max < *last_key {
                info!(last_key = %last_key, "Final ordering key falls outside every batch and will not be replayed");
            }
        }

        let mut report = ReplayReport {
            distinct_keys: keys.len(),
            ..Default::default()
        };

        for range in ranges {
            if self.cancel.is_cancelled() {
                info!(completed = report.batches.len(), "Replay cancelled");
                report.cancelled = true;
                break;
            }

            let (rows, version) =
                self.replay_batch(&range)
                    .await
                    .map_err(|source| Error::AppendFailed {
                        batch_min: range.min,
                        batch_max: range.max,
                        completed: report.batches.len(),
                        source: Box::new(source),
                    })?;

            info!(
                table = self.sink.name(),
                batch_min = %range.min,
                batch_max = %range.max,
                rows,
                version,
                "Inserted new rows of data, min: [{}], max: [{}]",
                range.min,
                range.max
            );
            report.batches.push(CommittedBatch {
                range,
                rows,
                version,
            });

            self.pacer.pause(self.config.pause).await;
        }

        info!(
            table = self.sink.name(),
            batches = report.batches.len(),
            rows = report.total_rows(),
            cancelled = report.cancelled,
            "Replay finished"
        );
        Ok(report)
    }

    async fn replay_batch(&self, range: &KeyRange) -> Result<(usize, u64)> {
        let batches = self.source.select_range(range).await?;
        let version = self.sink.append(&batches).await?;
        Ok((total_rows(&batches), version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TableLocation;
    use arrow::array::{Date32Array, Float64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
    use datafusion::prelude::SessionContext;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2012, 1, n).unwrap()
    }

    #[derive(Default)]
    struct RecordingPacer {
        pauses: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Pacer for RecordingPacer {
        async fn pause(&self, duration: Duration) {
            self.pauses.lock().unwrap().push(duration);
        }
    }

    /// Fails the `fail_on`-th append (1-based), delegating the rest.
    struct FlakySink {
        inner: ParquetLogTable,
        fail_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AppendSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn append(&self, batches: &[RecordBatch]) -> Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on {
                return Err(Error::Storage("storage unavailable".to_string()));
            }
            self.inner.append(batches).await
        }
    }

    fn price_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("ticker", DataType::Utf8, false),
            Field::new("price_date", DataType::Date32, false),
            Field::new("close", DataType::Float64, true),
        ]))
    }

    /// Two tickers per date for dates 1..=days, out of order on purpose.
    fn price_rows(days: u32) -> RecordBatch {
        let mut tickers = Vec::new();
        let mut dates = Vec::new();
        let mut closes = Vec::new();
        for d in (1..=days).rev() {
            for ticker in ["AAPL", "MSFT"] {
                tickers.push(ticker);
                dates.push(crate::utils::arrow::date_to_days(day(d)));
                closes.push(d as f64);
            }
        }
        RecordBatch::try_new(
            price_schema(),
            vec![
                Arc::new(StringArray::from(tickers)),
                Arc::new(Date32Array::from(dates)),
                Arc::new(Float64Array::from(closes)),
            ],
        )
        .unwrap()
    }

    async fn source_with_days(days: u32) -> TableSource {
        let batches = if days == 0 { vec![] } else { vec![price_rows(days)] };
        TableSource::from_batches(
            SessionContext::new(),
            "stock_daily_prices",
            price_schema(),
            batches,
            "price_date",
        )
        .await
        .unwrap()
    }

    async fn empty_target() -> ParquetLogTable {
        let table = ParquetLogTable::new(TableLocation::in_memory("prices").unwrap());
        table.create_empty(price_schema()).await.unwrap();
        table
    }

    fn replayed_dates(batches: &[RecordBatch]) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = batches
            .iter()
            .flat_map(|b| {
                let column = b.column(1).as_any().downcast_ref::<Date32Array>().unwrap();
                (0..column.len())
                    .map(|i| column.value_as_date(i).unwrap())
                    .collect::<Vec<_>>()
            })
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }

    #[test]
    fn test_partition_ten_keys_by_three() {
        let keys: Vec<u32> = (1..=10).collect();
        let ranges = partition_into_batches(&keys, nz(3));

        assert_eq!(
            ranges,
            vec![
                KeyRange { min: 1, max: 3 },
                KeyRange { min: 4, max: 6 },
                KeyRange { min: 7, max: 9 },
            ]
        );
    }

    #[test]
    fn test_partition_clamps_final_window() {
        let keys: Vec<u32> = (1..=5).collect();
        let ranges = partition_into_batches(&keys, nz(3));

        assert_eq!(
            ranges,
            vec![KeyRange { min: 1, max: 3 }, KeyRange { min: 4, max: 5 }]
        );
    }

    #[test]
    fn test_partition_degenerate_inputs() {
        let empty: Vec<u32> = Vec::new();
        assert!(partition_into_batches(&empty, nz(3)).is_empty());
        assert!(partition_into_batches(&[7u32], nz(3)).is_empty());
        assert_eq!(
            partition_into_batches(&[1u32, 2], nz(1)),
            vec![KeyRange { min: 1, max: 1 }]
        );
    }

    #[test]
    fn test_partition_batch_count_and_order() {
        for n in 0..40usize {
            for b in 1..8usize {
                let keys: Vec<usize> = (0..n).collect();
                let ranges = partition_into_batches(&keys, nz(b));

                let expected = if n <= 1 { 0 } else { (n - 1).div_ceil(b) };
                assert_eq!(ranges.len(), expected, "n={} b={}", n, b);

                for pair in ranges.windows(2) {
                    assert!(pair[0].max < pair[1].min, "n={} b={}", n, b);
                }
                for range in &ranges {
                    assert!(range.min <= range.max);
                }
            }
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            ReplayConfig::new(0, 7.0),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ReplayConfig::new(-2, 7.0),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ReplayConfig::new(3, -1.0),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ReplayConfig::new(3, f64::NAN),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ReplayConfig::new(3, f64::INFINITY),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ReplayConfig::new(3, 1e30),
            Err(Error::InvalidConfiguration(_))
        ));

        let config = ReplayConfig::new(3, 0.0).unwrap();
        assert_eq!(config.batch_size().get(), 3);
        assert_eq!(config.pause(), Duration::ZERO);

        let default = ReplayConfig::default();
        assert_eq!(default.batch_size().get(), 3);
        assert_eq!(default.pause(), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_ten_dates_skip_the_last() {
        let target = empty_target().await;
        let pacer = RecordingPacer::default();
        let driver = ReplayDriver::new(
            source_with_days(10).await,
            target.clone(),
            pacer,
            ReplayConfig::default(),
        );

        let report = driver.run().await.unwrap();

        let ranges: Vec<KeyRange> = report.batches.iter().map(|b| b.range).collect();
        assert_eq!(
            ranges,
            vec![
                KeyRange { min: day(1), max: day(3) },
                KeyRange { min: day(4), max: day(6) },
                KeyRange { min: day(7), max: day(9) },
            ]
        );
        assert_eq!(report.distinct_keys, 10);
        assert_eq!(report.total_rows(), 18);
        assert!(!report.cancelled);

        let stored = target.read_all().await.unwrap();
        assert_eq!(replayed_dates(&stored), (1..=9).map(day).collect::<Vec<_>>());
        assert_eq!(target.snapshot().await.unwrap().version, 3);

        let pauses = driver.pacer.pauses.lock().unwrap().clone();
        assert_eq!(pauses, vec![Duration::from_secs(7); 3]);
    }

    #[tokio::test]
    async fn test_long_pause_is_passed_through() {
        let target = empty_target().await;
        let driver = ReplayDriver::new(
            source_with_days(3).await,
            target,
            RecordingPacer::default(),
            ReplayConfig::new(3, 1e12).unwrap(),
        );

        let report = driver.run().await.unwrap();

        assert_eq!(report.batches.len(), 1);
        let pauses = driver.pacer.pauses.lock().unwrap().clone();
        assert_eq!(pauses, vec![Duration::from_secs(1_000_000_000_000)]);
    }

    #[tokio::test]
    async fn test_clamped_window_reaches_last_date() {
        let target = empty_target().await;
        let driver = ReplayDriver::new(
            source_with_days(5).await,
            target.clone(),
            RecordingPacer::default(),
            ReplayConfig::new(3, 0.0).unwrap(),
        );

        let report = driver.run().await.unwrap();

        assert_eq!(report.batches.len(), 2);
        assert_eq!(report.batches[1].range, KeyRange { min: day(4), max: day(5) });
        let stored = target.read_all().await.unwrap();
        assert_eq!(replayed_dates(&stored), (1..=5).map(day).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_single_date_replays_nothing() {
        let target = empty_target().await;
        let driver = ReplayDriver::new(
            source_with_days(1).await,
            target.clone(),
            RecordingPacer::default(),
            ReplayConfig::default(),
        );

        let report = driver.run().await.unwrap();

        assert!(report.batches.is_empty());
        assert_eq!(report.distinct_keys, 1);
        assert_eq!(target.snapshot().await.unwrap().num_rows(), 0);
        assert!(driver.pacer.pauses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_source_replays_nothing() {
        let target = empty_target().await;
        let driver = ReplayDriver::new(
            source_with_days(0).await,
            target.clone(),
            RecordingPacer::default(),
            ReplayConfig::default(),
        );

        let report = driver.run().await.unwrap();
        assert_eq!(report.distinct_keys, 0);
        assert!(report.batches.is_empty());
    }

    #[tokio::test]
    async fn test_failed_append_halts_replay() {
        let target = empty_target().await;
        let sink = FlakySink {
            inner: target.clone(),
            fail_on: 2,
            calls: AtomicUsize::new(0),
        };
        let driver = ReplayDriver::new(
            source_with_days(10).await,
            sink,
            RecordingPacer::default(),
            ReplayConfig::default(),
        );

        let err = driver.run().await.unwrap_err();
        match err {
            Error::AppendFailed {
                batch_min,
                batch_max,
                completed,
                ..
            } => {
                assert_eq!((batch_min, batch_max), (day(4), day(6)));
                assert_eq!(completed, 1);
            }
            other => panic!("expected AppendFailed, got {:?}", other),
        }

        // Batch three was never attempted.
        assert_eq!(driver.sink().calls.load(Ordering::SeqCst), 2);
        let stored = target.read_all().await.unwrap();
        assert_eq!(replayed_dates(&stored), vec![day(1), day(2), day(3)]);
        assert_eq!(driver.pacer.pauses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_batch() {
        let target = empty_target().await;
        let (handle, token) = cancellation();

        struct CancellingPacer(CancelHandle);

        #[async_trait]
        impl Pacer for CancellingPacer {
            async fn pause(&self, _duration: Duration) {
                self.0.cancel();
            }
        }

        let driver = ReplayDriver::new(
            source_with_days(10).await,
            target.clone(),
            CancellingPacer(handle),
            ReplayConfig::default(),
        )
        .with_cancellation(token);

        let report = driver.run().await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.batches.len(), 1);
        assert_eq!(target.snapshot().await.unwrap().version, 1);
    }
}
