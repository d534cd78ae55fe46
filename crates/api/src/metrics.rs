use ingest::MiningReport;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_ingest_time_us: AtomicU64,
    total_community_time_us: AtomicU64,

    // Counts
    documents_ingested: AtomicUsize,
    documents_failed: AtomicUsize,
    chunks_mined: AtomicUsize,
    chunks_failed: AtomicUsize,
    chunks_conflicted: AtomicUsize,
    nodes_stored: AtomicUsize,
    relationships_stored: AtomicUsize,
    community_runs: AtomicUsize,
    reports_generated: AtomicUsize,
    reports_failed: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            total_ingest_time_us: AtomicU64::new(0),
            total_community_time_us: AtomicU64::new(0),
            documents_ingested: AtomicUsize::new(0),
            documents_failed: AtomicUsize::new(0),
            chunks_mined: AtomicUsize::new(0),
            chunks_failed: AtomicUsize::new(0),
            chunks_conflicted: AtomicUsize::new(0),
            nodes_stored: AtomicUsize::new(0),
            relationships_stored: AtomicUsize::new(0),
            community_runs: AtomicUsize::new(0),
            reports_generated: AtomicUsize::new(0),
            reports_failed: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_mining(&self, report: &MiningReport) {
        self.chunks_mined.fetch_add(report.mined(), Ordering::Relaxed);
        self.chunks_failed.fetch_add(report.failed(), Ordering::Relaxed);
        self.chunks_conflicted.fetch_add(report.conflicts(), Ordering::Relaxed);
    }

    pub fn record_document(&self, stored: Option<(usize, usize)>) {
        match stored {
            Some((nodes, relationships)) => {
                self.documents_ingested.fetch_add(1, Ordering::Relaxed);
                self.nodes_stored.fetch_add(nodes, Ordering::Relaxed);
                self.relationships_stored.fetch_add(relationships, Ordering::Relaxed);
            }
            None => {
                self.documents_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_ingest(&self, duration: Duration) {
        self.total_ingest_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_communities(&self, duration: Duration, reports: usize, failures: usize) {
        self.total_community_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.community_runs.fetch_add(1, Ordering::Relaxed);
        self.reports_generated.fetch_add(reports, Ordering::Relaxed);
        self.reports_failed.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let documents = self.documents_ingested.load(Ordering::Relaxed)
            + self.documents_failed.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_ingest_time_ms: avg_time_ms(&self.total_ingest_time_us, documents),
            avg_community_time_ms: avg_time_ms(
                &self.total_community_time_us,
                self.community_runs.load(Ordering::Relaxed),
            ),
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_mined: self.chunks_mined.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            chunks_conflicted: self.chunks_conflicted.load(Ordering::Relaxed),
            nodes_stored: self.nodes_stored.load(Ordering::Relaxed),
            relationships_stored: self.relationships_stored.load(Ordering::Relaxed),
            community_runs: self.community_runs.load(Ordering::Relaxed),
            reports_generated: self.reports_generated.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: usize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    if count > 0 {
        total / count as f64 / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Per document
    pub avg_ingest_time_ms: f64,
    /// Per community run
    pub avg_community_time_ms: f64,
    pub documents_ingested: usize,
    pub documents_failed: usize,
    pub chunks_mined: usize,
    pub chunks_failed: usize,
    pub chunks_conflicted: usize,
    pub nodes_stored: usize,
    pub relationships_stored: usize,
    pub community_runs: usize,
    pub reports_generated: usize,
    pub reports_failed: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::ChunkOutcome;

    #[test]
    fn test_mining_counts() {
        let metrics = Metrics::new();
        let report = MiningReport {
            doc_id: "doc".to_string(),
            outcomes: vec![
                ChunkOutcome::Mined { nodes: 2, relationships: 1 },
                ChunkOutcome::Failed { error: "timed out".to_string() },
                ChunkOutcome::Mined { nodes: 1, relationships: 0 },
            ],
        };

        metrics.record_mining(&report);
        metrics.record_document(Some((3, 1)));
        metrics.record_document(None);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.chunks_mined, 2);
        assert_eq!(snapshot.chunks_failed, 1);
        assert_eq!(snapshot.chunks_conflicted, 0);
        assert_eq!(snapshot.documents_ingested, 1);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.nodes_stored, 3);
    }

    #[test]
    fn test_averages() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().avg_ingest_time_ms, 0.0);

        metrics.record_communities(Duration::from_millis(10), 2, 0);
        metrics.record_communities(Duration::from_millis(30), 1, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.avg_community_time_ms, 20.0);
        assert_eq!(snapshot.reports_generated, 3);
        assert_eq!(snapshot.reports_failed, 1);
    }
}
