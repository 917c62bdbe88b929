//! Optional metrics instrumentation.
//!
//! When the `observe` feature is enabled, saves and queries emit counters and
//! histograms via the [`metrics`] crate. The host application installs the
//! recorder.
//!
//! Without the feature every function in this module is a zero-cost no-op.

use crate::error::Status;

/// Record the outcome of one saved command.
///
/// - `vellum.save.total` – counter with `type` and `status` labels
/// - `vellum.save.duration_seconds` – histogram of end-to-end save latency
#[inline]
pub fn record_save(type_name: &'static str, status: Status, duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!(
            "vellum.save.total",
            "type" => type_name,
            "status" => status.code().to_string()
        )
        .increment(1);
        metrics::histogram!("vellum.save.duration_seconds", "type" => type_name)
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (type_name, status, duration);
    }
}

/// Record one native transaction submitted for a partition.
///
/// - `vellum.batch.total` – counter
/// - `vellum.batch.items` – histogram of intents per transaction
#[inline]
pub fn record_batch(items: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("vellum.batch.total").increment(1);
        metrics::histogram!("vellum.batch.items").record(items as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = items;
    }
}

/// Record one fetched query page.
///
/// - `vellum.query.pages_total` – counter with `type` label
/// - `vellum.query.documents_total` – counter of documents returned by the store
#[inline]
pub fn record_query_page(type_name: &'static str, documents: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("vellum.query.pages_total", "type" => type_name).increment(1);
        metrics::counter!("vellum.query.documents_total", "type" => type_name)
            .increment(documents as u64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (type_name, documents);
    }
}
