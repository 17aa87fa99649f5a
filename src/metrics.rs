//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Metrics data for a pool
///
/// Counters accumulate over the pool's lifetime; the remaining fields are gauges
/// read when the snapshot was taken.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{Pool, PoolConfiguration, PoolSource};
/// use std::convert::Infallible;
///
/// struct Numbers;
///
/// impl PoolSource for Numbers {
///     type Resource = u32;
///     type Error = Infallible;
///
///     fn create(&self) -> Result<u32, Infallible> { Ok(7) }
///     fn destroy(&self, _: u32) -> Result<(), Infallible> { Ok(()) }
///     fn validate(&self, _: &u32) -> Result<bool, Infallible> { Ok(true) }
///     fn shutdown(&self) {}
/// }
///
/// let pool = Pool::new("numbers", Numbers, PoolConfiguration::default()).unwrap();
/// let lease = pool.acquire().unwrap();
///
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.acquired, 1);
/// assert_eq!(metrics.in_use, 1);
///
/// pool.release(lease).unwrap();
/// assert_eq!(pool.get_metrics().released, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Successful acquires
    pub acquired: usize,

    /// Resources released back to the pool
    pub released: usize,

    /// Resources abandoned by callers
    pub abandoned: usize,

    /// Resources opened by the source
    pub created: usize,

    /// Failed open attempts
    pub create_failures: usize,

    /// Resources handed back to the source
    pub destroyed: usize,

    /// Ready resources destroyed for sitting idle too long
    pub evicted: usize,

    pub validation_failures: usize,

    pub leaks_detected: usize,

    /// Acquires that gave up waiting
    pub timeouts: usize,

    /// Resources tracked by the pool, checked out or not
    pub open: usize,

    /// Resources currently checked out
    pub in_use: usize,

    pub available: usize,

    pub waiting: usize,

    pub opening: usize,

    pub max_open: usize,

    /// Checked-out share of `max_open` (0.0 to 1.0)
    pub utilization: f64,

    /// Whether population is currently held back
    pub throttled: bool,

    /// Whether the last open attempt failed
    pub failing: bool,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("acquired".to_string(), self.acquired.to_string());
        metrics.insert("released".to_string(), self.released.to_string());
        metrics.insert("abandoned".to_string(), self.abandoned.to_string());
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("create_failures".to_string(), self.create_failures.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("evicted".to_string(), self.evicted.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("leaks_detected".to_string(), self.leaks_detected.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert("open".to_string(), self.open.to_string());
        metrics.insert("in_use".to_string(), self.in_use.to_string());
        metrics.insert("available".to_string(), self.available.to_string());
        metrics.insert("waiting".to_string(), self.waiting.to_string());
        metrics.insert("opening".to_string(), self.opening.to_string());
        metrics.insert("max_open".to_string(), self.max_open.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("throttled".to_string(), self.throttled.to_string());
        metrics.insert("failing".to_string(), self.failing.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let metrics = PoolMetrics {
    ///     acquired: 3, released: 2, abandoned: 0, created: 1, create_failures: 0,
    ///     destroyed: 0, evicted: 0, validation_failures: 0, leaks_detected: 0,
    ///     timeouts: 0, open: 1, in_use: 1, available: 0, waiting: 0, opening: 0,
    ///     max_open: 10, utilization: 0.1, throttled: false, failing: false,
    /// };
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&metrics, "db", Some(&tags));
    /// assert!(output.contains("resourcepool_resources_in_use{pool=\"db\",service=\"api\"} 1"));
    /// assert!(output.contains("resourcepool_acquired_total"));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let labels = Self::format_labels(pool_name, tags);
        let mut output = String::new();

        let gauges: [(&str, &str, String); 7] = [
            ("resources_open", "Resources tracked by the pool", metrics.open.to_string()),
            ("resources_in_use", "Resources currently checked out", metrics.in_use.to_string()),
            ("resources_available", "Resources ready to hand out", metrics.available.to_string()),
            ("resources_opening", "Resources being opened", metrics.opening.to_string()),
            ("waiting", "Callers waiting for a resource", metrics.waiting.to_string()),
            ("utilization", "Checked-out share of max_open", format!("{:.2}", metrics.utilization)),
            ("source_failing", "Whether the last open attempt failed", u8::from(metrics.failing).to_string()),
        ];
        for (name, help, value) in gauges {
            Self::write_metric(&mut output, name, "gauge", help, &labels, &value);
        }

        let counters: [(&str, &str, usize); 10] = [
            ("acquired_total", "Successful acquires", metrics.acquired),
            ("released_total", "Resources released", metrics.released),
            ("abandoned_total", "Resources abandoned", metrics.abandoned),
            ("created_total", "Resources opened", metrics.created),
            ("create_failures_total", "Failed open attempts", metrics.create_failures),
            ("destroyed_total", "Resources returned to the source", metrics.destroyed),
            ("evicted_total", "Idle resources evicted", metrics.evicted),
            ("validation_failures_total", "Validation failures", metrics.validation_failures),
            ("leaks_total", "Leaked resources detected", metrics.leaks_detected),
            ("timeouts_total", "Acquires that timed out", metrics.timeouts),
        ];
        for (name, help, value) in counters {
            Self::write_metric(&mut output, name, "counter", help, &labels, &value.to_string());
        }

        output
    }

    fn write_metric(output: &mut String, name: &str, kind: &str, help: &str, labels: &str, value: &str) {
        // Writing to a String can't fail
        let _ = writeln!(output, "# HELP resourcepool_{name} {help}");
        let _ = writeln!(output, "# TYPE resourcepool_{name} {kind}");
        let _ = writeln!(output, "resourcepool_{name}{{{labels}}} {value}");
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Lifetime counters kept by a pool
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub abandoned: AtomicUsize,
    pub created: AtomicUsize,
    pub create_failures: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub evicted: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub leaks_detected: AtomicUsize,
    pub timeouts: AtomicUsize,
}

/// Point-in-time pool state combined with the counters into a [`PoolMetrics`]
pub(crate) struct Gauges {
    pub open: usize,
    pub available: usize,
    pub waiting: usize,
    pub opening: usize,
    pub max_open: usize,
    pub throttled: bool,
    pub failing: bool,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        Self::add(counter, 1);
    }

    pub fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, gauges: Gauges) -> PoolMetrics {
        let in_use = gauges.open.saturating_sub(gauges.available);
        let utilization = if gauges.max_open > 0 {
            (in_use as f64 / gauges.max_open as f64).min(1.0)
        } else {
            0.0
        };

        PoolMetrics {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            leaks_detected: self.leaks_detected.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            open: gauges.open,
            in_use,
            available: gauges.available,
            waiting: gauges.waiting,
            opening: gauges.opening,
            max_open: gauges.max_open,
            utilization,
            throttled: gauges.throttled,
            failing: gauges.failing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauges(open: usize, available: usize) -> Gauges {
        Gauges {
            open,
            available,
            waiting: 0,
            opening: 0,
            max_open: 10,
            throttled: false,
            failing: false,
        }
    }

    #[test]
    fn test_counters_and_gauges() {
        let tracker = MetricsTracker::new();
        MetricsTracker::incr(&tracker.acquired);
        MetricsTracker::incr(&tracker.acquired);
        MetricsTracker::add(&tracker.leaks_detected, 3);

        let metrics = tracker.get_metrics(gauges(5, 2));
        assert_eq!(metrics.acquired, 2);
        assert_eq!(metrics.leaks_detected, 3);
        assert_eq!(metrics.in_use, 3);
        assert!((metrics.utilization - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_export_map() {
        let metrics = MetricsTracker::new().get_metrics(gauges(1, 1));
        let exported = metrics.export();
        assert_eq!(exported.get("open").map(String::as_str), Some("1"));
        assert_eq!(exported.get("in_use").map(String::as_str), Some("0"));
        assert_eq!(exported.get("utilization").map(String::as_str), Some("0.00"));
    }

    #[test]
    fn test_prometheus_labels_are_sorted() {
        let metrics = MetricsTracker::new().get_metrics(gauges(0, 0));
        let mut tags = HashMap::new();
        tags.insert("zone".to_string(), "b".to_string());
        tags.insert("app".to_string(), "a".to_string());

        let output = MetricsExporter::export_prometheus(&metrics, "p", Some(&tags));
        assert!(output.contains("resourcepool_waiting{pool=\"p\",app=\"a\",zone=\"b\"} 0"));
        assert!(output.contains("# TYPE resourcepool_timeouts_total counter"));
    }
}
