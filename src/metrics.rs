use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};

pub struct Metrics {
    registry: Registry,

    // Message flow
    pub messages_total: IntCounter,
    pub scans_dispatched_total: IntCounter,
    pub fail_open_total: IntCounter,

    // Callback protocol
    pub duplicate_callbacks_total: IntCounter,

    // Content swaps
    pub content_swaps_total: IntCounter,
    pub swap_failures_total: IntCounter,

    pub scan_duration: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_total = IntCounter::new(
            "scangate_messages_total",
            "Total number of messages seen by the interception stage",
        )
        .expect("metric creation failed");
        let scans_dispatched_total = IntCounter::new(
            "scangate_scans_dispatched_total",
            "Total number of scan dispatch attempts",
        )
        .expect("metric creation failed");
        let fail_open_total = IntCounter::new(
            "scangate_fail_open_total",
            "Messages passed through unscanned because the scanner was unreachable",
        )
        .expect("metric creation failed");
        let duplicate_callbacks_total = IntCounter::new(
            "scangate_duplicate_callbacks_total",
            "Completion callbacks ignored because the slot was already released",
        )
        .expect("metric creation failed");
        let content_swaps_total = IntCounter::new(
            "scangate_content_swaps_total",
            "Message bodies replaced by the scanner",
        )
        .expect("metric creation failed");
        let swap_failures_total = IntCounter::new(
            "scangate_swap_failures_total",
            "Content replacements that failed and were swallowed",
        )
        .expect("metric creation failed");
        let scan_duration = Histogram::with_opts(HistogramOpts::new(
            "scangate_scan_duration_seconds",
            "Wall time between dispatch and completion",
        ))
        .expect("metric creation failed");

        registry
            .register(Box::new(messages_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(scans_dispatched_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(fail_open_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(duplicate_callbacks_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(content_swaps_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(swap_failures_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(scan_duration.clone()))
            .expect("metric registration failed");

        Self {
            registry,
            messages_total,
            scans_dispatched_total,
            fail_open_total,
            duplicate_callbacks_total,
            content_swaps_total,
            swap_failures_total,
            scan_duration,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// One-line totals for the shutdown log.
    pub fn summary(&self) -> String {
        format!(
            "messages={} dispatched={} fail_open={} swaps={} swap_failures={} duplicate_callbacks={}",
            self.messages_total.get(),
            self.scans_dispatched_total.get(),
            self.fail_open_total.get(),
            self.content_swaps_total.get(),
            self.swap_failures_total.get(),
            self.duplicate_callbacks_total.get(),
        )
    }
}
