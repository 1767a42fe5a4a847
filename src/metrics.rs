use crate::error::TagError;
use metrics::{Counter, Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide metrics registry.
///
/// Owned by the application assembly and handed to every consumer; nothing
/// here installs a global recorder.
#[derive(Clone)]
pub struct MeterRegistry {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl MeterRegistry {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            recorder: Arc::new(recorder),
            handle,
        }
    }

    pub fn counter(&self, name: &str, labels: &[(&str, String)]) -> Counter {
        let labels: Vec<Label> = labels
            .iter()
            .map(|(key, value)| Label::new(key.to_string(), value.clone()))
            .collect();
        let key = Key::from_parts(name.to_string(), labels);
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
        self.recorder.register_counter(&key, &metadata)
    }

    // Prometheus exposition text
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for MeterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One counter per distinct tag value under a fixed metric name.
///
/// Counters are created on first use and cached; creation happens under the
/// write lock so simultaneous first use never registers two counters for the
/// same value.
pub struct TaggedCounter {
    name: String,
    tag_name: String,
    registry: MeterRegistry,
    counters: RwLock<HashMap<String, Counter>>,
}

impl TaggedCounter {
    pub fn new(name: &str, tag_name: &str, registry: &MeterRegistry) -> Self {
        Self {
            name: name.to_string(),
            tag_name: tag_name.to_string(),
            registry: registry.clone(),
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn increment(&self, tag_value: &str) {
        if let Some(counter) = self.counters.read().get(tag_value) {
            counter.increment(1);
            return;
        }

        let mut counters = self.counters.write();
        counters
            .entry(tag_value.to_string())
            .or_insert_with(|| {
                self.registry
                    .counter(&self.name, &[(self.tag_name.as_str(), tag_value.to_string())])
            })
            .increment(1);
    }

    /// Like [`increment`](Self::increment) but refuses empty tag values.
    pub fn try_increment(&self, tag_value: &str) -> Result<(), TagError> {
        if tag_value.is_empty() {
            return Err(TagError::Empty);
        }
        self.increment(tag_value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.read().is_empty()
    }

    pub fn contains(&self, tag_value: &str) -> bool {
        self.counters.read().contains_key(tag_value)
    }
}

pub struct SearchMetrics;

impl SearchMetrics {
    // Record success/failure of provider dispatches
    pub fn record_search_result(registry: &MeterRegistry, provider: &str, success: bool) {
        registry
            .counter(
                "search_total",
                &[
                    ("provider", provider.to_string()),
                    ("success", success.to_string()),
                ],
            )
            .increment(1);
    }

    // Record number of items returned
    pub fn record_results_count(registry: &MeterRegistry, provider: &str, count: u64) {
        registry
            .counter("search_results_total", &[("provider", provider.to_string())])
            .increment(count);
    }

    pub fn record_log_write(registry: &MeterRegistry, success: bool) {
        registry
            .counter("log_writes_total", &[("success", success.to_string())])
            .increment(1);
    }
}

/// Reads the value of `name{tag="value"}` out of a Prometheus rendering.
#[cfg(test)]
pub(crate) fn rendered_value(rendered: &str, name: &str, tag: &str, value: &str) -> Option<u64> {
    let prefix = format!("{name}{{{tag}=\"{value}\"}} ");
    rendered
        .lines()
        .find_map(|line| line.strip_prefix(&prefix))
        .and_then(|v| v.trim().parse().ok())
}
