use crate::error::{SearchError, TagError};
use crate::metrics::{MeterRegistry, SearchMetrics, TaggedCounter};
use crate::provider::{SearchProvider, SearchRequest, SearchResult};
use crate::sink::ResultSink;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Sends a search to the provider, then taps the result into the log sink
/// and the per-keyword counters.
///
/// The taps run on their own tasks: the caller gets the provider result as
/// soon as it arrives and a failing tap never reaches it.
#[derive(Clone)]
pub struct FanOutRouter {
    provider: Arc<dyn SearchProvider>,
    sink: Arc<dyn ResultSink>,
    per_keyword: Arc<TaggedCounter>,
    metrics: MeterRegistry,
}

/// Result of a successful dispatch plus the still-running taps.
pub struct Dispatched {
    pub result: SearchResult,
    pub taps: Taps,
}

pub struct Taps {
    log: JoinHandle<()>,
    count: JoinHandle<()>,
}

impl Taps {
    /// Waits for both taps. A panicking tap is logged, not propagated.
    pub async fn join(self) {
        let (log, count) = futures::future::join(self.log, self.count).await;
        if let Err(e) = log {
            tracing::error!(error = %e, "log tap aborted");
        }
        if let Err(e) = count {
            tracing::error!(error = %e, "count tap aborted");
        }
    }
}

impl FanOutRouter {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        sink: Arc<dyn ResultSink>,
        per_keyword: Arc<TaggedCounter>,
        metrics: MeterRegistry,
    ) -> Self {
        Self {
            provider,
            sink,
            per_keyword,
            metrics,
        }
    }

    pub async fn dispatch(&self, request: SearchRequest) -> Result<Dispatched, SearchError> {
        let result = match self.provider.search(&request).await {
            Ok(result) => {
                SearchMetrics::record_search_result(&self.metrics, self.provider.name(), true);
                SearchMetrics::record_results_count(
                    &self.metrics,
                    self.provider.name(),
                    result.len() as u64,
                );
                result
            }
            Err(err) => {
                SearchMetrics::record_search_result(&self.metrics, self.provider.name(), false);
                tracing::error!(%err, provider = self.provider.name(), "search dispatch failed");
                return Err(err);
            }
        };
        tracing::debug!(
            keywords = %request.keywords,
            items = result.len(),
            "search dispatched"
        );

        let request = Arc::new(request);
        let shared = Arc::new(result.clone());
        let taps = Taps {
            log: tokio::spawn(log_tap(
                self.sink.clone(),
                self.metrics.clone(),
                request.clone(),
                shared.clone(),
            )),
            count: tokio::spawn(count_tap(self.per_keyword.clone(), request, shared)),
        };

        Ok(Dispatched { result, taps })
    }
}

async fn log_tap(
    sink: Arc<dyn ResultSink>,
    metrics: MeterRegistry,
    request: Arc<SearchRequest>,
    result: Arc<SearchResult>,
) {
    match sink.write(&request, &result).await {
        Ok(path) => {
            SearchMetrics::record_log_write(&metrics, true);
            tracing::debug!(path = %path.display(), "search result logged");
        }
        Err(err) => {
            SearchMetrics::record_log_write(&metrics, false);
            tracing::warn!(%err, keywords = %request.keywords, "failed to log search result");
        }
    }
}

async fn count_tap(
    per_keyword: Arc<TaggedCounter>,
    request: Arc<SearchRequest>,
    result: Arc<SearchResult>,
) {
    let increments = count_keywords(&per_keyword, &request, &result);
    tracing::debug!(increments, "keywords counted");
}

/// Counts every request term once per result item and returns the number of
/// increments made.
pub fn count_keywords(
    per_keyword: &TaggedCounter,
    request: &SearchRequest,
    result: &SearchResult,
) -> usize {
    result
        .items()
        .iter()
        .map(|item| count_item(per_keyword, request, item))
        .sum()
}

/// Increments the counter of each term of `request` for a single item.
///
/// Terms come from the request, not from the item.
pub fn count_item(per_keyword: &TaggedCounter, request: &SearchRequest, _item: &Value) -> usize {
    let mut increments = 0;
    for term in request.terms() {
        match per_keyword.try_increment(term) {
            Ok(()) => increments += 1,
            Err(TagError::Empty) => {
                tracing::debug!(keywords = %request.keywords, "skipping empty keyword");
            }
        }
    }
    increments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::metrics::rendered_value;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        items: usize,
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FixedProvider {
        fn returning(items: usize) -> Self {
            Self {
                items,
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                items: 0,
                fail: true,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "Fixed"
        }

        async fn search(&self, request: &SearchRequest) -> Result<SearchResult, SearchError> {
            self.calls.lock().push(request.keywords.clone());
            if self.fail {
                return Err(SearchError::ParsingError("quota exceeded".to_string()));
            }
            Ok(SearchResult(
                (0..self.items).map(|i| json!({ "id": i })).collect(),
            ))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        writes: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn write(
            &self,
            _request: &SearchRequest,
            _result: &SearchResult,
        ) -> Result<PathBuf, SinkError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SinkError::Io(std::io::Error::other("disk full")));
            }
            Ok(PathBuf::from("log/test.json"))
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl ResultSink for PanickingSink {
        async fn write(
            &self,
            _request: &SearchRequest,
            _result: &SearchResult,
        ) -> Result<PathBuf, SinkError> {
            panic!("log volume vanished");
        }
    }

    fn router(
        provider: Arc<FixedProvider>,
        sink: Arc<dyn ResultSink>,
    ) -> (FanOutRouter, Arc<TaggedCounter>, MeterRegistry) {
        let registry = MeterRegistry::new();
        let counter = Arc::new(TaggedCounter::new(
            "per_keyword_messages",
            "keyword",
            &registry,
        ));
        let router = FanOutRouter::new(provider, sink, counter.clone(), registry.clone());
        (router, counter, registry)
    }

    fn keyword_count(registry: &MeterRegistry, keyword: &str) -> Option<u64> {
        rendered_value(
            &registry.render(),
            "per_keyword_messages",
            "keyword",
            keyword,
        )
    }

    #[tokio::test]
    async fn test_each_term_counted_once_per_item() {
        let provider = Arc::new(FixedProvider::returning(3));
        let sink = Arc::new(RecordingSink::default());
        let (router, counter, registry) = router(provider, sink.clone());

        let dispatched = router.dispatch(SearchRequest::new("baby yoda")).await.unwrap();
        assert_eq!(dispatched.result.len(), 3);
        dispatched.taps.join().await;

        assert_eq!(counter.len(), 2);
        assert_eq!(keyword_count(&registry, "baby"), Some(3));
        assert_eq!(keyword_count(&registry, "yoda"), Some(3));
        assert_eq!(sink.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_runs_no_taps() {
        let provider = Arc::new(FixedProvider::failing());
        let sink = Arc::new(RecordingSink::default());
        let (router, counter, _registry) = router(provider.clone(), sink.clone());

        let err = router.dispatch(SearchRequest::new("baby yoda")).await;
        assert!(err.is_err());
        tokio::task::yield_now().await;

        assert_eq!(provider.calls.lock().len(), 1);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 0);
        assert!(counter.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_counting() {
        let provider = Arc::new(FixedProvider::returning(2));
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let (router, _counter, registry) = router(provider, sink.clone());

        let dispatched = router.dispatch(SearchRequest::new("grogu")).await.unwrap();
        assert_eq!(dispatched.result.len(), 2);
        dispatched.taps.join().await;

        assert_eq!(sink.writes.load(Ordering::SeqCst), 1);
        assert_eq!(keyword_count(&registry, "grogu"), Some(2));
        assert_eq!(
            rendered_value(&registry.render(), "log_writes_total", "success", "false"),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_panicking_sink_is_contained_in_its_task() {
        let provider = Arc::new(FixedProvider::returning(2));
        let (router, counter, registry) = router(provider, Arc::new(PanickingSink));

        let dispatched = router.dispatch(SearchRequest::new("baby yoda")).await.unwrap();
        assert_eq!(dispatched.result.len(), 2);
        dispatched.taps.join().await;

        assert_eq!(counter.len(), 2);
        assert_eq!(keyword_count(&registry, "baby"), Some(2));
        assert_eq!(keyword_count(&registry, "yoda"), Some(2));
    }

    #[tokio::test]
    async fn test_empty_keywords_still_dispatched() {
        let provider = Arc::new(FixedProvider::returning(0));
        let sink = Arc::new(RecordingSink::default());
        let (router, counter, _registry) = router(provider.clone(), sink);

        let dispatched = router.dispatch(SearchRequest::new("")).await.unwrap();
        assert!(dispatched.result.is_empty());
        dispatched.taps.join().await;

        assert_eq!(*provider.calls.lock(), vec![String::new()]);
        assert!(counter.is_empty());
    }

    #[test]
    fn test_empty_terms_are_skipped() {
        let registry = MeterRegistry::new();
        let counter = TaggedCounter::new("per_keyword_messages", "keyword", &registry);
        let result = SearchResult(vec![json!({}), json!({})]);

        let increments = count_keywords(&counter, &SearchRequest::new(" baby  yoda "), &result);

        assert_eq!(increments, 4);
        assert_eq!(counter.len(), 2);
        assert!(!counter.contains(""));
    }
}
