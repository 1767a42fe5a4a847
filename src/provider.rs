use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Free-text keywords for one search, space delimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub keywords: String,
}

impl SearchRequest {
    pub fn new(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
        }
    }

    /// Terms split on single spaces, empty terms included.
    pub fn terms(&self) -> std::str::Split<'_, char> {
        self.keywords.split(' ')
    }
}

/// Ordered provider items, passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchResult(pub Vec<Value>);

impl SearchResult {
    pub fn items(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult, SearchError>;
}

// Body of the recent-search endpoint; only `data` is kept
#[derive(Deserialize)]
struct RecentSearchResponse {
    #[serde(default)]
    data: Vec<Value>,
}

pub struct TwitterSearch {
    client: reqwest::Client,
    api_url: url::Url,
    bearer_token: String,
    max_results: u32,
}

impl TwitterSearch {
    pub fn new(
        api_url: url::Url,
        bearer_token: impl Into<String>,
        max_results: u32,
    ) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_url,
            bearer_token: bearer_token.into(),
            max_results,
        })
    }

    fn search_url(&self, keywords: &str) -> url::Url {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .append_pair("query", keywords)
            .append_pair("max_results", &self.max_results.to_string());
        url
    }

    pub fn parse_response(body: &str) -> Result<SearchResult, SearchError> {
        serde_json::from_str::<RecentSearchResponse>(body)
            .map(|response| SearchResult(response.data))
            .map_err(|e| SearchError::ParsingError(e.to_string()))
    }
}

#[async_trait]
impl SearchProvider for TwitterSearch {
    fn name(&self) -> &'static str {
        "Twitter"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult, SearchError> {
        let response = self
            .client
            .get(self.search_url(&request.keywords))
            .bearer_auth(&self.bearer_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SearchError::StatusError { status, body });
        }

        Self::parse_response(&body)
    }
}
