//! Lazy listing of REST collections
//!
//! [`IterableList`] walks a bookmark-paginated collection one page at a time.
//! [`SimpleList`] reads a collection that the server returns in a single
//! array.

use super::client::{expect_status, read_json, ApiClient};
use super::error::ApiError;
use futures::stream::{self, Stream};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::marker::PhantomData;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// A resource that can be built from one collection entry
///
/// `client` is the API client that produced the record; resources offering
/// nested operations keep a clone of it.
pub trait FromApiRecord: Sized {
    /// Name used in error messages
    const RESOURCE: &'static str;

    fn from_record(record: Value, client: &ApiClient) -> Result<Self, ApiError>;
}

/// Bookmark-paginated collection cursor
///
/// Holds at most one page of not-yet-yielded records and never sends the
/// same bookmark twice. A failed request ends the listing; create a new list
/// to retry.
pub struct IterableList<T> {
    client: ApiClient,
    url: String,
    limit: usize,
    sort: Option<String>,
    filters: Vec<(String, String)>,
    bookmark: Option<String>,
    used_bookmarks: HashSet<String>,
    buffer: VecDeque<Value>,
    no_more_results: bool,
    requests: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for IterableList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterableList")
            .field("url", &self.url)
            .field("limit", &self.limit)
            .field("bookmark", &self.bookmark)
            .field("buffered", &self.buffer.len())
            .field("no_more_results", &self.no_more_results)
            .finish()
    }
}

impl<T: FromApiRecord> IterableList<T> {
    pub fn new(client: ApiClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            limit: DEFAULT_PAGE_SIZE,
            sort: None,
            filters: Vec::new(),
            bookmark: None,
            used_bookmarks: HashSet::new(),
            buffer: VecDeque::new(),
            no_more_results: false,
            requests: 0,
            _marker: PhantomData,
        }
    }

    /// Page size sent as `_limit`
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Sort key sent as `_sort`
    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    /// Extra query parameters sent with every page request
    pub fn with_filters<I, K, V>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.filters
            .extend(filters.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Page requests issued so far
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Query for the next page
    fn page_query(&self) -> Vec<(String, String)> {
        let mut query = vec![("_limit".to_string(), self.limit.to_string())];
        if let Some(bookmark) = &self.bookmark {
            query.push(("_bookmark".to_string(), bookmark.clone()));
        }
        if let Some(sort) = &self.sort {
            query.push(("_sort".to_string(), sort.clone()));
        }
        query.extend(self.filters.iter().cloned());
        query
    }

    async fn fetch_page(&mut self) -> Result<(), ApiError> {
        let query = self.page_query();
        if let Some(bookmark) = &self.bookmark {
            self.used_bookmarks.insert(bookmark.clone());
        }

        self.requests += 1;
        let response = self.client.get(&self.url, &query).await?;
        let response = expect_status(response, &[200]).await?;
        let mut page: Value = read_json(response).await?;

        let results = match page.get_mut("results").map(Value::take) {
            Some(Value::Array(results)) => results,
            Some(_) => return Err(self.malformed("results is not an array")),
            None => return Err(self.malformed("missing results")),
        };

        match page.get("bookmark") {
            Some(Value::String(bookmark)) => {
                if self.used_bookmarks.contains(bookmark) {
                    return Err(ApiError::RepeatedBookmark {
                        url: self.url.clone(),
                        bookmark: bookmark.clone(),
                    });
                }
                self.bookmark = Some(bookmark.clone());
            }
            None | Some(Value::Null) => self.no_more_results = true,
            Some(_) => return Err(self.malformed("bookmark is not a string")),
        }

        debug!(
            url = %self.url,
            records = results.len(),
            last_page = self.no_more_results,
            "Fetched page"
        );
        self.buffer = results.into();
        Ok(())
    }

    fn malformed(&self, reason: &str) -> ApiError {
        ApiError::MalformedPage {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }

    /// Next record, fetching a page when the buffer is empty
    pub async fn next(&mut self) -> Option<Result<T, ApiError>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(T::from_record(record, &self.client));
            }
            if self.no_more_results {
                return None;
            }
            if let Err(error) = self.fetch_page().await {
                self.no_more_results = true;
                self.buffer.clear();
                return Some(Err(error));
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T, ApiError>> {
        stream::unfold(self, |mut list| async move {
            list.next().await.map(|item| (item, list))
        })
    }

    /// Drain the whole collection, stopping at the first error
    pub async fn try_collect_all(mut self) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

/// Collection returned in full by one GET
pub struct SimpleList<T> {
    client: ApiClient,
    url: String,
    params: Vec<(String, String)>,
    buffer: VecDeque<Value>,
    fetched: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromApiRecord> SimpleList<T> {
    pub fn new(client: ApiClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            params: Vec::new(),
            buffer: VecDeque::new(),
            fetched: false,
            _marker: PhantomData,
        }
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    async fn fetch(&mut self) -> Result<(), ApiError> {
        let response = self.client.get(&self.url, &self.params).await?;
        let response = expect_status(response, &[200]).await?;
        match read_json(response).await? {
            Value::Array(records) => {
                self.buffer = records.into();
                Ok(())
            }
            _ => Err(ApiError::MalformedPage {
                url: self.url.clone(),
                reason: "expected an array".to_string(),
            }),
        }
    }

    pub async fn next(&mut self) -> Option<Result<T, ApiError>> {
        if !self.fetched {
            self.fetched = true;
            if let Err(error) = self.fetch().await {
                return Some(Err(error));
            }
        }
        self.buffer
            .pop_front()
            .map(|record| T::from_record(record, &self.client))
    }

    pub async fn try_collect_all(mut self) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

/// Deserialize a record that keeps no client reference
pub(crate) fn deserialize_record<T: serde::de::DeserializeOwned>(
    resource: &'static str,
    record: Value,
) -> Result<T, ApiError> {
    serde_json::from_value(record).map_err(|e| ApiError::invalid_resource(resource, e.to_string()))
}
