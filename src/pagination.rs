use crate::facebook::{FacebookApiError, FetchOutcome, GraphPage, RateLimitedFetcher};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Result of walking a cursor-paginated collection.
///
/// A fatal error stops the walk but keeps whatever was accumulated before it.
#[derive(Debug)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pages: usize,
    pub requests: usize,
    pub error: Option<FacebookApiError>,
}

impl<T> Paginated<T> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<T>, FacebookApiError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.items),
        }
    }
}

pub struct Paginator {
    fetcher: RateLimitedFetcher,
    rate_limit_sleep: Duration,
    max_retries: Option<u32>,
}

impl Paginator {
    pub fn new(fetcher: RateLimitedFetcher, rate_limit_sleep: Duration, max_retries: Option<u32>) -> Self {
        Self {
            fetcher,
            rate_limit_sleep,
            max_retries,
        }
    }

    /// Follows `paging.next` until the server stops sending one.
    ///
    /// `params` go on the first request only; next-URLs already carry them.
    pub async fn paginate<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Paginated<T> {
        let mut result = Paginated {
            items: Vec::new(),
            pages: 0,
            requests: 0,
            error: None,
        };
        let mut next_url = Some(url.to_string());

        info!(url, "Starting API request");

        while let Some(current) = next_url.take() {
            let page_params = (result.pages == 0).then_some(params);

            let page = match self.fetch_page(&current, page_params, &mut result.requests).await {
                Ok(page) => page,
                Err(e) => {
                    error!(url, page = result.pages + 1, error = %e, "Pagination aborted");
                    result.error = Some(e);
                    break;
                }
            };

            let count = page.data.len();
            for raw in page.data.iter() {
                match T::deserialize(raw) {
                    Ok(item) => result.items.push(item),
                    Err(e) => {
                        result.error = Some(FacebookApiError::InvalidResponse(e.to_string()));
                        break;
                    }
                }
            }
            if result.error.is_some() {
                error!(url, page = result.pages + 1, "Undecodable item, pagination aborted");
                break;
            }

            result.pages += 1;
            info!(page = result.pages, items = count, "Page retrieved");

            next_url = page.next_url().map(String::from);
        }

        info!(url, items = result.items.len(), requests = result.requests, "Total items retrieved");
        result
    }

    async fn fetch_page(
        &self,
        url: &str,
        params: Option<&[(&str, String)]>,
        requests: &mut usize,
    ) -> Result<GraphPage, FacebookApiError> {
        let mut retries = 0u32;
        loop {
            *requests += 1;
            match self.fetcher.fetch(url, params).await? {
                FetchOutcome::Success(page) => return Ok(page),
                FetchOutcome::RateLimited => {
                    if let Some(max) = self.max_retries {
                        if retries >= max {
                            return Err(FacebookApiError::RateLimitExhausted(retries));
                        }
                    }
                    retries += 1;
                    warn!(
                        retry = retries,
                        sleep_secs = self.rate_limit_sleep.as_secs_f64(),
                        "Rate limit hit, waiting"
                    );
                    tokio::time::sleep(self.rate_limit_sleep).await;
                }
            }
        }
    }
}
