use async_trait::async_trait;
use bookstore_core::{BookSummary, CatalogClient, CatalogError};
use bookstore_shared::BookId;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{info, warn};

/// Looks books up through the catalog service's HTTP API.
#[derive(Clone)]
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn get_book(&self, id: BookId) -> Result<Option<BookSummary>, CatalogError> {
        let url = format!("{}/api/books/{}", self.base_url, id);
        info!(book_id = id, "Fetching book from catalog service");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                warn!(book_id = id, "Book not found in catalog service");
                Ok(None)
            }
            status if status.is_success() => {
                let book = response
                    .json::<BookSummary>()
                    .await
                    .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
                Ok(Some(book))
            }
            status => Err(CatalogError::Unavailable(format!("{url} answered {status}"))),
        }
    }
}
