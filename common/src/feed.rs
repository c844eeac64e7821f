// Upstream menu feed client
//
// The cafeteria publishes its menu through the webspeiseplan JSON API: one
// document with dishes grouped by week, and one with the dish categories
// whose names serve as dish titles. Both endpoints require a Referer header.

use crate::config::FeedConfig;
use crate::errors::FeedError;
use crate::models::MenuItem;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Source of the current menu
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MenuFeed: Send + Sync {
    /// Fetch every active dish the feed currently publishes, for any date
    async fn fetch_menu(&self) -> Result<Vec<MenuItem>, FeedError>;
}

#[derive(Debug, Deserialize)]
struct MenuDocument {
    success: bool,
    #[serde(default)]
    content: Vec<MenuWeek>,
}

#[derive(Debug, Deserialize)]
struct MenuWeek {
    #[serde(rename = "speiseplanGerichtData", default)]
    dishes: Vec<DishEnvelope>,
}

#[derive(Debug, Deserialize)]
struct DishEnvelope {
    #[serde(rename = "SpeiseplanAdvancedGericht")]
    dish: Dish,
}

#[derive(Debug, Deserialize)]
struct Dish {
    aktiv: bool,
    datum: String,
    #[serde(rename = "gerichtkategorieID")]
    category_id: i64,
    #[serde(rename = "gerichtname")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CategoryDocument {
    #[serde(default)]
    content: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Category {
    name: String,
    #[serde(rename = "gerichtkategorieID")]
    category_id: i64,
}

/// A dish before its category title has been looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDish {
    pub category_id: i64,
    pub description: String,
    pub source_date: NaiveDate,
}

/// Extract the active dishes from a menu document
pub fn parse_menu_document(body: &[u8]) -> Result<Vec<RawDish>, FeedError> {
    let document: MenuDocument = serde_json::from_slice(body)?;
    if !document.success {
        return Err(FeedError::Unsuccessful);
    }

    let mut dishes = Vec::new();
    for dish in document
        .content
        .into_iter()
        .flat_map(|week| week.dishes)
        .map(|envelope| envelope.dish)
        .filter(|dish| dish.aktiv)
    {
        // datum is an ISO timestamp; only the day matters
        let day = dish.datum.get(..10).unwrap_or(&dish.datum);
        let source_date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map_err(|e| FeedError::DecodeFailed(format!("bad datum '{}': {}", dish.datum, e)))?;
        dishes.push(RawDish {
            category_id: dish.category_id,
            description: dish.name,
            source_date,
        });
    }
    Ok(dishes)
}

/// Map category ids to their display names
pub fn parse_category_document(body: &[u8]) -> Result<HashMap<i64, String>, FeedError> {
    let document: CategoryDocument = serde_json::from_slice(body)?;
    Ok(document
        .content
        .into_iter()
        .map(|category| (category.category_id, category.name))
        .collect())
}

/// Attach category names as titles; unknown categories get an empty title
pub fn enrich_titles(dishes: Vec<RawDish>, titles: &HashMap<i64, String>) -> Vec<MenuItem> {
    dishes
        .into_iter()
        .map(|dish| MenuItem {
            title: titles.get(&dish.category_id).cloned().unwrap_or_default(),
            description: dish.description,
            source_date: dish.source_date,
        })
        .collect()
}

/// Dishes served on `date`, in feed order
pub fn items_for_date(items: &[MenuItem], date: NaiveDate) -> Vec<MenuItem> {
    items
        .iter()
        .filter(|item| item.source_date == date)
        .cloned()
        .collect()
}

/// HTTP client for the webspeiseplan endpoints
pub struct SpeiseplanFeed {
    client: Client,
    menu_url: String,
    category_url: String,
    referer: String,
}

impl SpeiseplanFeed {
    /// Create a feed client whose requests time out after `config.timeout_seconds`
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| FeedError::RequestFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            menu_url: config.menu_url.clone(),
            category_url: config.category_url.clone(),
            referer: config.referer.clone(),
        })
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, &self.referer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch_titles(&self) -> Result<HashMap<i64, String>, FeedError> {
        let body = self.get(&self.category_url).await?;
        parse_category_document(&body)
    }
}

#[async_trait]
impl MenuFeed for SpeiseplanFeed {
    #[instrument(skip(self))]
    async fn fetch_menu(&self) -> Result<Vec<MenuItem>, FeedError> {
        let body = self.get(&self.menu_url).await?;
        let dishes = parse_menu_document(&body)?;

        let titles = match self.fetch_titles().await {
            Ok(titles) => titles,
            Err(e) => {
                warn!(error = %e, "Dish titles unavailable, keeping dishes without titles");
                HashMap::new()
            }
        };

        let items = enrich_titles(dishes, &titles);
        debug!(count = items.len(), "Fetched menu from feed");
        Ok(items)
    }
}
