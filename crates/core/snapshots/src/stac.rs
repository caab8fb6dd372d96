//! Minimal STAC catalog client.
//!
//! Only models the fields the sync pipeline consumes: item identity,
//! the `data` asset's download link, the `updated` timestamp, and the
//! item's own link. Full catalog traversal is an external concern.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

/// Errors from STAC catalog lookups.
#[derive(Debug, thiserror::Error)]
pub enum StacError {
    /// The catalog endpoint could not be reached or returned an error status.
    #[error("STAC request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The item document was not valid STAC JSON.
    #[error("malformed STAC item at {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The item has no `data` asset to download.
    #[error("STAC item '{item}' has no 'data' asset")]
    MissingDataAsset { item: String },

    /// The API root is not a valid base URL.
    #[error("invalid STAC API root: {0}")]
    InvalidRoot(#[from] url::ParseError),
}

/// A STAC item, reduced to the consumed fields.
#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub assets: HashMap<String, Asset>,
    #[serde(default)]
    pub properties: ItemProperties,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemProperties {
    /// When the provider last updated the item's data.
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

impl Item {
    /// Download link of the `data` asset.
    pub fn data_href(&self) -> Result<&str, StacError> {
        self.assets
            .get("data")
            .map(|a| a.href.as_str())
            .ok_or_else(|| StacError::MissingDataAsset {
                item: self.id.clone(),
            })
    }

    /// The item's own canonical link, if the catalog provides one.
    pub fn self_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "self")
            .map(|l| l.href.as_str())
    }
}

/// Client for one STAC API root.
#[derive(Debug, Clone)]
pub struct StacClient {
    root: Url,
    http: reqwest::Client,
}

impl StacClient {
    pub fn open(root: &str, http: reqwest::Client) -> Result<Self, StacError> {
        Ok(Self {
            root: Url::parse(root)?,
            http,
        })
    }

    /// Fetches one item from a collection.
    #[tracing::instrument(skip(self), err)]
    pub async fn get_item(&self, collection: &str, item_id: &str) -> Result<Item, StacError> {
        let url = self
            .root
            .join(&format!("collections/{collection}/items/{item_id}"))?;

        self.http
            .get(url.clone())
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|source| StacError::Request {
                url: url.to_string(),
                source,
            })?
            .json()
            .await
            .map_err(|source| StacError::Decode {
                url: url.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_decodes_consumed_fields() {
        let doc = serde_json::json!({
            "type": "Feature",
            "id": "2583",
            "collection": "byggnader",
            "properties": { "updated": "2026-03-01T06:30:00Z" },
            "assets": { "data": { "href": "https://example.test/2583.zip" } },
            "links": [
                { "rel": "self", "href": "https://example.test/items/2583" }
            ]
        });

        let item: Item = serde_json::from_value(doc).expect("valid item");

        assert_eq!(item.id, "2583");
        assert_eq!(item.data_href().unwrap(), "https://example.test/2583.zip");
        assert_eq!(item.self_href(), Some("https://example.test/items/2583"));
        assert!(item.properties.updated.is_some());
    }

    #[test]
    fn item_without_data_asset_is_an_error() {
        let doc = serde_json::json!({
            "type": "Feature",
            "id": "2583",
            "properties": {},
            "assets": {},
            "links": []
        });

        let item: Item = serde_json::from_value(doc).expect("valid item");
        assert!(matches!(
            item.data_href(),
            Err(StacError::MissingDataAsset { .. })
        ));
    }
}
