//! Snapshot loaders.
//!
//! A [`Loader`] turns one remote asset (a per-region item or a global
//! dataset) into a [`LoadResult`]. Provider variants form a closed
//! strategy set behind the single trait, selected by a
//! [`LoaderRegistry`] keyed on collection id.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    remote_zip::{self, FetchArchiveError, LayerDecoder},
    stac::{StacClient, StacError},
    LoadResult, Session, Snapshot,
};

/// Errors that occur while loading a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Catalog lookup failed.
    #[error(transparent)]
    Stac(#[from] StacError),

    /// Archive download, extraction or decoding failed.
    #[error(transparent)]
    Archive(#[from] FetchArchiveError),
}

/// Produces snapshots for one collection.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Collection id this loader serves.
    fn collection(&self) -> &str;

    /// Name of the organization publishing this collection, recorded as
    /// provenance alongside synced data.
    fn provider(&self) -> &str;

    /// OAuth scope the provider requires for this collection, if any.
    fn scope(&self) -> Option<&str>;

    /// Fetches and decodes the current snapshot of `asset_id`.
    async fn load(
        &self,
        asset_id: &str,
        session: &Session,
        decoder: &dyn LayerDecoder,
    ) -> Result<LoadResult, LoadError>;

    /// The asset's last-updated time as reported by the provider,
    /// without downloading its data. Schedulers use this to decide
    /// whether a re-fetch is warranted.
    async fn last_updated(
        &self,
        asset_id: &str,
        session: &Session,
    ) -> Result<Option<DateTime<Utc>>, LoadError>;
}

/// Loader for STAC-catalogued collections where each item carries one
/// zip archive as its `data` asset.
#[derive(Debug, Clone)]
pub struct StacLoader {
    api_root: String,
    collection: String,
    scope: Option<String>,
}

impl StacLoader {
    pub fn new(
        api_root: impl Into<String>,
        collection: impl Into<String>,
        scope: Option<&str>,
    ) -> Self {
        Self {
            api_root: api_root.into(),
            collection: collection.into(),
            scope: scope.map(str::to_owned),
        }
    }

    async fn get_item(
        &self,
        asset_id: &str,
        session: &Session,
    ) -> Result<crate::stac::Item, LoadError> {
        let client = StacClient::open(&self.api_root, session.client().clone())?;
        Ok(client.get_item(&self.collection, asset_id).await?)
    }
}

#[async_trait]
impl Loader for StacLoader {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn provider(&self) -> &str {
        "Lantmäteriet"
    }

    fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    #[tracing::instrument(skip(self, session, decoder), fields(collection = %self.collection), err)]
    async fn load(
        &self,
        asset_id: &str,
        session: &Session,
        decoder: &dyn LayerDecoder,
    ) -> Result<LoadResult, LoadError> {
        let item = self.get_item(asset_id, session).await?;
        let href = item.data_href()?;

        let layers = remote_zip::load_remote_zip(href, session, decoder).await?;

        Ok(LoadResult {
            remote_updated: item.properties.updated,
            layers,
        })
    }

    #[tracing::instrument(skip(self, session), fields(collection = %self.collection), err)]
    async fn last_updated(
        &self,
        asset_id: &str,
        session: &Session,
    ) -> Result<Option<DateTime<Utc>>, LoadError> {
        let item = self.get_item(asset_id, session).await?;
        Ok(item.properties.updated)
    }
}

/// How an SMHI SVAR collection is published.
#[derive(Debug, Clone)]
enum SvarSource {
    /// A zip archive with one payload file.
    Zip(String),
    /// A WFS GeoJSON export, fetched as a single file.
    Wfs(String),
}

/// Loader for the SMHI SVAR hydrography collections.
///
/// These are nationwide datasets with open downloads: no catalog item,
/// no OAuth scope, and no per-asset freshness signal. Each collection
/// carries its own identity-column rule, applied to every decoded layer
/// after the fetch.
#[derive(Debug, Clone)]
pub struct SvarLoader {
    collection: String,
    identity_column: String,
    source: SvarSource,
}

impl SvarLoader {
    fn new(
        collection: impl Into<String>,
        identity_column: impl Into<String>,
        source: SvarSource,
    ) -> Self {
        Self {
            collection: collection.into(),
            identity_column: identity_column.into(),
            source,
        }
    }
}

#[async_trait]
impl Loader for SvarLoader {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn provider(&self) -> &str {
        "SMHI"
    }

    fn scope(&self) -> Option<&str> {
        None
    }

    #[tracing::instrument(skip(self, session, decoder), fields(collection = %self.collection), err)]
    async fn load(
        &self,
        _asset_id: &str,
        session: &Session,
        decoder: &dyn LayerDecoder,
    ) -> Result<LoadResult, LoadError> {
        let mut layers = match &self.source {
            SvarSource::Zip(url) => remote_zip::load_remote_zip(url, session, decoder).await?,
            SvarSource::Wfs(url) => {
                let name = format!("{}.json", self.collection);
                remote_zip::load_remote_file(url, &name, session, decoder).await?
            }
        };
        for snapshot in layers.values_mut() {
            select_identity(snapshot, &self.identity_column);
        }

        Ok(LoadResult {
            remote_updated: None,
            layers,
        })
    }

    async fn last_updated(
        &self,
        _asset_id: &str,
        _session: &Session,
    ) -> Result<Option<DateTime<Utc>>, LoadError> {
        // SVAR downloads carry no freshness metadata.
        Ok(None)
    }
}

/// Declares `identity_column` as the snapshot's identity, when the
/// decoded layer actually has that column. Layers without it keep no
/// identity and are skipped downstream.
fn select_identity(snapshot: &mut Snapshot, identity_column: &str) {
    snapshot.identity_column = snapshot
        .columns
        .iter()
        .any(|c| c.name == identity_column)
        .then(|| identity_column.to_owned());
}

/// Loader strategies keyed by collection id.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: BTreeMap<String, Box<dyn Loader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, loader: impl Loader + 'static) -> Self {
        self.loaders
            .insert(loader.collection().to_owned(), Box::new(loader));
        self
    }

    pub fn get(&self, collection: &str) -> Option<&dyn Loader> {
        self.loaders.get(collection).map(|l| l.as_ref())
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }

    /// The Lantmäteriet vector collections served from their STAC API.
    pub fn lantmateriet() -> Self {
        const API_ROOT: &str = "https://api.lantmateriet.se/stac-vektor/v1/";

        let collections: &[(&str, Option<&str>)] = &[
            ("fastighetsindelning", Some("ogc-features:fastighetsindelning.read")),
            ("belagenhetsadresser", None),
            ("byggnader", None),
            ("marktacke", Some("ogc-features:marktacke.read")),
            ("ortnamn", None),
            ("kommun-lan-rike", None),
        ];

        collections
            .iter()
            .fold(Self::new(), |registry, (collection, scope)| {
                registry.register(StacLoader::new(API_ROOT, *collection, *scope))
            })
    }

    /// The SMHI SVAR 2022 hydrography collections.
    pub fn smhi() -> Self {
        Self::new()
            .register(SvarLoader::new(
                "aro",
                "ARO_UUID",
                SvarSource::Zip(
                    "https://opendata-download.smhi.se/svar/SVAR2022_delavrinningsomraden.zip"
                        .to_owned(),
                ),
            ))
            .register(SvarLoader::new(
                "haro",
                "HARO",
                SvarSource::Wfs(
                    "https://opendata-view.smhi.se/SMHI_vatten_RiverBasin/HY.PhysicalWaters.Catchments/wfs\
                     ?service=wfs&request=getfeature\
                     &typeNames=SMHI_vatten_RiverBasin:HY.PhysicalWaters.Catchments\
                     &outputFormat=json"
                        .to_owned(),
                ),
            ))
    }

    /// Every known provider collection.
    pub fn known_providers() -> Self {
        Self::lantmateriet().merge(Self::smhi())
    }

    /// Combines two registries; `other`'s loaders win on collision.
    pub fn merge(mut self, other: Self) -> Self {
        self.loaders.extend(other.loaders);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_selects_by_collection_id() {
        let registry = LoaderRegistry::lantmateriet();

        let loader = registry.get("marktacke").expect("registered collection");
        assert_eq!(loader.collection(), "marktacke");
        assert_eq!(loader.scope(), Some("ogc-features:marktacke.read"));

        let open = registry.get("byggnader").expect("registered collection");
        assert_eq!(open.scope(), None);

        assert!(registry.get("unknown-collection").is_none());
    }

    #[test]
    fn registry_lists_all_lantmateriet_collections() {
        let registry = LoaderRegistry::lantmateriet();
        let collections: Vec<_> = registry.collections().collect();
        assert_eq!(
            collections,
            vec![
                "belagenhetsadresser",
                "byggnader",
                "fastighetsindelning",
                "kommun-lan-rike",
                "marktacke",
                "ortnamn",
            ]
        );
    }

    #[test]
    fn known_providers_cover_both_families() {
        let registry = LoaderRegistry::known_providers();

        let aro = registry.get("aro").expect("registered collection");
        assert_eq!(aro.provider(), "SMHI");
        assert_eq!(aro.scope(), None);

        let byggnader = registry.get("byggnader").expect("registered collection");
        assert_eq!(byggnader.provider(), "Lantmäteriet");

        assert_eq!(registry.collections().count(), 8);
    }

    #[test]
    fn select_identity_requires_the_column_to_exist() {
        use crate::{Column, ColumnType};

        let mut snapshot = Snapshot {
            layer: "aro".into(),
            identity_column: None,
            columns: vec![
                Column::new("ARO_UUID", ColumnType::Text),
                Column::new("geometry", ColumnType::Geometry),
            ],
            rows: vec![],
        };

        select_identity(&mut snapshot, "ARO_UUID");
        assert_eq!(snapshot.identity_column.as_deref(), Some("ARO_UUID"));

        select_identity(&mut snapshot, "HARO");
        assert_eq!(snapshot.identity_column, None);
    }
}
