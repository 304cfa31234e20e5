//! Snapshot sources: the City of Calgary open-data endpoint plus a
//! fixture-file source used for offline runs and tests.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use devbot_core::{RecordKind, TrackedRecord};
use devbot_storage::{FetchError, HttpFetcher};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const CRATE_NAME: &str = "devbot-adapters";

pub const DEVELOPMENT_PERMITS_URL: &str = "https://data.calgary.ca/resource/6933-unw5.json";
pub const DEFAULT_APPLIED_SINCE: &str = "2022-01-01T00:00:00.000";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid dataset url {url}")]
    InvalidUrl { url: String, source: url::ParseError },
    #[error("fetching {kind} records")]
    Fetch { kind: RecordKind, source: FetchError },
    #[error("parsing {kind} records")]
    Parse { kind: RecordKind, source: serde_json::Error },
    #[error("reading {kind} fixture {path}")]
    Fixture {
        kind: RecordKind,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Rectangle the neighbourhood's records must fall inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BoundingBox {
    pub north_latitude: f64,
    pub east_longitude: f64,
    pub south_latitude: f64,
    pub west_longitude: f64,
}

/// SoQL filter shared by both datasets.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenDataQuery {
    pub applied_since: String,
    pub bounds: BoundingBox,
}

impl OpenDataQuery {
    pub fn new(bounds: BoundingBox) -> Self {
        Self {
            applied_since: DEFAULT_APPLIED_SINCE.to_string(),
            bounds,
        }
    }

    pub fn soql(&self) -> String {
        let b = &self.bounds;
        format!(
            "SELECT * WHERE applieddate > '{}' AND latitude BETWEEN '{:.6}' AND '{:.6}' \
             AND longitude BETWEEN '{:.6}' AND '{:.6}' ORDER BY applieddate DESC",
            self.applied_since, b.south_latitude, b.north_latitude, b.west_longitude, b.east_longitude
        )
    }

    /// `dataset` with the query attached as an escaped `$query` parameter.
    pub fn url_for(&self, dataset: &str) -> Result<Url, AdapterError> {
        Url::parse_with_params(dataset, &[("$query", self.soql())]).map_err(|source| AdapterError::InvalidUrl {
            url: dataset.to_string(),
            source,
        })
    }
}

/// Parses a JSON array of upstream records for kind `R`.
pub fn parse_records<R>(bytes: &[u8]) -> Result<Vec<R>, AdapterError>
where
    R: TrackedRecord + DeserializeOwned,
{
    serde_json::from_slice(bytes).map_err(|source| AdapterError::Parse { kind: R::KIND, source })
}

/// Anything that can produce the current snapshot of one record kind.
#[async_trait]
pub trait SnapshotSource<R>: Send + Sync
where
    R: TrackedRecord + Send,
{
    fn describe(&self) -> String;

    async fn fetch_snapshot(&self) -> Result<Vec<R>, AdapterError>;
}

/// Live open-data dataset, fetched in a single request.
#[derive(Debug, Clone)]
pub struct OpenDataSource<R> {
    http: HttpFetcher,
    dataset_url: String,
    query: OpenDataQuery,
    _kind: PhantomData<fn() -> R>,
}

impl<R> OpenDataSource<R> {
    pub fn new(http: HttpFetcher, dataset_url: impl Into<String>, query: OpenDataQuery) -> Self {
        Self {
            http,
            dataset_url: dataset_url.into(),
            query,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<R> SnapshotSource<R> for OpenDataSource<R>
where
    R: TrackedRecord + DeserializeOwned + Send + 'static,
{
    fn describe(&self) -> String {
        self.dataset_url.clone()
    }

    async fn fetch_snapshot(&self) -> Result<Vec<R>, AdapterError> {
        let kind = R::KIND;
        let url = self.query.url_for(&self.dataset_url)?;
        debug!(%kind, %url, "requesting open data");
        let response = self
            .http
            .fetch_bytes(url.as_str())
            .await
            .map_err(|source| AdapterError::Fetch { kind, source })?;
        let records = parse_records::<R>(&response.body)?;
        info!(%kind, records = records.len(), bytes = response.body.len(), "fetched open data snapshot");
        Ok(records)
    }
}

/// Upstream-shaped JSON saved on disk.
#[derive(Debug, Clone)]
pub struct FixtureSource<R> {
    path: PathBuf,
    _kind: PhantomData<fn() -> R>,
}

impl<R> FixtureSource<R> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _kind: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<R> SnapshotSource<R> for FixtureSource<R>
where
    R: TrackedRecord + DeserializeOwned + Send + 'static,
{
    fn describe(&self) -> String {
        format!("fixture {}", self.path.display())
    }

    async fn fetch_snapshot(&self) -> Result<Vec<R>, AdapterError> {
        let kind = R::KIND;
        let bytes = tokio::fs::read(&self.path).await.map_err(|source| AdapterError::Fixture {
            kind,
            path: self.path.clone(),
            source,
        })?;
        let records = parse_records::<R>(&bytes)?;
        debug!(%kind, path = %self.path.display(), records = records.len(), "loaded fixture snapshot");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbot_core::{DevelopmentPermit, RezoningApplication};

    fn bounds() -> BoundingBox {
        BoundingBox {
            north_latitude: 51.0639,
            east_longitude: -114.1033,
            south_latitude: 51.0495,
            west_longitude: -114.1301,
        }
    }

    #[test]
    fn soql_orders_bounds_low_to_high() {
        let query = OpenDataQuery::new(bounds());
        assert_eq!(
            query.soql(),
            "SELECT * WHERE applieddate > '2022-01-01T00:00:00.000' AND latitude BETWEEN '51.049500' AND '51.063900' \
             AND longitude BETWEEN '-114.130100' AND '-114.103300' ORDER BY applieddate DESC"
        );
    }

    #[test]
    fn url_escapes_query_parameter() {
        let mut query = OpenDataQuery::new(bounds());
        query.applied_since = "2024-06-01T00:00:00.000".into();
        let url = query.url_for(DEVELOPMENT_PERMITS_URL).expect("url");
        assert_eq!(url.host_str(), Some("data.calgary.ca"));
        assert!(!url.as_str().contains(' '));
        let (name, value) = url.query_pairs().next().expect("query pair");
        assert_eq!(name, "$query");
        assert!(value.contains("applieddate > '2024-06-01T00:00:00.000'"));
    }

    #[test]
    fn bad_dataset_url_is_reported() {
        let err = OpenDataQuery::new(bounds()).url_for("not a url").expect_err("invalid");
        assert!(matches!(err, AdapterError::InvalidUrl { .. }));
    }

    #[test]
    fn parse_errors_name_the_kind() {
        let err = parse_records::<RezoningApplication>(br#"{"permitnum": "LOC1"}"#).expect_err("not an array");
        assert!(err.to_string().starts_with("parsing rezoning-application records"));

        let err = parse_records::<DevelopmentPermit>(br#"[{"permitnum": "DP1"}]"#).expect_err("missing status");
        assert!(matches!(err, AdapterError::Parse { kind: RecordKind::DevelopmentPermit, .. }));
    }

    #[test]
    fn empty_array_is_an_empty_snapshot() {
        let records = parse_records::<DevelopmentPermit>(b"[]").expect("parse");
        assert!(records.is_empty());
    }
}
