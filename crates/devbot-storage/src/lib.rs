//! Snapshot persistence + HTTP fetch utilities for devbot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use devbot_core::{RecordKind, TrackedRecord};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "devbot-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading {kind} snapshot {path}")]
    Read {
        kind: RecordKind,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {kind} snapshot {path}")]
    Parse {
        kind: RecordKind,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("encoding {kind} snapshot")]
    Encode {
        kind: RecordKind,
        source: serde_json::Error,
    },
    #[error("writing {kind} snapshot {path}")]
    Write {
        kind: RecordKind,
        path: PathBuf,
        source: anyhow::Error,
    },
}

/// One pretty-printed JSON array per record kind under a data directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.snapshot_file())
    }

    /// Reads the last saved snapshot. A missing or malformed file is an error.
    pub async fn load<R>(&self) -> Result<Vec<R>, StoreError>
    where
        R: TrackedRecord + DeserializeOwned,
    {
        let kind = R::KIND;
        let path = self.path_for(kind);
        let bytes = fs::read(&path).await.map_err(|source| StoreError::Read {
            kind,
            path: path.clone(),
            source,
        })?;
        let records: Vec<R> =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse { kind, path: path.clone(), source })?;
        debug!(%kind, path = %path.display(), records = records.len(), "loaded snapshot");
        Ok(records)
    }

    /// Like [`RecordStore::load`], but a snapshot that was never written is empty.
    pub async fn load_or_empty<R>(&self) -> Result<Vec<R>, StoreError>
    where
        R: TrackedRecord + DeserializeOwned,
    {
        match self.load().await {
            Err(StoreError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            other => other,
        }
    }

    pub async fn exists(&self, kind: RecordKind) -> bool {
        fs::try_exists(self.path_for(kind)).await.unwrap_or(false)
    }

    /// Overwrites the snapshot through a temp file and an atomic rename.
    pub async fn save<R>(&self, records: &[R]) -> Result<PathBuf, StoreError>
    where
        R: TrackedRecord + Serialize,
    {
        let kind = R::KIND;
        let path = self.path_for(kind);
        let bytes = serde_json::to_vec_pretty(records).map_err(|source| StoreError::Encode { kind, source })?;
        write_atomically(&path, &bytes)
            .await
            .map_err(|source| StoreError::Write { kind, path: path.clone(), source })?;
        debug!(%kind, path = %path.display(), records = records.len(), "saved snapshot");
        Ok(path)
    }
}

/// Writes `bytes` next to `path` under a temp name, then renames over `path`.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!("atomically renaming {} -> {}", temp_path.display(), path.display())
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-shot HTTP client shared by the fetch adapter and the notification
/// sinks. Built once per run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET `url`; anything but `200 OK` is an error.
    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        async {
            let resp = self.client.get(url).send().await?;
            Self::into_response(resp).await
        }
        .instrument(info_span!("http_get", url))
        .await
    }

    /// POST a JSON body, optionally with a bearer token.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &T,
    ) -> Result<FetchedResponse, FetchError> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        async {
            let resp = request.send().await?;
            Self::into_response(resp).await
        }
        .instrument(info_span!("http_post", url))
        .await
    }

    async fn into_response(resp: reqwest::Response) -> Result<FetchedResponse, FetchError> {
        let status = resp.status();
        let final_url = resp.url().to_string();
        if status != StatusCode::OK {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse { status, final_url, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbot_core::{DevelopmentPermit, Multipoint, Point, RezoningApplication, StateChange, Tracking};
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_snapshot_is_an_error_unless_asked() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());

        let err = store.load::<DevelopmentPermit>().await.expect_err("missing file");
        assert!(matches!(err, StoreError::Read { .. }));
        assert!(err.to_string().contains("development-permits.json"));

        let empty: Vec<DevelopmentPermit> = store.load_or_empty().await.expect("empty");
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn malformed_snapshot_names_the_file() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        std::fs::write(store.path_for(RecordKind::RezoningApplication), b"[{\"permitnum\": ").expect("write");

        let err = store
            .load_or_empty::<RezoningApplication>()
            .await
            .expect_err("malformed json");
        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(err.to_string().contains("rezoning-application snapshot"));
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path().join("data"));
        let records = vec![DevelopmentPermit {
            permit_num: "DP1".into(),
            status_current: "Submitted".into(),
            ..Default::default()
        }];
        store.save(&records).await.expect("first save");
        store.save(&records).await.expect("second save");

        let names: Vec<_> = std::fs::read_dir(dir.path().join("data"))
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["development-permits.json".to_string()]);
    }

    #[tokio::test]
    async fn saved_records_load_back_unchanged() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());

        let permits = vec![
            DevelopmentPermit {
                point: Some(Point {
                    kind: "Point".into(),
                    coordinates: vec![-114.13992156438134, 51.02930819585162],
                }),
                permit_num: "DP2022-00156".into(),
                address: Some("2819 36 ST SW".into()),
                status_current: "Released".into(),
                decision: Some("Approval".into()),
                tracking: Tracking {
                    rss_guid: "0123456789abcdef0123456789abcdef".into(),
                    state_history: vec![
                        StateChange {
                            status: "in progress".into(),
                            timestamp: "2025-02-03T00:00:00Z".into(),
                            decision: None,
                        },
                        StateChange {
                            status: "released".into(),
                            timestamp: "2025-03-01T12:00:00Z".into(),
                            decision: Some("Approval".into()),
                        },
                    ],
                    github_discussion_id: Some("D_kwDO".into()),
                    github_discussion_closed: true,
                },
                ..Default::default()
            },
            DevelopmentPermit {
                permit_num: "DP2025-00001".into(),
                status_current: "Submitted".into(),
                ..Default::default()
            },
        ];
        store.save(&permits).await.expect("save permits");
        let loaded: Vec<DevelopmentPermit> = store.load().await.expect("load permits");
        assert_eq!(loaded, permits);

        let rezonings = vec![RezoningApplication {
            permit_num: "LOC2024-0001".into(),
            status_current: "Under Review".into(),
            multipoint: Some(Multipoint {
                kind: None,
                coordinates: vec![vec![-114.1, 51.05]],
            }),
            ..Default::default()
        }];
        store.save(&rezonings).await.expect("save rezonings");
        let loaded: Vec<RezoningApplication> = store.load().await.expect("load rezonings");
        assert_eq!(loaded, rezonings);
    }

    #[tokio::test]
    async fn error_chain_names_the_cause_once() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let err = store.load::<DevelopmentPermit>().await.expect_err("missing file");
        let cause = match &err {
            StoreError::Read { source, .. } => source.to_string(),
            other => panic!("unexpected error: {other}"),
        };

        let chained = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chained.matches(cause.as_str()).count(), 1, "{chained}");
    }
}
