//! Notification sinks fed by the reconciliation actions.

pub mod discussions;
pub mod rss;

use std::path::PathBuf;

use async_trait::async_trait;
use devbot_core::{Action, FeedEntry, RecordKind};
use devbot_storage::FetchError;
use thiserror::Error;

pub use discussions::{find_category, DiscussionCategory, DiscussionsClient, DiscussionsSink};
pub use rss::{FeedMeta, RssChannel, RssFeed, RssItem, RssSink};

pub const CRATE_NAME: &str = "devbot-notify";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("graphql request failed: {0}")]
    Http(#[from] FetchError),
    #[error("decoding graphql response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("graphql errors: {0}")]
    Graphql(String),
    #[error("graphql response carried no data")]
    EmptyResponse,
    #[error("discussion category '{0}' not found")]
    UnknownCategory(String),
    #[error("no discussion handle for {kind} {key}")]
    MissingHandle { kind: RecordKind, key: String },
    #[error("rss xml: {0}")]
    Xml(String),
    #[error("reading rss feed {path}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("writing rss feed {path}")]
    Write { path: PathBuf, source: anyhow::Error },
}

/// One action, with everything a sink needs to render it.
#[derive(Debug, Clone, Copy)]
pub struct Notice<'a> {
    pub kind: RecordKind,
    pub action: &'a Action,
    /// Discussion id carried on the stored record, if any.
    pub handle: Option<&'a str>,
    pub entry: &'a FeedEntry,
}

/// What a sink reports back after handling a notice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub handle: Option<String>,
    pub closed: bool,
}

impl Delivery {
    pub fn untouched() -> Self {
        Self::default()
    }

    /// Earlier sinks win the handle; any sink may confirm the close.
    pub fn merge(self, later: Delivery) -> Delivery {
        Delivery {
            handle: self.handle.or(later.handle),
            closed: self.closed || later.closed,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send {
    fn name(&self) -> &'static str;

    /// Whether handles from this sink are discussion ids. When any sink in a
    /// run does, handles from the others are not stored.
    fn assigns_handles(&self) -> bool {
        false
    }

    async fn publish(&mut self, notice: Notice<'_>) -> Result<Delivery, NotifyError>;

    /// Flushes buffered state once every kind has been dispatched.
    async fn finish(&mut self) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_first_handle() {
        let discussions = Delivery { handle: Some("D_1".into()), closed: false };
        let feed = Delivery { handle: Some("guid".into()), closed: true };
        assert_eq!(
            discussions.merge(feed),
            Delivery { handle: Some("D_1".into()), closed: true }
        );
        assert_eq!(
            Delivery::untouched().merge(Delivery { handle: Some("guid".into()), closed: false }).handle.as_deref(),
            Some("guid")
        );
    }
}
