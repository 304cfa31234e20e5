//! Sync pipeline: fetch, annotate, reconcile, notify, persist.

pub mod config;
pub mod report;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use devbot_adapters::{OpenDataSource, SnapshotSource};
use devbot_core::{
    annotate, apply_manual_closures, derive_actions, find_by_key, find_by_key_mut, history_summary, upsert, ActionKind,
    DevelopmentPermit, RecordKind, RezoningApplication, TrackedRecord,
};
use devbot_notify::{Delivery, DiscussionsClient, DiscussionsSink, NotificationSink, Notice, RssSink};
use devbot_storage::{HttpClientConfig, HttpFetcher, RecordStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{DevbotConfig, RunMode};
pub use report::{render_summary_markdown, write_reports, KindOutcome, SyncRunSummary};

pub const CRATE_NAME: &str = "devbot-sync";

type Source<R> = Box<dyn SnapshotSource<R>>;

/// One source per record kind; a kind without a source is skipped.
pub struct Sources {
    pub permits: Option<Source<DevelopmentPermit>>,
    pub rezonings: Option<Source<RezoningApplication>>,
}

/// Sinks for one run plus the discussion titles closed by hand recently.
pub struct Notifiers {
    pub sinks: Vec<Box<dyn NotificationSink>>,
    pub closed_keys: Vec<String>,
}

impl Notifiers {
    pub fn none() -> Self {
        Self {
            sinks: Vec::new(),
            closed_keys: Vec::new(),
        }
    }
}

/// One kind's actions plus the baseline to save once the run has succeeded.
struct Reconciled<R> {
    outcome: KindOutcome,
    baseline: Vec<R>,
}

pub struct SyncPipeline {
    config: DevbotConfig,
    store: RecordStore,
    http: HttpFetcher,
    sources: Option<Sources>,
    notifiers: Option<Notifiers>,
}

impl SyncPipeline {
    pub fn new(config: DevbotConfig) -> Result<Self> {
        let store = RecordStore::new(config.data_dir.clone());
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        Ok(Self {
            config,
            store,
            http,
            sources: None,
            notifiers: None,
        })
    }

    /// Replaces the open-data sources built from config.
    pub fn with_sources(mut self, sources: Sources) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Replaces the sinks built from config.
    pub fn with_notifiers(mut self, notifiers: Notifiers) -> Self {
        self.notifiers = Some(notifiers);
        self
    }

    pub fn config(&self) -> &DevbotConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn open_data_source<R>(&self) -> Option<Source<R>>
    where
        R: TrackedRecord + DeserializeOwned + Send + 'static,
    {
        match self.config.dataset_url(R::KIND) {
            Some(url) => Some(Box::new(OpenDataSource::<R>::new(self.http.clone(), url, self.config.query()))),
            None => {
                warn!(kind = %R::KIND, "no dataset url configured; skipping");
                None
            }
        }
    }

    fn take_sources(&mut self) -> Sources {
        match self.sources.take() {
            Some(sources) => sources,
            None => Sources {
                permits: self.open_data_source(),
                rezonings: self.open_data_source(),
            },
        }
    }

    async fn open_notifiers(&mut self) -> Result<Notifiers> {
        if let Some(notifiers) = self.notifiers.take() {
            return Ok(notifiers);
        }
        let mut notifiers = Notifiers::none();

        match (&self.config.discussions, self.config.runmode) {
            (Some(_), RunMode::Development) => {
                info!("development runmode; discussions sink disabled");
            }
            (Some(settings), RunMode::Production) => {
                let Some(token) = self.config.github_token.clone() else {
                    bail!("discussions are configured but {} is not set", config::GITHUB_TOKEN_ENV);
                };
                let client = DiscussionsClient::new(
                    self.http.clone(),
                    token,
                    settings.owner.clone(),
                    settings.repository.clone(),
                );
                notifiers.closed_keys = client
                    .recently_closed(Utc::now().date_naive(), settings.closed_window_days)
                    .await
                    .context("listing recently closed discussions")?;
                let sink = DiscussionsSink::connect(client, &settings.category_names())
                    .await
                    .context("connecting to github discussions")?;
                notifiers.sinks.push(Box::new(sink));
            }
            (None, _) => {}
        }

        if let Some(rss) = &self.config.rss {
            let sink = RssSink::open(rss.path.clone(), &rss.meta(), rss.max_items)
                .await
                .with_context(|| format!("opening rss feed {}", rss.path.display()))?;
            notifiers.sinks.push(Box::new(sink));
        }
        Ok(notifiers)
    }

    /// Full run: every action is dispatched, every sink is flushed, and only
    /// then are the new baselines saved.
    pub async fn run_once(&mut self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let sources = self.take_sources();
        let mut notifiers = self.open_notifiers().await?;
        let sink_names = notifiers.sinks.iter().map(|s| s.name().to_string()).collect();

        let permits = match &sources.permits {
            Some(source) => Some(self.reconcile_kind(source.as_ref(), Some(&mut notifiers), started_at).await?),
            None => None,
        };
        let rezonings = match &sources.rezonings {
            Some(source) => Some(self.reconcile_kind(source.as_ref(), Some(&mut notifiers), started_at).await?),
            None => None,
        };

        for sink in notifiers.sinks.iter_mut() {
            sink.finish()
                .await
                .with_context(|| format!("finishing {} sink", sink.name()))?;
        }

        let mut kinds = Vec::new();
        if let Some(reconciled) = permits {
            kinds.push(self.persist(reconciled).await?);
        }
        if let Some(reconciled) = rezonings {
            kinds.push(self.persist(reconciled).await?);
        }

        let mut summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            runmode: self.config.runmode,
            neighborhood: self.config.neighborhood.name.clone(),
            sinks: sink_names,
            kinds,
            reports_dir: None,
        };
        let reports_dir = write_reports(&self.config.reports_dir, &summary).await?;
        summary.reports_dir = Some(reports_dir.display().to_string());
        info!(
            %run_id,
            create = summary.total(ActionKind::Create),
            update = summary.total(ActionKind::Update),
            close = summary.total(ActionKind::Close),
            reports = %reports_dir.display(),
            "sync run complete"
        );
        Ok(summary)
    }

    /// Dry run: fetch and diff only. Nothing is sent or saved.
    pub async fn examine(&mut self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let sources = self.take_sources();

        let mut kinds = Vec::new();
        if let Some(source) = &sources.permits {
            kinds.push(self.reconcile_kind(source.as_ref(), None, started_at).await?.outcome);
        }
        if let Some(source) = &sources.rezonings {
            kinds.push(self.reconcile_kind(source.as_ref(), None, started_at).await?.outcome);
        }

        Ok(SyncRunSummary {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            runmode: self.config.runmode,
            neighborhood: self.config.neighborhood.name.clone(),
            sinks: Vec::new(),
            kinds,
            reports_dir: None,
        })
    }

    async fn reconcile_kind<R>(
        &self,
        source: &dyn SnapshotSource<R>,
        notifiers: Option<&mut Notifiers>,
        now: DateTime<Utc>,
    ) -> Result<Reconciled<R>>
    where
        R: TrackedRecord + Serialize + DeserializeOwned + Send + 'static,
    {
        let kind = R::KIND;
        async move {
            let mut stored: Vec<R> = self
                .store
                .load()
                .await
                .with_context(|| format!("loading stored {kind} snapshot (run `devbot init` first?)"))?;

            let manual_closures = match &notifiers {
                Some(n) => apply_manual_closures(&mut stored, &n.closed_keys),
                None => 0,
            };
            if manual_closures > 0 {
                info!(manual_closures, "discussions closed by hand since last run");
            }

            let mut fetched = source
                .fetch_snapshot()
                .await
                .with_context(|| format!("fetching {kind} snapshot from {}", source.describe()))?;
            annotate(&mut fetched, &stored, now);
            let actions = derive_actions(&fetched, &stored);
            info!(fetched = fetched.len(), stored = stored.len(), actions = actions.len(), "derived actions");

            let outcome = KindOutcome {
                kind,
                source: source.describe(),
                fetched: fetched.len(),
                stored: stored.len(),
                manual_closures,
                actions,
                snapshot: None,
            };

            let Some(notifiers) = notifiers else {
                return Ok(Reconciled { outcome, baseline: Vec::new() });
            };
            let handles_from_discussions = notifiers.sinks.iter().any(|s| s.assigns_handles());

            for action in &outcome.actions {
                let Some(record) = find_by_key_mut(&mut fetched, &action.key) else {
                    continue;
                };
                let entry = record.feed_entry(now);
                let handle = record.tracking().github_discussion_id.clone();
                let notice = Notice {
                    kind,
                    action,
                    handle: handle.as_deref(),
                    entry: &entry,
                };

                let mut delivery = Delivery::untouched();
                for sink in notifiers.sinks.iter_mut() {
                    let mut delivered = sink
                        .publish(notice)
                        .await
                        .with_context(|| format!("{} sink: {} {kind} {}", sink.name(), action.kind, action.key))?;
                    if handles_from_discussions && !sink.assigns_handles() {
                        delivered.handle = None;
                    }
                    delivery = delivery.merge(delivered);
                }

                let tracking = record.tracking_mut();
                if let Some(handle) = delivery.handle {
                    tracking.github_discussion_id = Some(handle);
                }
                if delivery.closed {
                    tracking.github_discussion_closed = true;
                }
            }

            // Records that dropped out of the fetch window stay in the baseline.
            let mut baseline = stored;
            for record in fetched {
                upsert(&mut baseline, record);
            }
            Ok(Reconciled { outcome, baseline })
        }
        .instrument(info_span!("reconcile", %kind))
        .await
    }

    async fn persist<R>(&self, reconciled: Reconciled<R>) -> Result<KindOutcome>
    where
        R: TrackedRecord + Serialize,
    {
        let Reconciled { mut outcome, baseline } = reconciled;
        let path = self
            .store
            .save(&baseline)
            .await
            .with_context(|| format!("saving {} snapshot", outcome.kind))?;
        outcome.snapshot = Some(path.display().to_string());
        Ok(outcome)
    }

    /// Writes empty snapshots for kinds that have none yet.
    pub async fn init(&self) -> Result<Vec<RecordKind>> {
        let mut created = Vec::new();
        if self.init_kind::<DevelopmentPermit>().await? {
            created.push(RecordKind::DevelopmentPermit);
        }
        if self.init_kind::<RezoningApplication>().await? {
            created.push(RecordKind::RezoningApplication);
        }
        Ok(created)
    }

    async fn init_kind<R>(&self) -> Result<bool>
    where
        R: TrackedRecord + Serialize + DeserializeOwned,
    {
        let kind = R::KIND;
        if self.store.exists(kind).await {
            // Refuse to paper over a damaged snapshot.
            self.store.load::<R>().await?;
            return Ok(false);
        }
        let path = self.store.save::<R>(&[]).await?;
        info!(%kind, path = %path.display(), "created empty snapshot");
        Ok(true)
    }

    /// Lifecycle summary of one stored record.
    pub async fn history(&self, kind: RecordKind, key: &str) -> Result<String> {
        match kind {
            RecordKind::DevelopmentPermit => self.history_of::<DevelopmentPermit>(key).await,
            RecordKind::RezoningApplication => self.history_of::<RezoningApplication>(key).await,
        }
    }

    async fn history_of<R>(&self, key: &str) -> Result<String>
    where
        R: TrackedRecord + DeserializeOwned,
    {
        let records: Vec<R> = self.store.load().await?;
        let record = find_by_key(&records, key).with_context(|| format!("no stored {} {key}", R::KIND))?;
        Ok(history_summary(record))
    }
}
