//! GitHub Discussions over the GraphQL API.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use devbot_core::{ActionKind, RecordKind};
use devbot_storage::HttpFetcher;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::{Delivery, NotificationSink, Notice, NotifyError};

pub const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";

const REPOSITORY_ID_QUERY: &str = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) { id }
}"#;

const CATEGORIES_QUERY: &str = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    discussionCategories(first: 100) { nodes { id name description } }
  }
}"#;

const SEARCH_QUERY: &str = r#"
query($query: String!, $first: Int!) {
  search(query: $query, type: DISCUSSION, first: $first) {
    nodes { ... on Discussion { id title } }
  }
}"#;

const CREATE_MUTATION: &str = r#"
mutation($input: CreateDiscussionInput!) {
  createDiscussion(input: $input) { discussion { id } }
}"#;

const COMMENT_MUTATION: &str = r#"
mutation($input: AddDiscussionCommentInput!) {
  addDiscussionComment(input: $input) { comment { id } }
}"#;

const CLOSE_MUTATION: &str = r#"
mutation($input: CloseDiscussionInput!) {
  closeDiscussion(input: $input) { discussion { id } }
}"#;

#[derive(Debug, Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: JsonValue,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscussionCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdNode {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryIdData {
    repository: IdNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoriesData {
    repository: CategoriesRepository,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoriesRepository {
    discussion_categories: Nodes<DiscussionCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Nodes<T> {
    #[serde(default)]
    nodes: Vec<T>,
}

/// Search hits that are not discussions come back as `{}`.
#[derive(Debug, Default, Deserialize)]
struct SearchHit {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: Nodes<SearchHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateData {
    create_discussion: DiscussionPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentData {
    add_discussion_comment: CommentPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseData {
    close_discussion: DiscussionPayload,
}

#[derive(Debug, Deserialize)]
struct DiscussionPayload {
    discussion: IdNode,
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    comment: IdNode,
}

pub fn find_category<'a>(categories: &'a [DiscussionCategory], name: &str) -> Option<&'a DiscussionCategory> {
    categories.iter().find(|c| c.name == name)
}

/// Search string for discussions in `owner/repository` closed after `since`.
pub fn closed_since_query(owner: &str, repository: &str, since: NaiveDate) -> String {
    format!("repo:{owner}/{repository} is:closed closed:>{}", since.format("%Y-%m-%d"))
}

/// Thin GraphQL client scoped to one repository.
#[derive(Debug, Clone)]
pub struct DiscussionsClient {
    http: HttpFetcher,
    endpoint: String,
    token: String,
    owner: String,
    repository: String,
}

impl DiscussionsClient {
    pub fn new(
        http: HttpFetcher,
        token: impl Into<String>,
        owner: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: GITHUB_GRAPHQL_URL.to_string(),
            token: token.into(),
            owner: owner.into(),
            repository: repository.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn execute<T: DeserializeOwned>(&self, query: &str, variables: JsonValue) -> Result<T, NotifyError> {
        let request = GraphqlRequest { query, variables };
        let response = self.http.post_json(&self.endpoint, Some(&self.token), &request).await?;
        decode_response(&response.body)
    }

    pub async fn repository_id(&self) -> Result<String, NotifyError> {
        let data: RepositoryIdData = self
            .execute(REPOSITORY_ID_QUERY, json!({ "owner": self.owner, "name": self.repository }))
            .await?;
        Ok(data.repository.id)
    }

    pub async fn categories(&self) -> Result<Vec<DiscussionCategory>, NotifyError> {
        let data: CategoriesData = self
            .execute(CATEGORIES_QUERY, json!({ "owner": self.owner, "name": self.repository }))
            .await?;
        Ok(data.repository.discussion_categories.nodes)
    }

    async fn search(&self, query: String, first: u32) -> Result<Vec<SearchHit>, NotifyError> {
        let data: SearchData = self
            .execute(SEARCH_QUERY, json!({ "query": query, "first": first }))
            .await?;
        Ok(data.search.nodes)
    }

    /// Id of the discussion whose title is exactly `title`.
    pub async fn find_by_title(&self, title: &str) -> Result<Option<String>, NotifyError> {
        let query = format!("repo:{}/{} in:title {title}", self.owner, self.repository);
        let hits = self.search(query, 10).await?;
        Ok(hits
            .into_iter()
            .find(|hit| hit.title.as_deref() == Some(title))
            .and_then(|hit| hit.id))
    }

    /// Titles of discussions closed within the last `window_days` days.
    pub async fn recently_closed(&self, today: NaiveDate, window_days: u64) -> Result<Vec<String>, NotifyError> {
        let since = today.checked_sub_days(Days::new(window_days)).unwrap_or(today);
        let hits = self
            .search(closed_since_query(&self.owner, &self.repository, since), 100)
            .await?;
        Ok(hits.into_iter().filter_map(|hit| hit.title).collect())
    }

    pub async fn create(
        &self,
        repository_id: &str,
        category_id: &str,
        title: &str,
        body: &str,
    ) -> Result<String, NotifyError> {
        let input = json!({
            "repositoryId": repository_id,
            "categoryId": category_id,
            "title": title,
            "body": body,
        });
        let data: CreateData = self.execute(CREATE_MUTATION, json!({ "input": input })).await?;
        Ok(data.create_discussion.discussion.id)
    }

    /// Reuses an existing discussion with the same title, so re-running a
    /// CREATE never duplicates.
    pub async fn find_or_create(
        &self,
        repository_id: &str,
        category_id: &str,
        title: &str,
        body: &str,
    ) -> Result<String, NotifyError> {
        if let Some(id) = self.find_by_title(title).await? {
            debug!(title, id, "discussion already exists");
            return Ok(id);
        }
        let id = self.create(repository_id, category_id, title, body).await?;
        info!(title, id, "created discussion");
        Ok(id)
    }

    pub async fn comment(&self, discussion_id: &str, body: &str) -> Result<String, NotifyError> {
        let input = json!({ "discussionId": discussion_id, "body": body });
        let data: CommentData = self.execute(COMMENT_MUTATION, json!({ "input": input })).await?;
        Ok(data.add_discussion_comment.comment.id)
    }

    pub async fn close(&self, discussion_id: &str) -> Result<(), NotifyError> {
        let input = json!({ "discussionId": discussion_id });
        let _: CloseData = self.execute(CLOSE_MUTATION, json!({ "input": input })).await?;
        Ok(())
    }
}

fn decode_response<T: DeserializeOwned>(body: &[u8]) -> Result<T, NotifyError> {
    let response: GraphqlResponse<T> = serde_json::from_slice(body)?;
    if !response.errors.is_empty() {
        let messages: Vec<_> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(NotifyError::Graphql(messages.join("; ")));
    }
    response.data.ok_or(NotifyError::EmptyResponse)
}

/// Discussions sink with the repository and category ids resolved up front.
#[derive(Debug)]
pub struct DiscussionsSink {
    client: DiscussionsClient,
    repository_id: String,
    categories: HashMap<RecordKind, String>,
}

impl DiscussionsSink {
    pub async fn connect(
        client: DiscussionsClient,
        category_names: &[(RecordKind, String)],
    ) -> Result<Self, NotifyError> {
        let repository_id = client.repository_id().await?;
        let available = client.categories().await?;
        let mut categories = HashMap::new();
        for (kind, name) in category_names {
            let category = find_category(&available, name).ok_or_else(|| NotifyError::UnknownCategory(name.clone()))?;
            categories.insert(*kind, category.id.clone());
        }
        info!(repository_id, categories = categories.len(), "connected to discussions");
        Ok(Self {
            client,
            repository_id,
            categories,
        })
    }

    fn require_handle<'a>(notice: &Notice<'a>) -> Result<&'a str, NotifyError> {
        notice
            .handle
            .filter(|h| !h.is_empty())
            .ok_or_else(|| NotifyError::MissingHandle {
                kind: notice.kind,
                key: notice.action.key.clone(),
            })
    }
}

#[async_trait]
impl NotificationSink for DiscussionsSink {
    fn name(&self) -> &'static str {
        "discussions"
    }

    fn assigns_handles(&self) -> bool {
        true
    }

    async fn publish(&mut self, notice: Notice<'_>) -> Result<Delivery, NotifyError> {
        let action = notice.action;
        if action.kind == ActionKind::Skip {
            return Ok(Delivery::untouched());
        }
        let Some(category) = self.categories.get(&notice.kind) else {
            warn!(kind = %notice.kind, key = %action.key, action = %action.kind, "no discussion category for kind; not posting");
            return Ok(Delivery::untouched());
        };
        match action.kind {
            ActionKind::Create => {
                let id = self
                    .client
                    .find_or_create(&self.repository_id, category, &action.key, &action.message)
                    .await?;
                Ok(Delivery { handle: Some(id), closed: false })
            }
            ActionKind::Update => {
                let id = Self::require_handle(&notice)?;
                self.client.comment(id, &action.message).await?;
                Ok(Delivery { handle: Some(id.to_string()), closed: false })
            }
            ActionKind::Close => {
                let id = Self::require_handle(&notice)?;
                self.client.comment(id, &action.message).await?;
                self.client.close(id).await?;
                info!(key = %action.key, id, "closed discussion");
                Ok(Delivery { handle: Some(id.to_string()), closed: true })
            }
            ActionKind::Skip => Ok(Delivery::untouched()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbot_core::{Action, FeedEntry};
    use devbot_storage::HttpClientConfig;

    /// Points at a closed port so any request made by mistake fails.
    fn offline_sink(categories: HashMap<RecordKind, String>) -> DiscussionsSink {
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("http client");
        DiscussionsSink {
            client: DiscussionsClient::new(http, "token", "calgary-dev", "hillhurst")
                .with_endpoint("http://127.0.0.1:9/graphql"),
            repository_id: "R_1".into(),
            categories,
        }
    }

    #[tokio::test]
    async fn unmapped_kind_is_left_alone_for_every_action() {
        let mut sink = offline_sink(HashMap::from([(RecordKind::DevelopmentPermit, "DIC_1".to_string())]));
        let entry = FeedEntry::default();
        for kind in [ActionKind::Create, ActionKind::Update, ActionKind::Close] {
            let action = Action {
                key: "LOC2024-0001".into(),
                kind,
                message: "Status updated".into(),
            };
            let notice = Notice {
                kind: RecordKind::RezoningApplication,
                action: &action,
                handle: Some("0123456789abcdef0123456789abcdef"),
                entry: &entry,
            };
            let delivery = sink.publish(notice).await.expect("no request made");
            assert_eq!(delivery, Delivery::untouched(), "{kind}");
        }
        assert!(sink.assigns_handles());
    }

    #[test]
    fn closed_query_uses_cutoff_date() {
        let since = NaiveDate::from_ymd_opt(2025, 6, 17).expect("date");
        assert_eq!(
            closed_since_query("calgary-dev", "hillhurst", since),
            "repo:calgary-dev/hillhurst is:closed closed:>2025-06-17"
        );
    }

    #[test]
    fn category_lookup_is_exact() {
        let categories = vec![
            DiscussionCategory { id: "C1".into(), name: "Development Permits".into(), description: None },
            DiscussionCategory { id: "C2".into(), name: "Rezoning".into(), description: Some("LOC files".into()) },
        ];
        assert_eq!(find_category(&categories, "Rezoning").map(|c| c.id.as_str()), Some("C2"));
        assert!(find_category(&categories, "rezoning").is_none());
    }

    #[test]
    fn graphql_errors_surface() {
        let body = br#"{"data": null, "errors": [{"message": "Bad credentials"}, {"message": "again"}]}"#;
        let err = decode_response::<RepositoryIdData>(body).expect_err("errors");
        assert_eq!(err.to_string(), "graphql errors: Bad credentials; again");
    }

    #[test]
    fn search_hits_tolerate_non_discussions() {
        let body = br#"{"data": {"search": {"nodes": [{}, {"id": "D_1", "title": "DP2025-00001"}]}}}"#;
        let data: SearchData = decode_response(body).expect("decode");
        let titles: Vec<_> = data.search.nodes.into_iter().filter_map(|h| h.title).collect();
        assert_eq!(titles, vec!["DP2025-00001"]);
    }

    #[test]
    fn categories_decode_from_camel_case() {
        let body = br#"{"data": {"repository": {"discussionCategories": {"nodes": [
            {"id": "DIC_1", "name": "Development Permits", "description": "DP files"}
        ]}}}}"#;
        let data: CategoriesData = decode_response(body).expect("decode");
        assert_eq!(data.repository.discussion_categories.nodes[0].id, "DIC_1");
    }

    #[test]
    fn missing_data_is_an_error() {
        let err = decode_response::<CloseData>(br#"{}"#).expect_err("no data");
        assert!(matches!(err, NotifyError::EmptyResponse));
    }
}
