//! Facebook Graph adapter.
//!
//! `fetch` reads the feed of every target in parallel and pushes each post
//! to the session; `post` publishes to the actor's own feed.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::AdapterError;
use crate::job::{Actor, Job, PostObject, Verb};
use crate::platform::{DEFAULT_FETCH_TIMEOUT, FetchOutcome, Platform, PlatformContext};
use crate::schema::{PlatformSchema, SchemaNode, credentials_set, job_envelope};
use crate::session::{PlatformSession, credentials_for};

pub const GRAPH_API_URL: &str = "https://graph.facebook.com";

#[derive(Debug, Deserialize)]
struct FacebookCredentials {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphFeed {
    data: Option<Vec<GraphPost>>,
    error: Option<GraphError>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphUser {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphPost {
    #[serde(default)]
    from: GraphUser,
    name: Option<String>,
    link: Option<String>,
    icon: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    status_type: Option<String>,
    picture: Option<String>,
    created_time: Option<String>,
    object_id: Option<Value>,
    message: Option<String>,
    description: Option<String>,
}

impl GraphPost {
    fn into_job(self) -> Job {
        let actor = Actor {
            address: self.from.id.unwrap_or_default(),
            name: self.from.name,
            ..Default::default()
        };
        let object = PostObject {
            subject: self.name,
            link: self.link,
            icon: self.icon,
            kind: self.kind,
            status_type: self.status_type,
            image: self.picture,
            date: self.created_time,
            id: self.object_id,
            brief_text: self.message,
            text: self.description,
            ..Default::default()
        };
        Job::post_item(actor, Vec::new(), object).with_platform(FacebookPlatform::NAME)
    }
}

pub struct FacebookPlatform {
    base_url: String,
    schema: PlatformSchema,
    client: Option<Client>,
    fetch_timeout: Duration,
}

impl FacebookPlatform {
    pub const NAME: &'static str = "facebook";

    pub fn new() -> Self {
        Self::with_base_url(GRAPH_API_URL)
    }

    /// Point the adapter at another Graph endpoint.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            schema: Self::build_schema(),
            client: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    fn build_schema() -> PlatformSchema {
        let entry = SchemaNode::object()
            .closed()
            .property(
                "actor",
                SchemaNode::object()
                    .property("address", SchemaNode::string().required())
                    .property("name", SchemaNode::string()),
            )
            .property("access_token", SchemaNode::string().required());

        let fetch = job_envelope().property(
            "target",
            SchemaNode::array(
                SchemaNode::object().property("address", SchemaNode::string().required()),
            )
            .required()
            .min_items(1),
        );

        let post = job_envelope().property(
            "object",
            SchemaNode::object()
                .required()
                .property("text", SchemaNode::string().required())
                .property("link", SchemaNode::string()),
        );

        PlatformSchema::new()
            .with_verb(Verb::Set, credentials_set(entry))
            .with_verb(Verb::Fetch, fetch)
            .with_verb(Verb::Post, post)
    }

    fn client(&self) -> Result<&Client, AdapterError> {
        self.client.as_ref().ok_or(AdapterError::NotInitialized)
    }

    async fn credentials(
        &self,
        job: &Job,
        session: &dyn PlatformSession,
    ) -> Result<FacebookCredentials, AdapterError> {
        let entry = credentials_for(session, &job.actor.address).await?;
        serde_json::from_value(entry).map_err(|e| AdapterError::InvalidCredentials(e.to_string()))
    }

    async fn fetch_feed(
        &self,
        client: &Client,
        target: &str,
        access_token: &str,
    ) -> Result<Vec<GraphPost>, AdapterError> {
        let url = format!("{}/{}/feed", self.base_url, urlencoding::encode(target));
        debug!("Fetching facebook feed {}", target);

        let request = async {
            let response = client
                .get(&url)
                .query(&[("access_token", access_token)])
                .send()
                .await?;
            Ok::<_, AdapterError>(response.text().await?)
        };
        let body = tokio::time::timeout(self.fetch_timeout, request)
            .await
            .map_err(|_| AdapterError::Timeout(self.fetch_timeout))??;

        let feed: GraphFeed = serde_json::from_str(&body)?;
        if let Some(error) = feed.error {
            return Err(AdapterError::Upstream(error.message));
        }
        Ok(feed.data.unwrap_or_default())
    }
}

impl Default for FacebookPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for FacebookPlatform {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn schema(&self) -> &PlatformSchema {
        &self.schema
    }

    fn capabilities(&self) -> &'static [Verb] {
        &[Verb::Fetch, Verb::Post]
    }

    async fn init(&mut self, ctx: &PlatformContext) -> Result<(), AdapterError> {
        self.client = Some(ctx.client.clone());
        self.fetch_timeout = ctx.fetch_timeout;
        Ok(())
    }

    async fn fetch(
        &self,
        job: &Job,
        session: &dyn PlatformSession,
    ) -> Result<FetchOutcome, AdapterError> {
        if job.wants_poll() {
            return Err(AdapterError::Unsupported(
                "facebook does not support streaming fetch (object.poll)".to_string(),
            ));
        }

        let credentials = self.credentials(job, session).await?;
        if job.target.is_empty() {
            return Err(AdapterError::MissingTarget);
        }
        let client = self.client()?;

        let mut pending: FuturesUnordered<_> = job
            .target
            .iter()
            .map(|t| self.fetch_feed(client, &t.address, &credentials.access_token))
            .collect();

        // The first failing feed rejects the job; the rest are dropped.
        let mut delivered = 0;
        while let Some(result) = pending.next().await {
            for post in result? {
                session.send(post.into_job());
                delivered += 1;
            }
        }

        session.debug(&format!("fetched {} facebook item(s)", delivered));
        Ok(FetchOutcome::delivered(delivered))
    }

    async fn post(&self, job: &Job, session: &dyn PlatformSession) -> Result<Value, AdapterError> {
        session.log("facebook post called");
        let credentials = self.credentials(job, session).await?;
        let client = self.client()?;

        let text = job.object_str("text").unwrap_or_default();
        let mut form = vec![("message", text)];
        if let Some(link) = job.object_str("link") {
            form.push(("type", "link"));
            form.push(("link", link));
        }
        form.push(("access_token", credentials.access_token.as_str()));

        let url = format!(
            "{}/{}/feed",
            self.base_url,
            urlencoding::encode(&job.actor.address)
        );
        let body: Value = client.post(&url).form(&form).send().await?.json().await?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("facebook returned an error");
            return Err(AdapterError::Upstream(message.to_string()));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;

    use axum::Router;
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use serde_json::json;

    use super::*;
    use crate::http::default_client;
    use crate::job::Target;
    use crate::schema::validate;
    use crate::session::CREDENTIALS_KEY;
    use crate::session::test_support::RecordingSession;

    async fn feed(
        Path(target): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> axum::Json<Value> {
        if params.get("access_token").map(String::as_str) != Some("token1") {
            return axum::Json(json!({"error": {"message": "Invalid OAuth access token."}}));
        }
        let body = match target.as_str() {
            "me" => json!({"data": [
                {"from": {"id": "10", "name": "Alice"}, "message": "hi", "type": "status", "created_time": "2013-01-01"},
                {"from": {"id": "11", "name": "Bob"}, "message": "yo", "link": "http://x", "type": "link"}
            ]}),
            "page" => json!({"data": [
                {"from": {"id": "12", "name": "Page"}, "description": "news"}
            ]}),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                json!({"data": []})
            }
            _ => json!({"data": []}),
        };
        axum::Json(body)
    }

    async fn post_feed(Path(actor): Path<String>, body: String) -> axum::Json<Value> {
        if !body.contains("access_token=token1") {
            return axum::Json(json!({"error": {"message": "bad token"}}));
        }
        axum::Json(json!({"id": format!("{}_1", actor), "echo": body}))
    }

    async fn spawn_graph() -> SocketAddr {
        let app = Router::new().route("/{target}/feed", get(feed).post(post_feed));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn platform(addr: SocketAddr) -> FacebookPlatform {
        let mut platform = FacebookPlatform::with_base_url(format!("http://{}", addr));
        let ctx = PlatformContext::new("worker-test", default_client().unwrap())
            .with_fetch_timeout(Duration::from_millis(500));
        platform.init(&ctx).await.unwrap();
        platform
    }

    fn session_with_token(token: &str) -> RecordingSession {
        RecordingSession::new("facebook")
            .with_config(CREDENTIALS_KEY, json!({"user1": {"access_token": token}}))
    }

    fn fetch_job(targets: &[&str]) -> Job {
        targets.iter().fold(
            Job::new("facebook", Verb::Fetch, "user1"),
            |job, t| job.with_target(Target::new(*t)),
        )
    }

    #[tokio::test]
    async fn test_fetch_fans_out_over_targets() {
        let addr = spawn_graph().await;
        let platform = platform(addr).await;
        let session = session_with_token("token1");

        let outcome = platform
            .fetch(&fetch_job(&["me", "page"]), &session)
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::delivered(3));
        let sent = session.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|j| j.verb == "post" && j.status == Some(true)));
        assert!(sent.iter().any(|j| j.actor.name.as_deref() == Some("Alice")
            && j.object["brief_text"] == "hi"));
    }

    #[tokio::test]
    async fn test_fetch_empty_feed_is_no_result() {
        let addr = spawn_graph().await;
        let platform = platform(addr).await;
        let session = session_with_token("token1");

        let outcome = platform.fetch(&fetch_job(&["empty"]), &session).await.unwrap();

        assert!(matches!(outcome, FetchOutcome::NoResult { .. }));
        assert!(session.sent().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_upstream_error_rejects() {
        let addr = spawn_graph().await;
        let platform = platform(addr).await;
        let session = session_with_token("wrong");

        let err = platform.fetch(&fetch_job(&["me"]), &session).await.unwrap_err();
        assert!(matches!(err, AdapterError::Upstream(ref m) if m.contains("Invalid OAuth")));
    }

    #[tokio::test]
    async fn test_fetch_times_out_per_target() {
        let addr = spawn_graph().await;
        let platform = platform(addr).await;
        let session = session_with_token("token1");

        let err = platform
            .fetch(&fetch_job(&["me", "slow"]), &session)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_missing_credentials_makes_no_request() {
        // Not initialized: any network attempt would fail with NotInitialized.
        let platform = FacebookPlatform::new();
        let session = RecordingSession::new("facebook");

        let err = platform.fetch(&fetch_job(&["me"]), &session).await.unwrap_err();
        assert!(matches!(err, AdapterError::MissingCredentials(ref a) if a == "user1"));
    }

    #[tokio::test]
    async fn test_fetch_poll_is_rejected() {
        let platform = FacebookPlatform::new();
        let session = session_with_token("token1");
        let job = fetch_job(&["me"]).with_object(json!({"poll": true}));

        let err = platform.fetch(&job, &session).await.unwrap_err();
        assert!(matches!(err, AdapterError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_post_publishes_form() {
        let addr = spawn_graph().await;
        let platform = platform(addr).await;
        let session = session_with_token("token1");
        let job = Job::new("facebook", Verb::Post, "user1")
            .with_object(json!({"text": "hello world", "link": "http://example.com"}));

        let result = platform.post(&job, &session).await.unwrap();

        assert_eq!(result["id"], "user1_1");
        let echo = result["echo"].as_str().unwrap();
        assert!(echo.contains("message=hello+world"));
        assert!(echo.contains("type=link"));
    }

    #[tokio::test]
    async fn test_send_unimplemented() {
        let platform = FacebookPlatform::new();
        let session = session_with_token("token1");
        let job = Job::new("facebook", Verb::Send, "user1");

        assert!(!platform.supports(Verb::Send));
        let err = platform.send(&job, &session).await.unwrap_err();
        assert_eq!(err.to_string(), "facebook.send unimplemented");
    }

    #[test]
    fn test_schema_requires_targets_for_fetch() {
        let platform = FacebookPlatform::new();
        let doc = json!({"verb": "fetch", "actor": {"address": "user1"}});

        assert!(validate(platform.schema(), Verb::Fetch, &doc).is_err());
    }

    #[test]
    fn test_schema_credentials_shape() {
        let platform = FacebookPlatform::new();
        let doc = json!({
            "verb": "set",
            "actor": {"address": "user1"},
            "object": {"credentials": {"user1": {"token": "x"}}}
        });

        assert!(validate(platform.schema(), Verb::Set, &doc).is_err());
        assert!(platform.schema().credential_entry().is_some());
    }
}
