//! Twitter REST v1.1 adapter.

mod models;
mod oauth;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::debug;

pub use models::Tweet;
pub use oauth::OAuthCredentials;

use crate::error::AdapterError;
use crate::job::{Job, Verb};
use crate::platform::{DEFAULT_FETCH_TIMEOUT, FetchOutcome, Platform, PlatformContext};
use crate::schema::{PlatformSchema, SchemaNode, credentials_set, job_envelope};
use crate::session::{PlatformSession, credentials_for};
use models::ApiErrors;

pub const TWITTER_API_URL: &str = "https://api.twitter.com/1.1";

const POLL_DEGRADED: &str = "streaming fetch is not supported by twitter, performed a single fetch";

pub struct TwitterPlatform {
    base_url: String,
    schema: PlatformSchema,
    client: Option<Client>,
    fetch_timeout: Duration,
}

impl TwitterPlatform {
    pub const NAME: &'static str = "twitter";

    pub fn new() -> Self {
        Self::with_base_url(TWITTER_API_URL)
    }

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
                    .closed()
                    .property("name", SchemaNode::string())
                    .property("address", SchemaNode::string()),
            )
            .property("consumer_key", SchemaNode::string().required())
            .property("consumer_secret", SchemaNode::string().required())
            .property("access_token", SchemaNode::string().required())
            .property("access_token_secret", SchemaNode::string().required());

        let post = job_envelope().property(
            "object",
            SchemaNode::object()
                .required()
                .property("text", SchemaNode::string().required().min_length(1)),
        );

        PlatformSchema::new()
            .with_verb(Verb::Set, credentials_set(entry))
            .with_verb(Verb::Post, post)
    }

    fn client(&self) -> Result<&Client, AdapterError> {
        self.client.as_ref().ok_or(AdapterError::NotInitialized)
    }

    async fn credentials(
        &self,
        job: &Job,
        session: &dyn PlatformSession,
    ) -> Result<OAuthCredentials, AdapterError> {
        let entry = credentials_for(session, &job.actor.address).await?;
        let credentials: OAuthCredentials = serde_json::from_value(entry)
            .map_err(|_| AdapterError::InvalidCredentials("twitter credentials incomplete".to_string()))?;
        if !credentials.is_complete() {
            return Err(AdapterError::InvalidCredentials(
                "twitter credentials incomplete".to_string(),
            ));
        }
        Ok(credentials)
    }

    /// Timeline endpoint for the first target; the home timeline when none.
    fn endpoint(job: &Job) -> String {
        match job.target.first() {
            Some(t) if t.address == "user_timeline" => "statuses/user_timeline.json".to_string(),
            Some(t) => format!("statuses/{}_timeline.json", t.address),
            None => "statuses/home_timeline.json".to_string(),
        }
    }

    fn upstream_error(body: &Value) -> Option<AdapterError> {
        body.get("errors")?;
        let message = serde_json::from_value::<ApiErrors>(body.clone())
            .map(|e| e.message())
            .unwrap_or_else(|_| body["errors"].to_string());
        Some(AdapterError::Upstream(message))
    }
}

impl Default for TwitterPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for TwitterPlatform {
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
        let credentials = self.credentials(job, session).await?;
        let client = self.client()?;

        let degraded = job.wants_poll();
        if degraded {
            session.log(POLL_DEGRADED);
        }

        let url = format!("{}/{}", self.base_url, Self::endpoint(job));
        debug!("Fetching twitter timeline {}", url);
        let auth = credentials.authorization_header("GET", &url, &[])?;

        let request = async {
            let response = client.get(&url).header(AUTHORIZATION, auth).send().await?;
            Ok::<_, AdapterError>(response.text().await?)
        };
        let body = tokio::time::timeout(self.fetch_timeout, request)
            .await
            .map_err(|_| AdapterError::Timeout(self.fetch_timeout))??;

        let body: Value = serde_json::from_str(&body)?;
        if let Some(err) = Self::upstream_error(&body) {
            return Err(err);
        }

        let tweets: Vec<Tweet> = serde_json::from_value(body)?;
        if tweets.is_empty() {
            return Ok(FetchOutcome::NoResult {
                message: "no tweets found.".to_string(),
            });
        }

        let items = tweets.len();
        for tweet in tweets {
            session.send(tweet.into_job().with_platform(Self::NAME));
        }

        Ok(FetchOutcome::Delivered {
            items,
            message: degraded.then(|| POLL_DEGRADED.to_string()),
        })
    }

    async fn post(&self, job: &Job, session: &dyn PlatformSession) -> Result<Value, AdapterError> {
        let credentials = self.credentials(job, session).await?;
        let client = self.client()?;

        let text = job.object_str("text").unwrap_or_default();
        let params = [("status", text)];
        let url = format!("{}/statuses/update.json", self.base_url);
        let auth = credentials.authorization_header("POST", &url, &params)?;

        let body: Value = client
            .post(&url)
            .header(AUTHORIZATION, auth)
            .form(&params)
            .send()
            .await?
            .json()
            .await?;

        if let Some(AdapterError::Upstream(message)) = Self::upstream_error(&body) {
            return Err(AdapterError::Upstream(format!("tweeting failed: {}", message)));
        }

        let tweet: Tweet = serde_json::from_value(body)?;
        Ok(tweet.into_job().object)
    }
}
