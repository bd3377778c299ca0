//! Shared fixtures: an in-process adapter that records every call.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use platforms::schema::{credentials_set, job_envelope};
use platforms::{
    Actor, AdapterError, FetchOutcome, Job, Platform, PlatformRegistry, PlatformSchema,
    PlatformSession, PostObject, SchemaNode, Target, Verb, credentials_for,
};
use relayhub::config::GatewayConfig;
use relayhub::context::{WorkerContext, WorkerId};
use relayhub::dispatcher::Dispatcher;
use relayhub::session::{Outbound, OutboundReceiver, Session};
use relayhub::store::{MemoryConfigStore, MemoryStore, SharedStore, StoreError};
use serde_json::{Value, json};

pub const PLATFORM: &str = "echo";

/// Calls the recording adapter received, in order.
pub type CallLog = Arc<Mutex<Vec<(Verb, Job)>>>;

/// Emits one item per target on fetch, echoes the text on post.
///
/// `object.text == "panic"` panics, `"slow"` takes 200ms.
pub struct RecordingPlatform {
    schema: PlatformSchema,
    calls: CallLog,
}

impl RecordingPlatform {
    pub fn new(calls: CallLog) -> Self {
        let credential = SchemaNode::object().property("token", SchemaNode::string().required());
        let schema = PlatformSchema::new()
            .with_verb(Verb::Set, credentials_set(credential))
            .with_verb(Verb::Fetch, job_envelope())
            .with_verb(
                Verb::Post,
                job_envelope().property(
                    "object",
                    SchemaNode::object()
                        .required()
                        .property("text", SchemaNode::string().required()),
                ),
            );
        Self { schema, calls }
    }

    fn record(&self, verb: Verb, job: &Job) {
        self.calls.lock().push((verb, job.clone()));
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    fn name(&self) -> &'static str {
        PLATFORM
    }

    fn schema(&self) -> &PlatformSchema {
        &self.schema
    }

    fn capabilities(&self) -> &'static [Verb] {
        &[Verb::Fetch, Verb::Post]
    }

    async fn fetch(&self, job: &Job, session: &dyn PlatformSession) -> Result<FetchOutcome, AdapterError> {
        self.record(Verb::Fetch, job);
        credentials_for(session, &job.actor.address).await?;

        for (i, target) in job.target.iter().enumerate() {
            let object = PostObject {
                text: Some(format!("item {} from {}", i, target.address)),
                ..Default::default()
            };
            session.send(Job::post_item(
                Actor::new(target.address.clone()),
                vec![Target::new(job.actor.address.clone())],
                object,
            ));
        }
        Ok(FetchOutcome::delivered(job.target.len()))
    }

    async fn post(&self, job: &Job, session: &dyn PlatformSession) -> Result<Value, AdapterError> {
        self.record(Verb::Post, job);
        credentials_for(session, &job.actor.address).await?;

        match job.object_str("text") {
            Some("panic") => panic!("post handler blew up"),
            Some("slow") => tokio::time::sleep(Duration::from_millis(200)).await,
            _ => {}
        }
        Ok(json!({"id": "42", "text": job.object_str("text")}))
    }
}

/// Counts namespace cleanups on top of a [`MemoryStore`].
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub cleans: AtomicUsize,
}

impl CountingStore {
    pub fn clean_count(&self) -> usize {
        self.cleans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SharedStore for CountingStore {
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.inner.put(namespace, key, value).await
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(namespace, key).await
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.inner.remove(namespace, key).await
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(namespace).await
    }

    async fn clean(&self, namespace: &str) -> Result<usize, StoreError> {
        self.cleans.fetch_add(1, Ordering::SeqCst);
        self.inner.clean(namespace).await
    }
}

pub fn registry(calls: CallLog) -> PlatformRegistry {
    let mut registry = PlatformRegistry::new();
    registry.register(
        PLATFORM,
        Arc::new(move || Box::new(RecordingPlatform::new(calls.clone()))),
    );
    registry
}

pub fn config() -> GatewayConfig {
    GatewayConfig {
        workers: 1,
        platforms: vec![PLATFORM.to_string()],
        drain_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// A worker context over a counting store, with global credentials for
/// `global-user`.
pub fn context(config: GatewayConfig) -> (Arc<WorkerContext>, Arc<CountingStore>) {
    let store = Arc::new(CountingStore::default());
    let config_store = MemoryConfigStore::new();
    config_store.insert(
        PLATFORM,
        "credentials",
        json!({"global-user": {"token": "from-file"}}),
    );
    let ctx = WorkerContext::with_id(
        WorkerId::from("w-test"),
        0,
        config,
        store.clone(),
        Arc::new(config_store),
    );
    (Arc::new(ctx), store)
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub calls: CallLog,
    pub store: Arc<CountingStore>,
}

impl Harness {
    pub async fn new() -> Self {
        let calls = CallLog::default();
        let (ctx, store) = context(config());
        let dispatcher = Arc::new(Dispatcher::new(ctx));
        let client = platforms::http::default_client().unwrap();
        dispatcher.init(&registry(calls.clone()), client).await.unwrap();
        Self {
            dispatcher,
            calls,
            store,
        }
    }

    pub fn session(&self, id: &str) -> (Session, OutboundReceiver) {
        Session::channel(id, self.dispatcher.context().config_store().clone())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Everything queued on a session so far.
pub fn drain(rx: &mut OutboundReceiver) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

pub fn items(messages: &[Outbound]) -> Vec<&Job> {
    messages
        .iter()
        .filter_map(|m| match m {
            Outbound::Item(job) => Some(job),
            Outbound::Result(_) => None,
        })
        .collect()
}

pub fn result_count(messages: &[Outbound]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, Outbound::Result(_)))
        .count()
}
