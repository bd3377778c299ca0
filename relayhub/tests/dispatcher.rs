mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use platforms::PlatformRegistry;
use relayhub::dispatcher::{DispatchError, Dispatcher, DispatcherState};
use relayhub::listener::ListenerError;
use relayhub::outcome::FailureKind;
use relayhub::session::Outbound;
use serde_json::json;

#[tokio::test]
async fn test_schema_rejection_never_reaches_adapter() {
    let harness = Harness::new().await;
    let (session, mut rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({"rid": 1, "platform": "echo", "verb": "post", "actor": {"address": "user1"}}),
            &session,
        )
        .await;

    assert!(!result.status);
    assert_eq!(result.error_kind, Some(FailureKind::Validation));
    assert_eq!(result.rid, Some(json!(1)));
    assert_eq!(harness.call_count(), 0);

    let messages = drain(&mut rx);
    assert_eq!(messages, vec![Outbound::Result(result)]);
}

#[tokio::test]
async fn test_unknown_top_level_property_rejected() {
    let harness = Harness::new().await;
    let (session, _rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({
                "platform": "echo", "verb": "fetch", "actor": {"address": "global-user"},
                "surprise": true
            }),
            &session,
        )
        .await;

    assert_eq!(result.error_kind, Some(FailureKind::Validation));
    assert!(result.message.unwrap().contains("surprise"));
    assert_eq!(harness.call_count(), 0);
}

#[tokio::test]
async fn test_post_without_credentials() {
    let harness = Harness::new().await;
    let (session, mut rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({
                "platform": "echo", "verb": "post",
                "actor": {"address": "user1"}, "object": {"text": "hello"}
            }),
            &session,
        )
        .await;

    assert!(!result.status);
    assert_eq!(result.error_kind, Some(FailureKind::MissingCredentials));
    assert_eq!(result_count(&drain(&mut rx)), 1);
}

#[tokio::test]
async fn test_fetch_two_items_then_one_result() {
    let harness = Harness::new().await;
    let (session, mut rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({
                "rid": "f1", "platform": "echo", "verb": "fetch",
                "actor": {"address": "global-user"},
                "target": [{"address": "home_timeline"}, {"address": "mentions"}]
            }),
            &session,
        )
        .await;

    assert!(result.status);
    assert_eq!(result.items, Some(2));

    let messages = drain(&mut rx);
    let items = items(&messages);
    assert_eq!(items.len(), 2);
    for item in &items {
        assert_eq!(item.verb, "post");
        assert_eq!(item.status, Some(true));
        assert_eq!(item.platform, "echo");
    }
    assert_eq!(result_count(&messages), 1);
    // The result comes after every item.
    assert!(matches!(messages.last(), Some(Outbound::Result(_))));
}

#[tokio::test]
async fn test_fetch_without_results() {
    let harness = Harness::new().await;
    let (session, mut rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({"platform": "echo", "verb": "fetch", "actor": {"address": "global-user"}}),
            &session,
        )
        .await;

    assert!(result.is_no_result());
    assert_eq!(result.message.as_deref(), Some("no result"));

    let messages = drain(&mut rx);
    assert!(items(&messages).is_empty());
    assert_eq!(result_count(&messages), 1);
}

#[tokio::test]
async fn test_unimplemented_send_is_not_a_validation_error() {
    let harness = Harness::new().await;
    let (session, _rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({"platform": "echo", "verb": "send", "actor": {"address": "global-user"}}),
            &session,
        )
        .await;

    assert!(!result.status);
    assert_eq!(result.error_kind, Some(FailureKind::UnimplementedVerb));
    assert_eq!(result.message.as_deref(), Some("echo.send unimplemented"));
    assert_eq!(harness.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_verbs() {
    let harness = Harness::new().await;
    let (session, _rx) = harness.session("s1");

    for verb in ["update", "explode"] {
        let result = harness
            .dispatcher
            .route(
                json!({"platform": "echo", "verb": verb, "actor": {"address": "global-user"}}),
                &session,
            )
            .await;
        assert_eq!(result.error_kind, Some(FailureKind::UnknownVerb), "verb {}", verb);
    }
}

#[tokio::test]
async fn test_unknown_platform() {
    let harness = Harness::new().await;
    let (session, _rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({"platform": "myspace", "verb": "post", "actor": {"address": "user1"}}),
            &session,
        )
        .await;

    assert_eq!(result.error_kind, Some(FailureKind::UnknownPlatform));
    assert_eq!(result.platform, "myspace");
}

#[tokio::test]
async fn test_set_credentials_then_post() {
    let harness = Harness::new().await;
    let (session, mut rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({
                "platform": "echo", "verb": "set", "actor": {"address": "user1"},
                "object": {"credentials": {"user1": {"token": "abc"}}}
            }),
            &session,
        )
        .await;
    assert!(result.status);
    assert_eq!(result.message.as_deref(), Some("credentials set for 1 actor(s)"));
    assert_eq!(harness.call_count(), 0);

    let result = harness
        .dispatcher
        .route(
            json!({
                "platform": "echo", "verb": "post",
                "actor": {"address": "user1"}, "object": {"text": "hello"}
            }),
            &session,
        )
        .await;
    assert!(result.status);
    assert_eq!(result.object, Some(json!({"id": "42", "text": "hello"})));
    assert_eq!(result_count(&drain(&mut rx)), 2);

    // Credentials are per session.
    let (other, _other_rx) = harness.session("s2");
    let result = harness
        .dispatcher
        .route(
            json!({
                "platform": "echo", "verb": "post",
                "actor": {"address": "user1"}, "object": {"text": "hello"}
            }),
            &other,
        )
        .await;
    assert_eq!(result.error_kind, Some(FailureKind::MissingCredentials));
}

#[tokio::test]
async fn test_set_keeps_preloaded_credentials_of_other_actors() {
    let harness = Harness::new().await;
    let (session, _rx) = harness.session("s1");
    let post = json!({
        "platform": "echo", "verb": "post",
        "actor": {"address": "global-user"}, "object": {"text": "hello"}
    });

    assert!(harness.dispatcher.route(post.clone(), &session).await.status);

    let result = harness
        .dispatcher
        .route(
            json!({
                "platform": "echo", "verb": "set", "actor": {"address": "user2"},
                "object": {"credentials": {"user2": {"token": "abc"}}}
            }),
            &session,
        )
        .await;
    assert!(result.status);

    let result = harness.dispatcher.route(post, &session).await;
    assert!(result.status, "{:?}", result.message);
    assert_eq!(result.error_kind, None);
}

#[tokio::test]
async fn test_set_rejects_malformed_credentials() {
    let harness = Harness::new().await;
    let (session, _rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({
                "platform": "echo", "verb": "set", "actor": {"address": "user1"},
                "object": {"credentials": {"user1": {"secret": "abc"}}}
            }),
            &session,
        )
        .await;

    assert_eq!(result.error_kind, Some(FailureKind::Validation));
    assert!(result.message.unwrap().contains("job.object.credentials.user1"));
}

#[tokio::test]
async fn test_malformed_frame() {
    let harness = Harness::new().await;
    let (session, mut rx) = harness.session("s1");

    let result = harness.dispatcher.route_text("{not json", &session).await;
    assert_eq!(result.error_kind, Some(FailureKind::Validation));

    let result = harness.dispatcher.route_text("[1, 2]", &session).await;
    assert_eq!(result.error_kind, Some(FailureKind::Validation));

    assert_eq!(result_count(&drain(&mut rx)), 2);
}

#[tokio::test]
async fn test_adapter_panic_is_contained() {
    let harness = Harness::new().await;
    let (session, mut rx) = harness.session("s1");

    let result = harness
        .dispatcher
        .route(
            json!({
                "platform": "echo", "verb": "post",
                "actor": {"address": "global-user"}, "object": {"text": "panic"}
            }),
            &session,
        )
        .await;

    assert_eq!(result.error_kind, Some(FailureKind::AdapterFailure));
    assert_eq!(result_count(&drain(&mut rx)), 1);
    assert_eq!(harness.dispatcher.state(), DispatcherState::Ready);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let harness = Harness::new().await;
    let (session, _rx) = harness.session("s1");

    let first = harness.dispatcher.shutdown().await.clone();
    let second = harness.dispatcher.shutdown().await.clone();

    assert_eq!(first, second);
    assert_eq!(first.listeners, 1);
    assert!(first.store_cleaned);
    assert_eq!(harness.store.clean_count(), 1);
    assert_eq!(harness.dispatcher.state(), DispatcherState::Stopped);
    assert!(harness.dispatcher.listener("echo").unwrap().is_shut_down());

    let result = harness
        .dispatcher
        .route(
            json!({"platform": "echo", "verb": "fetch", "actor": {"address": "global-user"}}),
            &session,
        )
        .await;
    assert_eq!(result.error_kind, Some(FailureKind::DispatcherStopped));
    assert_eq!(harness.call_count(), 0);
}

#[tokio::test]
async fn test_drain_waits_for_in_flight_jobs() {
    let harness = Harness::new().await;
    let (session, mut rx) = harness.session("s1");
    let session = Arc::new(session);

    let slow = {
        let dispatcher = harness.dispatcher.clone();
        let session = session.clone();
        tokio::spawn(async move {
            dispatcher
                .route(
                    json!({
                        "platform": "echo", "verb": "post",
                        "actor": {"address": "global-user"}, "object": {"text": "slow"}
                    }),
                    &session,
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let shutdown = {
        let dispatcher = harness.dispatcher.clone();
        tokio::spawn(async move { dispatcher.shutdown().await.clone() })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let rejected = harness
        .dispatcher
        .route(
            json!({"platform": "echo", "verb": "fetch", "actor": {"address": "global-user"}}),
            &session,
        )
        .await;
    assert_eq!(rejected.error_kind, Some(FailureKind::DispatcherDraining));

    let slow = slow.await.unwrap();
    let report = shutdown.await.unwrap();

    assert!(slow.status);
    assert!(report.drained);
    assert_eq!(result_count(&drain(&mut rx)), 2);
}

#[tokio::test]
async fn test_init_fails_on_unknown_platform() {
    let mut config = config();
    config.platforms.push("myspace".to_string());
    let (ctx, _store) = context(config);

    let dispatcher = Dispatcher::new(ctx);
    let client = platforms::http::default_client().unwrap();
    let err = dispatcher
        .init(&registry(CallLog::default()), client)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Listener(ListenerError::Construct { .. })
    ));
    assert_eq!(dispatcher.state(), DispatcherState::Uninitialized);
}

#[tokio::test]
async fn test_route_before_init() {
    let (ctx, _store) = context(config());
    let dispatcher = Dispatcher::new(ctx.clone());
    let (session, _rx) = relayhub::session::Session::channel("s1", ctx.config_store().clone());

    let result = dispatcher
        .route(
            json!({"platform": "echo", "verb": "fetch", "actor": {"address": "global-user"}}),
            &session,
        )
        .await;
    assert_eq!(result.error_kind, Some(FailureKind::DispatcherStopped));

    let client = platforms::http::default_client().unwrap();
    let err = Dispatcher::new(ctx)
        .init(&PlatformRegistry::new(), client)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Listener(_)));
}
