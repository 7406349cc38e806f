mod common;

use std::sync::{atomic::Ordering, Arc};

use common::{decode_string, dispatch, encode_string, init_tracing, CountingLocator, Scripted};
use servant::{prelude::*, protocol::OperationMode};

fn adapter_with(id: Identity) -> (Adapter, Arc<Scripted>) {
    init_tracing();
    let adapter = Adapter::new(
        "dispatch",
        AdapterConfig::default().with_dispatch(DispatchConfig::default().with_warn_dispatch(2)),
    );
    let servant = Arc::new(Scripted::default());
    adapter.add(servant.clone(), id).unwrap();
    (adapter, servant)
}

fn not_exist(id: Identity, facet: &[&str], operation: &str) -> ReplyBody {
    ReplyBody::NotExist {
        id,
        facet: facet.iter().map(|s| s.to_string()).collect(),
        operation: operation.to_string(),
    }
}

#[tokio::test]
async fn ping_on_a_registered_servant_replies_ok() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let frame = RequestFrame::new(7, Identity::named("obj1"), "ping");

    let connection = dispatch(&adapter, &frame).await;

    assert_eq!(connection.reply_count(), 1);
    assert_eq!(connection.no_response_count(), 0);
    let reply = connection.last_reply();
    assert_eq!(reply.request_id, 7);
    assert_eq!(reply.status, DispatchStatus::Ok);
    // The payload holds exactly what the servant wrote, with no identity echo.
    assert_eq!(reply.payload(), Some(&encode_string("pong")));
}

#[tokio::test]
async fn parameters_are_read_from_the_request_encapsulation() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let frame = RequestFrame::new(1, Identity::named("obj1"), "echo")
        .with_params(encode_string("marco"));

    let reply = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(reply.status, DispatchStatus::Ok);
    assert_eq!(decode_string(reply.payload().unwrap()), "marco");
}

#[tokio::test]
async fn context_and_mode_reach_the_servant() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let mut context = Context::new();
    context.insert("tx".to_string(), "42".to_string());
    let frame = RequestFrame::new(1, Identity::named("obj1"), "context")
        .with_context(context)
        .with_mode(OperationMode::Idempotent);

    let reply = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(decode_string(reply.payload().unwrap()), "42:Idempotent");
}

#[tokio::test]
async fn declared_user_exceptions_carry_the_servant_payload() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let frame = RequestFrame::new(1, Identity::named("obj1"), "declared");

    let reply = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(reply.status, DispatchStatus::UserException);
    assert_eq!(decode_string(reply.payload().unwrap()), "declared");
}

#[tokio::test]
async fn unregistered_identity_without_locator_does_not_exist() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let frame = RequestFrame::new(1, Identity::new("ghost", "db"), "ping")
        .with_facet(vec!["admin".to_string()]);

    let reply = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(reply.status, DispatchStatus::ObjectNotExist);
    assert_eq!(
        reply.body,
        not_exist(Identity::new("ghost", "db"), &["admin"], "ping")
    );
}

#[tokio::test]
async fn category_locator_returning_nothing_does_not_exist() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let locator = CountingLocator::empty();
    adapter
        .add_servant_locator(locator.clone(), "db")
        .unwrap();
    let frame = RequestFrame::new(1, Identity::new("ghost", "db"), "ping");

    let reply = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(reply.status, DispatchStatus::ObjectNotExist);
    assert_eq!(reply.body, not_exist(Identity::new("ghost", "db"), &[], "ping"));
    assert_eq!(locator.located(), 1);
    assert_eq!(locator.finished(), 0);
}

#[tokio::test]
async fn missing_facet_does_not_exist() {
    let (adapter, servant) = adapter_with(Identity::named("obj1"));
    let frame = RequestFrame::new(1, Identity::named("obj1"), "ping")
        .with_facet(vec!["admin".to_string()]);

    let reply = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(reply.status, DispatchStatus::FacetNotExist);
    assert_eq!(
        reply.body,
        not_exist(Identity::named("obj1"), &["admin"], "ping")
    );
    assert_eq!(servant.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn facets_are_dispatched_to_the_facet_servant() {
    init_tracing();
    let adapter = Adapter::new("facets", AdapterConfig::default());
    let main = Arc::new(Scripted::default());
    let admin = Arc::new(Scripted::default());
    adapter
        .add(
            Arc::new(Facets::new(main.clone()).with_facet("admin", admin.clone())),
            Identity::named("obj1"),
        )
        .unwrap();

    let frame = RequestFrame::new(1, Identity::named("obj1"), "ping")
        .with_facet(vec!["admin".to_string()]);
    let reply = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(reply.status, DispatchStatus::Ok);
    assert_eq!(main.calls.load(Ordering::SeqCst), 0);
    assert_eq!(admin.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_operations_do_not_exist() {
    let (adapter, _) = adapter_with(Identity::new("obj1", "things"));
    let frame = RequestFrame::new(1, Identity::new("obj1", "things"), "frobnicate");

    let reply = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(reply.status, DispatchStatus::OperationNotExist);
    assert_eq!(
        reply.body,
        not_exist(Identity::new("obj1", "things"), &[], "frobnicate")
    );
}

#[tokio::test]
async fn request_failures_keep_fields_set_by_the_servant() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let frame = RequestFrame::new(1, Identity::named("obj1"), "fail_deeper");

    let reply = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(reply.status, DispatchStatus::OperationNotExist);
    assert_eq!(reply.body, not_exist(Identity::named("obj1"), &[], "deeper"));
}

#[tokio::test]
async fn failures_are_classified_with_a_diagnostic() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let cases = [
        ("fail_local", DispatchStatus::UnknownLocalException, "disk on fire"),
        ("fail_user", DispatchStatus::UnknownUserException, "undeclared"),
        ("fail_unknown", DispatchStatus::UnknownException, "mystery"),
        ("panic", DispatchStatus::UnknownException, "panicked: servant exploded"),
        (
            "reserved",
            DispatchStatus::UnknownLocalException,
            "reserved status",
        ),
    ];

    for (operation, status, diagnostic) in cases {
        let frame = RequestFrame::new(1, Identity::named("obj1"), operation);
        let connection = dispatch(&adapter, &frame).await;
        assert_eq!(connection.reply_count(), 1, "{operation}");

        let reply = connection.last_reply();
        assert_eq!(reply.status, status, "{operation}");
        match reply.body {
            ReplyBody::Unknown(message) => {
                assert!(message.contains(diagnostic), "{operation}: {message}")
            }
            body => panic!("{operation}: unexpected body {body:?}"),
        }
    }
}

#[tokio::test]
async fn one_way_requests_never_send_a_response() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));

    for operation in ["ping", "fail_local", "panic", "frobnicate"] {
        let frame = RequestFrame::new(0, Identity::named("obj1"), operation);
        assert!(!frame.response_expected());
        let connection = dispatch(&adapter, &frame).await;
        assert_eq!(connection.reply_count(), 0, "{operation}");
        assert_eq!(connection.no_response_count(), 1, "{operation}");
    }

    let frame = RequestFrame::new(0, Identity::named("ghost"), "ping");
    let connection = dispatch(&adapter, &frame).await;
    assert_eq!(connection.reply_count(), 0);
    assert_eq!(connection.no_response_count(), 1);
}

#[tokio::test]
async fn remove_then_add_restores_resolution() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let frame = RequestFrame::new(1, Identity::named("obj1"), "ping");

    let before = dispatch(&adapter, &frame).await.last_reply();
    let removed = adapter.remove(&Identity::named("obj1")).unwrap();
    let missing = dispatch(&adapter, &frame).await.last_reply();
    adapter.add(removed, Identity::named("obj1")).unwrap();
    let after = dispatch(&adapter, &frame).await.last_reply();

    assert_eq!(missing.status, DispatchStatus::ObjectNotExist);
    assert_eq!(before, after);
}

#[tokio::test]
async fn malformed_headers_are_not_answered() {
    let (adapter, _) = adapter_with(Identity::named("obj1"));
    let connection = common::RecordingConnection::new();
    let body = RequestFrame::new(1, Identity::named("obj1"), "ping").encode_body();
    // Cut inside the operation name.
    let truncated = body.slice(..body.len() - 12);

    let result = Incoming::new(Some(adapter), connection.clone(), 1, true, false)
        .invoke(truncated)
        .await;

    assert!(result.is_err());
    assert_eq!(connection.reply_count(), 0);
    assert_eq!(connection.no_response_count(), 0);
}
