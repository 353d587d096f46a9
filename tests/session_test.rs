mod helpers;

use ensue::error::EnsueError;
use ensue::listing::PageRequest;
use ensue::{Reply, Session};
use helpers::{
    all_calls, calls_to, mount_discovery, mount_handshake, mount_tool, requests_for, rpc_bodies,
    test_config, text_result, tool_error, tool_list, RpcReply, TEST_KEY,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer};

async fn server_with_tools() -> MockServer {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    server
}

/// Discovery where `list_keys` advertises `schema` instead of the usual one.
async fn server_with_list_keys_schema(schema: Value) -> MockServer {
    let server = MockServer::start().await;
    mount_handshake(&server).await;
    let mut tools = tool_list();
    for tool in tools.as_array_mut().unwrap() {
        if tool["name"] == "list_keys" {
            tool["inputSchema"] = schema.clone();
        }
    }
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(RpcReply::result(json!({ "tools": tools })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn remember_creates_one_namespaced_memory() {
    let server = server_with_tools().await;
    mount_tool(&server, "create_memory", text_result(json!({ "created": 1 }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let reply = session
        .handle("remember my preferred stack is React + Postgres")
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Done { .. }));

    let bodies = rpc_bodies(&server).await;
    assert_eq!(requests_for(&bodies, "tools/list").len(), 1);
    assert_eq!(all_calls(&bodies), 1);

    let creates = calls_to(&bodies, "create_memory");
    assert_eq!(creates.len(), 1);
    let item = &creates[0]["items"][0];
    let key = item["key_name"].as_str().unwrap();
    assert!(key.starts_with("preferences/"), "{key}");
    assert!(item["value"].as_str().unwrap().contains("React + Postgres"));
    assert!(session.pending_confirmation().is_none());
}

#[tokio::test]
async fn delete_declined_issues_no_call() {
    let server = server_with_tools().await;
    mount_tool(&server, "delete_memory", text_result(json!({ "deleted": 1 }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let Reply::ConfirmationRequired(proposal) = session.handle("delete notes/jan").await.unwrap() else {
        panic!("expected a confirmation prompt");
    };
    assert_eq!(proposal.identifiers, vec!["notes/jan"]);
    assert!(proposal.prompt().contains("notes/jan"));

    let reply = session.confirm(&proposal.token, "no").await.unwrap();
    assert!(matches!(reply, Reply::Cancelled(_)));

    let bodies = rpc_bodies(&server).await;
    assert!(calls_to(&bodies, "delete_memory").is_empty());
}

#[tokio::test]
async fn delete_confirmed_issues_exactly_one_call() {
    let server = server_with_tools().await;
    mount_tool(&server, "delete_memory", text_result(json!({ "deleted": 1 }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let Reply::ConfirmationRequired(proposal) = session.handle("delete notes/jan").await.unwrap() else {
        panic!("expected a confirmation prompt");
    };
    assert!(calls_to(&rpc_bodies(&server).await, "delete_memory").is_empty());

    let reply = session.confirm(&proposal.token, "yes").await.unwrap();
    assert!(matches!(reply, Reply::Done { .. }));

    let deletes = calls_to(&rpc_bodies(&server).await, "delete_memory");
    assert_eq!(deletes, vec![json!({ "key_names": ["notes/jan"] })]);

    // the executed action cannot be confirmed again
    assert!(session.confirm(&proposal.token, "yes").await.is_err());
    assert_eq!(calls_to(&rpc_bodies(&server).await, "delete_memory").len(), 1);
}

#[tokio::test]
async fn confirmation_is_bound_to_its_identifier_set() {
    let server = server_with_tools().await;
    mount_tool(&server, "delete_memory", text_result(json!({ "deleted": 1 }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let Reply::ConfirmationRequired(first) = session.handle("delete notes/jan").await.unwrap() else {
        panic!("expected a confirmation prompt");
    };
    let Reply::ConfirmationRequired(_second) = session.handle("delete notes/feb").await.unwrap() else {
        panic!("expected a confirmation prompt");
    };

    let err = session.confirm(&first.token, "yes").await.unwrap_err();
    assert!(matches!(err, EnsueError::Confirmation(_)));
    assert!(calls_to(&rpc_bodies(&server).await, "delete_memory").is_empty());
}

#[tokio::test]
async fn list_keys_counts_first() {
    let server = server_with_tools().await;
    mount_tool(&server, "list_keys", text_result(json!({ "keys": ["notes/a"], "total": 120000 }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let reply = session.handle("list keys").await.unwrap();
    let Reply::Count { total, message } = &reply else {
        panic!("expected a count reply");
    };
    assert_eq!(*total, Some(120000));
    assert!(message.contains("120000"));
    assert!(message.contains('?'));

    let listings = calls_to(&rpc_bodies(&server).await, "list_keys");
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0]["limit"], 1);
    assert!(listings.iter().all(|a| a["limit"].as_u64().unwrap_or(0) < 100));
}

#[tokio::test]
async fn browse_pages_stay_small() {
    let server = server_with_tools().await;
    mount_tool(&server, "list_keys", text_result(json!({ "keys": ["a/1", "a/2"], "total": 2 }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let reply = session
        .browse(PageRequest::new(Some("a/".into()), 0, 500))
        .await
        .unwrap();
    let Reply::Page(page) = reply else {
        panic!("expected a page");
    };
    assert_eq!(page.keys, vec!["a/1", "a/2"]);
    assert!(!page.has_more());

    let listings = calls_to(&rpc_bodies(&server).await, "list_keys");
    assert_eq!(listings[0], json!({ "limit": 10, "offset": 0, "prefix": "a/" }));
}

#[tokio::test]
async fn unbounded_listing_schema_is_refused() {
    let server = server_with_list_keys_schema(json!({
        "type": "object",
        "properties": { "prefix": { "type": "string" }, "n": { "type": "integer" } }
    }))
    .await;
    mount_tool(&server, "list_keys", text_result(json!({ "keys": [], "total": 0 }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let err = session.handle("list keys").await.unwrap_err();
    assert!(matches!(err, EnsueError::InvalidArguments { .. }));

    let err = session
        .browse(PageRequest::new(Some("a/".into()), 0, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, EnsueError::InvalidArguments { .. }));

    assert!(calls_to(&rpc_bodies(&server).await, "list_keys").is_empty());
}

#[tokio::test]
async fn listing_about_a_topic_counts_then_searches() {
    let server = server_with_tools().await;
    mount_tool(&server, "list_keys", text_result(json!({ "keys": ["notes/a"], "total": 120000 }))).await;
    mount_tool(
        &server,
        "discover_memories",
        text_result(json!({ "results": [{ "key_name": "ops/deploy" }] })),
    )
    .await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let reply = session.handle("show memories about deployment").await.unwrap();
    let Reply::Done { tool, summary, .. } = &reply else {
        panic!("expected search results");
    };
    assert_eq!(tool, "discover_memories");
    assert!(summary.contains("120000"));
    assert!(summary.contains("ops/deploy"));

    let bodies = rpc_bodies(&server).await;
    assert_eq!(calls_to(&bodies, "list_keys"), vec![json!({ "limit": 1 })]);
    assert_eq!(
        calls_to(&bodies, "discover_memories"),
        vec![json!({ "query": "deployment", "limit": 10 })]
    );
}

#[tokio::test]
async fn missing_credential_makes_no_requests() {
    let server = MockServer::start().await;
    let mut config = test_config(&server.uri());
    config.credential = None;

    let err = Session::start(&config).err().unwrap();
    assert!(matches!(err, EnsueError::MissingCredential));
    assert!(err.to_string().contains("ENSUE_API_KEY"));
    assert!(rpc_bodies(&server).await.is_empty());
}

#[tokio::test]
async fn failed_discovery_blocks_calls_for_the_session() {
    let server = MockServer::start().await;
    mount_handshake(&server).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(RpcReply::error(-32603, "boom"))
        .mount(&server)
        .await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let err = session.handle("get notes/jan").await.unwrap_err();
    assert!(matches!(err, EnsueError::Discovery(_)));
    assert!(err.to_string().contains("boom"));

    let err = session.handle("get notes/feb").await.unwrap_err();
    assert!(matches!(err, EnsueError::Discovery(_)));

    let bodies = rpc_bodies(&server).await;
    assert_eq!(requests_for(&bodies, "tools/list").len(), 1);
    assert_eq!(all_calls(&bodies), 0);
}

#[tokio::test]
async fn discovery_runs_once_before_calls() {
    let server = server_with_tools().await;
    mount_tool(&server, "get_memory", text_result(json!({ "value": "x" }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    session.handle("get notes/a").await.unwrap();
    session.handle("get notes/b").await.unwrap();

    let bodies = rpc_bodies(&server).await;
    let methods: Vec<_> = bodies
        .iter()
        .filter_map(|b| b["method"].as_str())
        .filter(|m| m.starts_with("tools/"))
        .collect();
    assert_eq!(methods, ["tools/list", "tools/call", "tools/call"]);
    assert_eq!(requests_for(&bodies, "initialize").len(), 1);
}

#[tokio::test]
async fn batch_reports_each_item_and_survives_failures() {
    let server = server_with_tools().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": { "name": "get_memory", "arguments": { "key_names": ["notes/b"] } }
        })))
        .respond_with(tool_error("notes/b not found"))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_tool(&server, "get_memory", text_result(json!({ "value": "ok" }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let Reply::Batch(report) = session.handle("get notes/a, notes/b and notes/c").await.unwrap() else {
        panic!("expected a batch report");
    };

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.outcomes[1].label, "notes/b");
    assert!(report.outcomes[1].result.as_ref().unwrap_err().contains("not found"));
    assert!(report.outcomes[2].is_ok());
    assert_eq!(calls_to(&rpc_bodies(&server).await, "get_memory").len(), 3);
}

#[tokio::test]
async fn revoke_requires_confirmation_then_calls_once() {
    let server = server_with_tools().await;
    mount_tool(&server, "revoke_share", text_result(json!({ "revoked": true }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let reply = session
        .handle("revoke access to projects/apollo from bob")
        .await
        .unwrap();
    let Reply::ConfirmationRequired(proposal) = &reply else {
        panic!("expected a confirmation prompt");
    };
    assert_eq!(proposal.user.as_deref(), Some("bob"));
    assert!(calls_to(&rpc_bodies(&server).await, "revoke_share").is_empty());

    session.answer_pending("yes").await.unwrap();
    let revokes = calls_to(&rpc_bodies(&server).await, "revoke_share");
    assert_eq!(revokes, vec![json!({ "key_name": "projects/apollo", "user_id": "bob" })]);
}

#[tokio::test]
async fn raw_destructive_call_goes_through_the_gate() {
    let server = server_with_tools().await;
    mount_tool(&server, "delete_memory", text_result(json!({ "deleted": 2 }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let args = json!({ "key_names": ["a/1", "a/2"] }).as_object().unwrap().clone();
    let reply = session.call_raw("delete_memory", args).await.unwrap();
    assert!(matches!(reply, Reply::ConfirmationRequired(_)));
    assert!(calls_to(&rpc_bodies(&server).await, "delete_memory").is_empty());

    session.answer_pending("yes").await.unwrap();
    let deletes = calls_to(&rpc_bodies(&server).await, "delete_memory");
    assert_eq!(deletes, vec![json!({ "key_names": ["a/1", "a/2"] })]);
}

#[tokio::test]
async fn raw_revoke_resolves_aliased_user() {
    let server = server_with_tools().await;
    mount_tool(&server, "revoke_share", text_result(json!({ "revoked": true }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let nobody = json!({ "key_name": "projects/apollo" }).as_object().unwrap().clone();
    let err = session.call_raw("revoke_share", nobody).await.unwrap_err();
    assert!(matches!(err, EnsueError::InvalidArguments { .. }));
    assert!(session.pending_confirmation().is_none());

    let args = json!({ "key_name": "projects/apollo", "grantee": "bob" })
        .as_object()
        .unwrap()
        .clone();
    let Reply::ConfirmationRequired(proposal) = session.call_raw("revoke_share", args).await.unwrap() else {
        panic!("expected a confirmation prompt");
    };
    assert_eq!(proposal.user.as_deref(), Some("bob"));
    assert!(calls_to(&rpc_bodies(&server).await, "revoke_share").is_empty());

    session.answer_pending("yes").await.unwrap();
    let revokes = calls_to(&rpc_bodies(&server).await, "revoke_share");
    assert_eq!(revokes, vec![json!({ "key_name": "projects/apollo", "user_id": "bob" })]);
}

#[tokio::test]
async fn conflicting_operations_ask_instead_of_acting() {
    let server = server_with_tools().await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    for utterance in ["update or delete notes/jan", "find and delete notes/jan", "save or forget notes/x"] {
        let reply = session.handle(utterance).await.unwrap();
        assert!(matches!(reply, Reply::Clarify(_)), "{utterance}");
        assert!(session.pending_confirmation().is_none(), "{utterance}");
    }
    assert_eq!(all_calls(&rpc_bodies(&server).await), 0);
}

#[tokio::test]
async fn unmatched_request_asks_instead_of_guessing() {
    let server = server_with_tools().await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let reply = session.handle("hmm, not sure").await.unwrap();
    assert!(matches!(reply, Reply::Clarify(_)));
    assert_eq!(all_calls(&rpc_bodies(&server).await), 0);

    let reply = session.handle("delete my old stuff").await.unwrap();
    assert!(matches!(reply, Reply::Clarify(_)));
    assert!(session.pending_confirmation().is_none());
}

#[tokio::test]
async fn recall_without_key_uses_semantic_search() {
    let server = server_with_tools().await;
    mount_tool(&server, "discover_memories", text_result(json!({ "results": [] }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    session.handle("what was the database we picked?").await.unwrap();

    let searches = calls_to(&rpc_bodies(&server).await, "discover_memories");
    assert_eq!(searches, vec![json!({ "query": "the database we picked", "limit": 10 })]);
}

#[tokio::test]
async fn read_only_suppresses_capture_but_not_manual_writes() {
    let server = server_with_tools().await;
    mount_tool(&server, "create_memory", text_result(json!({ "created": 1 }))).await;

    let mut config = test_config(&server.uri());
    config.session.read_only = true;
    let mut session = Session::start(&config).unwrap();

    let reply = session.capture("user asked about deployment").await.unwrap();
    assert!(matches!(reply, Reply::Suppressed));
    assert!(rpc_bodies(&server).await.is_empty());

    session.handle("save decisions/db: we use Postgres").await.unwrap();
    assert_eq!(calls_to(&rpc_bodies(&server).await, "create_memory").len(), 1);
}

#[tokio::test]
async fn capture_writes_session_log_when_allowed() {
    let server = server_with_tools().await;
    mount_tool(&server, "create_memory", text_result(json!({ "created": 1 }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    session.capture("user asked about deployment").await.unwrap();

    let creates = calls_to(&rpc_bodies(&server).await, "create_memory");
    let key = creates[0]["items"][0]["key_name"].as_str().unwrap();
    assert!(key.starts_with("sessions/"));
}

#[tokio::test]
async fn credential_never_appears_in_replies() {
    let server = server_with_tools().await;
    mount_tool(&server, "share", text_result(json!({ "shared": true }))).await;

    let mut session = Session::start(&test_config(&server.uri())).unwrap();
    let reply = session
        .handle("share projects/apollo with alice@example.com")
        .await
        .unwrap();
    assert!(!reply.message().contains(TEST_KEY));

    let shares = calls_to(&rpc_bodies(&server).await, "share");
    assert_eq!(shares, vec![json!({ "key_name": "projects/apollo", "user_id": "alice@example.com" })]);
}
