// arbiter/tests/wire_server.rs
//
// WAF wire API over a real TCP socket: framing, phase ops, check replies
// and the error-as-verdict contract.

use std::time::Duration;

use serde_json::json;
use tokio::net::{TcpListener, TcpStream};

use arbiter::analyzers::Catalog;
use arbiter::config::Config;
use arbiter::wire_api::{read_frame, write_frame, CheckReply, WafReply, WireServer, STATUS_OK, STATUS_REJECTED};

const CONFIG: &str = r#"
log_level: debug
check_timeout_ms: 400
model_plugins:
  - id: sqli
    plugin: keyword
    weight: 1
    threshold: 0.5
    plugin_type: Everything
    params:
      patterns: "union select, or 1=1, sleep("
      saturation: "1"
  - id: headers
    plugin: trivial
    plugin_type: RequestHeaders
  - id: slow
    plugin: delayed
    plugin_type: Everything
    params:
      delay_ms: "2000"
  - id: ghost
    plugin: not_in_catalog
    plugin_type: Everything
decision_plugins:
  - id: simple
    plugin: simple
  - id: broken
    plugin: failing
"#;

async fn start() -> TcpStream {
    let config = Config::from_yaml(CONFIG).unwrap();
    let coordinator = arbiter::build(&config, &Catalog::builtin());
    let server = WireServer::new(coordinator, config.check_timeout_ms.map(Duration::from_millis));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_on(listener));
    TcpStream::connect(addr).await.unwrap()
}

async fn call(stream: &mut TcpStream, req: serde_json::Value) -> WafReply {
    write_frame(stream, &serde_json::to_vec(&req).unwrap()).await.unwrap();
    let body = read_frame(stream).await.unwrap().expect("server closed connection");
    serde_json::from_slice(&body).unwrap()
}

async fn verdict(stream: &mut TcpStream, req: serde_json::Value) -> CheckReply {
    match call(stream, req).await {
        WafReply::Verdict(v) => v,
        other => panic!("expected verdict, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_in_parts_blocks_on_injection() {
    let mut s = start().await;

    let r = call(&mut s, json!({"op": "init", "transaction_id": "t1"})).await;
    assert_eq!(r, WafReply::Status { status_code: STATUS_OK });

    let r = call(&mut s, json!({
        "op": "send_req_line_and_headers", "transaction_id": "t1",
        "req_line": "POST /login HTTP/1.1\n", "req_headers": "Host: example.com\n",
        "model_ids": ["headers"],
    })).await;
    assert_eq!(r, WafReply::Status { status_code: STATUS_OK });

    let r = call(&mut s, json!({
        "op": "send_request_body", "transaction_id": "t1",
        "body": "user=admin' OR 1=1 --", "model_ids": ["sqli"],
    })).await;
    assert_eq!(r, WafReply::Status { status_code: STATUS_OK });

    let v = verdict(&mut s, json!({
        "op": "check", "transaction_id": "t1", "decision_id": "simple",
        "waf_params": {"anomalyscore": "50", "inboundthreshold": "10"},
    })).await;
    assert_eq!(v.status_code, STATUS_OK);
    assert!(v.block);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn whole_response_passes() {
    let mut s = start().await;
    call(&mut s, json!({
        "op": "send_response", "transaction_id": "r1",
        "response": "HTTP/1.1 200 OK\nContent-Type: text/html\n\n<h1>Hello</h1>",
        "model_ids": ["sqli"],
    })).await;
    let v = verdict(&mut s, json!({"op": "check", "transaction_id": "r1", "decision_id": "simple"})).await;
    assert_eq!(v.status_code, STATUS_OK);
    assert!(!v.block);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn analyzer_faults_come_back_as_verdicts() {
    let mut s = start().await;

    // unknown transaction
    let v = verdict(&mut s, json!({"op": "check", "transaction_id": "nope", "decision_id": "simple"})).await;
    assert_eq!((v.block, v.status_code), (false, STATUS_REJECTED));
    assert!(v.message.contains("does not exist"));

    // unloaded model + failing decision
    call(&mut s, json!({
        "op": "send_request", "transaction_id": "t2",
        "request": "GET / HTTP/1.1\n\n", "model_ids": ["ghost", "sqli"],
    })).await;
    let v = verdict(&mut s, json!({"op": "check", "transaction_id": "t2", "decision_id": "broken"})).await;
    assert_eq!((v.block, v.status_code), (false, STATUS_REJECTED));
    assert!(v.message.contains("decision failed"));

    // the connection is still usable afterwards
    let r = call(&mut s, json!({"op": "close", "transaction_id": "t2"})).await;
    assert_eq!(r, WafReply::Status { status_code: STATUS_OK });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn check_deadline_replies_without_blocking() {
    let mut s = start().await;
    call(&mut s, json!({
        "op": "send_request", "transaction_id": "t3",
        "request": "GET / HTTP/1.1\n\n", "model_ids": ["slow"],
    })).await;
    let v = tokio::time::timeout(
        Duration::from_secs(1),
        verdict(&mut s, json!({"op": "check", "transaction_id": "t3", "decision_id": "simple"})),
    ).await.unwrap();
    assert_eq!((v.block, v.status_code), (false, STATUS_REJECTED));
    assert!(v.message.contains("timed out"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn response_phase_parts_join_the_same_transaction() {
    let mut s = start().await;
    call(&mut s, json!({
        "op": "send_resp_line_and_headers", "transaction_id": "t4",
        "status_line": "HTTP/1.1 200 OK\n", "resp_headers": "Server: x\n",
        "model_ids": ["sqli"],
    })).await;
    call(&mut s, json!({
        "op": "send_response_body", "transaction_id": "t4",
        "body": "<html></html>", "model_ids": ["sqli"],
    })).await;
    let v = verdict(&mut s, json!({"op": "check", "transaction_id": "t4", "decision_id": "simple"})).await;
    assert_eq!(v.status_code, STATUS_OK);
}
