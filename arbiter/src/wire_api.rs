// arbiter/src/wire_api.rs
//
// WAF-facing wire API.
//
// The WAF connector streams each transaction's phases to Arbiter and asks
// for a verdict before letting the request (or response) through:
//
//   send_req_line_and_headers → send_request_body → ... → check
//
// Dispatch ops reply with a status code as soon as the models are launched.
// `check` blocks until every model dispatched for the transaction finished,
// then replies with the verdict. Analyzer failures never surface as
// transport errors: they come back as a non-blocking verdict with
// status_code 1 and a diagnostic message. When a TxTrace is attached, the
// transaction's captured log lines lead the verdict message.
//
// Frame format (both directions, many frames per connection):
//   [4 bytes little-endian length] [JSON payload]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::engine::coordinator::Coordinator;
use crate::events::Phase;
use crate::trace::TxTrace;

pub const MAX_FRAME: usize = 1_048_576;

pub const STATUS_OK:       i32 = 0;
pub const STATUS_REJECTED: i32 = 1;

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WafRequest {
    SendRequest {
        transaction_id: String,
        request:        String,
        model_ids:      Vec<String>,
    },
    SendReqLineAndHeaders {
        transaction_id: String,
        req_line:       String,
        req_headers:    String,
        model_ids:      Vec<String>,
    },
    SendRequestBody {
        transaction_id: String,
        body:           String,
        model_ids:      Vec<String>,
    },
    SendResponse {
        transaction_id: String,
        response:       String,
        model_ids:      Vec<String>,
    },
    SendRespLineAndHeaders {
        transaction_id: String,
        status_line:    String,
        resp_headers:   String,
        model_ids:      Vec<String>,
    },
    SendResponseBody {
        transaction_id: String,
        body:           String,
        model_ids:      Vec<String>,
    },
    Check {
        transaction_id: String,
        decision_id:    String,
        #[serde(default)]
        waf_params:     HashMap<String, String>,
    },
    Init {
        transaction_id: String,
    },
    Close {
        transaction_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReply {
    pub block:       bool,
    pub message:     String,
    pub status_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WafReply {
    Verdict(CheckReply),
    Status { status_code: i32 },
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Read one frame. Ok(None) on clean EOF between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME { anyhow::bail!("frame too large: {} bytes", len); }

    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, body: &[u8]) -> Result<()> {
    if body.len() > MAX_FRAME { anyhow::bail!("frame too large: {} bytes", body.len()); }
    w.write_all(&(body.len() as u32).to_le_bytes()).await?;
    w.write_all(body).await?;
    Ok(())
}

// ── Server ────────────────────────────────────────────────────────────────────

pub struct WireServer {
    coordinator:   Arc<Coordinator>,
    check_timeout: Option<Duration>,
    trace:         Option<Arc<TxTrace>>,
}

impl WireServer {
    pub fn new(coordinator: Arc<Coordinator>, check_timeout: Option<Duration>) -> Arc<Self> {
        Self::with_trace(coordinator, check_timeout, None)
    }

    pub fn with_trace(
        coordinator:   Arc<Coordinator>,
        check_timeout: Option<Duration>,
        trace:         Option<Arc<TxTrace>>,
    ) -> Arc<Self> {
        Arc::new(Self { coordinator, check_timeout, trace })
    }

    pub async fn serve(self: Arc<Self>, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("WAF API listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            let srv = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = srv.handle_connection(stream).await {
                    warn!("WAF API connection error from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        while let Some(body) = read_frame(&mut stream).await? {
            let req: WafRequest = serde_json::from_slice(&body)?;
            let reply = self.handle(req).await;
            write_frame(&mut stream, &serde_json::to_vec(&reply)?).await?;
        }
        Ok(())
    }

    pub async fn handle(&self, req: WafRequest) -> WafReply {
        match req {
            WafRequest::SendRequest { transaction_id, request, model_ids } => {
                self.dispatch(&transaction_id, request, &model_ids, Phase::AllRequest)
            }
            WafRequest::SendReqLineAndHeaders { transaction_id, req_line, req_headers, model_ids } => {
                self.dispatch(&transaction_id, req_line + &req_headers, &model_ids, Phase::RequestHeaders)
            }
            WafRequest::SendRequestBody { transaction_id, body, model_ids } => {
                self.dispatch(&transaction_id, body, &model_ids, Phase::RequestBody)
            }
            WafRequest::SendResponse { transaction_id, response, model_ids } => {
                self.dispatch(&transaction_id, response, &model_ids, Phase::AllResponse)
            }
            WafRequest::SendRespLineAndHeaders { transaction_id, status_line, resp_headers, model_ids } => {
                self.dispatch(&transaction_id, status_line + &resp_headers, &model_ids, Phase::ResponseHeaders)
            }
            WafRequest::SendResponseBody { transaction_id, body, model_ids } => {
                self.dispatch(&transaction_id, body, &model_ids, Phase::ResponseBody)
            }
            WafRequest::Check { transaction_id, decision_id, waf_params } => {
                WafReply::Verdict(self.check(&transaction_id, &decision_id, waf_params).await)
            }
            WafRequest::Init { transaction_id } => {
                debug!(tx = %transaction_id, "transaction opened");
                WafReply::Status { status_code: STATUS_OK }
            }
            WafRequest::Close { transaction_id } => {
                let abandoned = self.coordinator.abandon(&transaction_id);
                debug!(tx = %transaction_id, abandoned, "transaction closed");
                if let Some(ref trace) = self.trace {
                    trace.discard(&transaction_id);
                }
                WafReply::Status { status_code: STATUS_OK }
            }
        }
    }

    fn dispatch(&self, transaction_id: &str, payload: String, model_ids: &[String], phase: Phase) -> WafReply {
        let first_line = payload.lines().next().unwrap_or("");
        debug!(tx = transaction_id, %phase, "analyzing [{}...]", first_line);
        let status_code = match self.coordinator.dispatch(transaction_id, payload, model_ids, phase) {
            Ok(())  => STATUS_OK,
            Err(_)  => STATUS_REJECTED,
        };
        WafReply::Status { status_code }
    }

    async fn check(&self, transaction_id: &str, decision_id: &str, waf: HashMap<String, String>) -> CheckReply {
        let res = self.coordinator
            .check_with_deadline(transaction_id, decision_id, waf, self.check_timeout)
            .await;
        let trail = self.trace.as_ref().map(|t| t.take(transaction_id)).unwrap_or_default();
        match res {
            Ok(block) => CheckReply {
                block,
                message:     with_trail(trail, "Transaction information analyzed successfully!"),
                status_code: STATUS_OK,
            },
            Err(e) => CheckReply {
                block:       false,
                message:     with_trail(trail, &format!("Error checking transaction: {}", e)),
                status_code: STATUS_REJECTED,
            },
        }
    }
}

fn with_trail(trail: String, outcome: &str) -> String {
    if trail.is_empty() {
        outcome.to_string()
    } else {
        format!("{}\n{}", trail, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ops_use_snake_case_tags() {
        let req: WafRequest = serde_json::from_str(
            r#"{"op":"send_req_line_and_headers","transaction_id":"t","req_line":"GET / HTTP/1.1\n","req_headers":"Host: x\n","model_ids":["a"]}"#,
        ).unwrap();
        assert!(matches!(req, WafRequest::SendReqLineAndHeaders { .. }));

        let req: WafRequest = serde_json::from_str(r#"{"op":"check","transaction_id":"t","decision_id":"simple"}"#).unwrap();
        match req {
            WafRequest::Check { waf_params, .. } => assert!(waf_params.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn replies_decode_to_the_right_variant() {
        let v: WafReply = serde_json::from_str(r#"{"block":true,"message":"m","status_code":0}"#).unwrap();
        assert!(matches!(v, WafReply::Verdict(CheckReply { block: true, .. })));
        let s: WafReply = serde_json::from_str(r#"{"status_code":1}"#).unwrap();
        assert_eq!(s, WafReply::Status { status_code: 1 });
    }

    #[tokio::test]
    async fn check_reply_leads_with_the_transaction_trail() {
        use crate::analyzers::Catalog;
        use crate::config::Config;
        use tracing_subscriber::prelude::*;

        let trace = TxTrace::new();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(trace.layer()));

        let config = Config::from_yaml(
            "model_plugins:\n  - id: t\n    plugin: trivial\n    plugin_type: Everything\n\
             decision_plugins:\n  - id: simple\n    plugin: simple\n",
        ).unwrap();
        let server = WireServer::with_trace(
            crate::build(&config, &Catalog::builtin()), None, Some(Arc::clone(&trace)),
        );

        let r = server.handle(WafRequest::SendRequest {
            transaction_id: "tr".into(),
            request:        "GET / HTTP/1.1\n\n".into(),
            model_ids:      vec!["t".into()],
        }).await;
        assert_eq!(r, WafReply::Status { status_code: STATUS_OK });

        let v = match server.handle(WafRequest::Check {
            transaction_id: "tr".into(),
            decision_id:    "simple".into(),
            waf_params:     HashMap::new(),
        }).await {
            WafReply::Verdict(v) => v,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(v.status_code, STATUS_OK);
        assert!(v.message.contains("transaction checked"));
        assert!(v.message.ends_with("\nTransaction information analyzed successfully!"));
        assert_eq!(trace.n_transactions(), 0);
    }

    #[tokio::test]
    async fn frames_round_trip_and_reject_oversize() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        write_frame(&mut a, b"{\"op\":\"init\",\"transaction_id\":\"t\"}").await.unwrap();
        drop(a);
        let body = read_frame(&mut b).await.unwrap().unwrap();
        assert!(body.starts_with(b"{\"op\""));
        assert!(read_frame(&mut b).await.unwrap().is_none());

        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_FRAME as u32) + 1).to_le_bytes()).await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }
}
