/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `arbiter` executor plugin.
//!
//! Diverts each DNS query to the game coordinator and shapes the response
//! according to the player's decision: resolve normally, return a bogus
//! address, stall, or deny the name exists. The coordinator blocks the call
//! for up to its internal deadline, so the HTTP client carries a slightly
//! looser one. Resolution never fails just because the coordinator is
//! unreachable; every failure path falls through to the next chain node.

use crate::config::PluginConfig;
use crate::continue_next;
use crate::core::context::DnsContext;
use crate::core::dns_utils::build_response_from_request;
use crate::core::error::{DnsError, Result};
use crate::game::Action;
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// TTL for synthesized answers.
const CORRUPT_TTL: u32 = 300;

/// How long a `delay` decision stalls the response.
const DELAY_DURATION: Duration = Duration::from_secs(5);

/// Slightly above the coordinator's 30 s admission deadline so the
/// coordinator's timeout wins over the client's.
const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 35;

#[derive(Debug, Clone, Deserialize)]
struct ArbiterConfig {
    /// Base URL of the game coordinator (e.g., "http://127.0.0.1:8080").
    server_url: String,

    /// HTTP client timeout in seconds.
    #[serde(default = "default_client_timeout")]
    timeout: u64,
}

fn default_client_timeout() -> u64 {
    DEFAULT_CLIENT_TIMEOUT_SECS
}

#[derive(Debug, Serialize)]
struct QuestionBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    qtype: &'a str,
    class: &'a str,
}

#[derive(Debug, Deserialize)]
struct DecisionBody {
    action: String,
}

#[derive(Debug)]
pub struct Arbiter {
    tag: String,
    endpoint: String,
    client: reqwest::Client,
}

#[async_trait]
impl Plugin for Arbiter {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {
        info!("arbiter {} using coordinator at {}", self.tag, self.endpoint);
    }

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for Arbiter {
    async fn execute(
        &self,
        context: &mut DnsContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        let Some(question) = context.request.queries().first().cloned() else {
            return continue_next!(next, context);
        };

        let name = question.name().to_utf8();
        let qtype = question.query_type().to_string();
        let qclass = question.query_class().to_string();

        let action = match self.request_action(&name, &qtype, &qclass).await {
            Ok(action) => action,
            Err(err) => {
                warn!(query = %name, %err, "coordinator call failed, resolving normally");
                return continue_next!(next, context);
            }
        };

        debug!(query = %name, action = %action, "coordinator decision received");

        match action {
            Action::Correct => continue_next!(next, context),
            Action::Delay => {
                tokio::time::sleep(DELAY_DURATION).await;
                continue_next!(next, context)
            }
            Action::Corrupt => {
                context.response = Some(corrupt_reply(&context.request, question.name().clone()));
                Ok(())
            }
            Action::Nxdomain => {
                context.response = Some(build_response_from_request(
                    &context.request,
                    ResponseCode::NXDomain,
                ));
                Ok(())
            }
        }
    }
}

impl Arbiter {
    /// Round-trip one question to the coordinator.
    async fn request_action(&self, name: &str, qtype: &str, qclass: &str) -> Result<Action> {
        let body = QuestionBody {
            name,
            qtype,
            class: qclass,
        };

        let response = match self
            .client
            .post(format!("{}/dnsrequest", self.endpoint))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                warn!("timed out waiting for the coordinator, defaulting to correct");
                return Ok(Action::Correct);
            }
            Err(err) => {
                return Err(DnsError::plugin(format!("coordinator unreachable: {err}")));
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(DnsError::plugin("coordinator queue is full"));
        }
        if !status.is_success() {
            return Err(DnsError::plugin(format!(
                "coordinator answered with status {status}"
            )));
        }

        let decision: DecisionBody = response
            .json()
            .await
            .map_err(|e| DnsError::plugin(format!("invalid coordinator response: {e}")))?;

        Action::parse(&decision.action).ok_or_else(|| {
            DnsError::protocol(format!("unknown coordinator action '{}'", decision.action))
        })
    }
}

/// A bogus answer: one A record pointing the queried name at localhost.
fn corrupt_reply(request: &Message, name: Name) -> Message {
    let mut response = build_response_from_request(request, ResponseCode::NoError);
    response.answers_mut().push(Record::from_rdata(
        name,
        CORRUPT_TTL,
        RData::A(A(Ipv4Addr::LOCALHOST)),
    ));
    response
}

#[derive(Debug, Clone)]
pub struct ArbiterFactory;

impl PluginFactory for ArbiterFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let config = parse_config(plugin_config)?;
        if config.server_url.trim().is_empty() {
            return Err(DnsError::plugin("arbiter requires a 'server_url'"));
        }
        Ok(())
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        _registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let config = parse_config(plugin_config)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| DnsError::plugin(format!("failed to build http client: {e}")))?;

        Ok(UninitializedPlugin::Executor(Box::new(Arbiter {
            tag: plugin_config.tag.clone(),
            endpoint: config.server_url.trim_end_matches('/').to_string(),
            client,
        })))
    }
}

fn parse_config(plugin_config: &PluginConfig) -> Result<ArbiterConfig> {
    let args = plugin_config
        .args
        .clone()
        .ok_or_else(|| DnsError::plugin("arbiter requires configuration arguments"))?;
    serde_yml::from_value::<ArbiterConfig>(args)
        .map_err(|e| DnsError::plugin(format!("failed to parse arbiter config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, Query};
    use hickory_proto::rr::RecordType;
    use std::net::SocketAddr;
    use std::str::FromStr;

    fn sample_request() -> Message {
        let mut request = Message::new();
        request.set_id(0x1234);
        request.add_query(Query::query(
            Name::from_str("example.com.").unwrap(),
            RecordType::A,
        ));
        request
    }

    fn context(request: Message) -> DnsContext {
        DnsContext::new(SocketAddr::from(([127, 0, 0, 1], 55353)), request)
    }

    fn arbiter(endpoint: &str) -> Arbiter {
        Arbiter {
            tag: "arbiter".to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// A coordinator stand-in answering every admission the same way.
    async fn stub_coordinator(status: u16, body: &'static str) -> SocketAddr {
        use axum::routing::post;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/dnsrequest",
            post(move || async move {
                axum::response::Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body))
                    .unwrap()
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn corrupt_reply_has_single_localhost_a_record() {
        let request = sample_request();
        let response = corrupt_reply(&request, Name::from_str("example.com.").unwrap());

        assert_eq!(response.id(), request.id());
        assert_eq!(response.message_type(), MessageType::Response);
        assert_eq!(response.queries(), request.queries());
        assert_eq!(response.answers().len(), 1);

        let record = &response.answers()[0];
        assert_eq!(record.record_type(), RecordType::A);
        assert_eq!(record.ttl(), CORRUPT_TTL);
        assert_eq!(record.data(), &RData::A(A(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn nxdomain_reply_is_empty_name_error() {
        let request = sample_request();
        let response = build_response_from_request(&request, ResponseCode::NXDomain);
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
        assert!(response.answers().is_empty());
        assert!(response.name_servers().is_empty());
        assert!(response.additionals().is_empty());
    }

    #[tokio::test]
    async fn corrupt_decision_shapes_the_response() {
        let addr = stub_coordinator(200, r#"{"action":"corrupt"}"#).await;

        let arbiter = arbiter(&format!("http://{addr}"));
        let mut ctx = context(sample_request());
        arbiter.execute(&mut ctx, None).await.unwrap();

        let response = ctx.response.expect("corrupt must synthesize a response");
        assert_eq!(response.answers().len(), 1);
        assert_eq!(response.answers()[0].record_type(), RecordType::A);
    }

    #[tokio::test]
    async fn queue_full_falls_through_to_next_stage() {
        let addr = stub_coordinator(503, "dns request queue is full").await;

        let arbiter = arbiter(&format!("http://{addr}"));
        let mut ctx = context(sample_request());
        arbiter.execute(&mut ctx, None).await.unwrap();

        // no chain node here, so falling through leaves no response
        assert!(ctx.response.is_none());
    }

    #[tokio::test]
    async fn unreachable_coordinator_falls_through() {
        // nothing listens on this port
        let arbiter = arbiter("http://127.0.0.1:1");
        let mut ctx = context(sample_request());
        arbiter.execute(&mut ctx, None).await.unwrap();
        assert!(ctx.response.is_none());
    }

    #[tokio::test]
    async fn questionless_query_passes_through() {
        let arbiter = arbiter("http://127.0.0.1:1");
        let mut ctx = context(Message::new());
        arbiter.execute(&mut ctx, None).await.unwrap();
        assert!(ctx.response.is_none());
    }
}
