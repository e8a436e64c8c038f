/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */
use crate::core::context::DnsContext;
use crate::core::dns_utils::build_response_from_request;
use crate::plugin::Plugin;
use crate::plugin::executor::Executor;
use hickory_proto::op::{Message, ResponseCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{Level, debug, event_enabled, warn};

pub mod game_api;
pub mod udp;

/// A plugin that owns a listener. `run` spawns the accept loop; it is
/// called from `init` once the plugin's state is ready.
pub trait Server: Plugin {
    fn run(&self);
}

/// Bridges a listener to its entry executor.
#[derive(Debug)]
pub struct RequestHandle {
    pub entry_executor: Arc<dyn Executor>,
}

impl RequestHandle {
    pub async fn handle_request(&self, msg: Message, src_addr: SocketAddr) -> Message {
        let mut context = DnsContext::new(src_addr, msg);

        // Log request details only when debug logging is enabled
        if event_enabled!(Level::DEBUG) {
            debug!(
                "DNS request from {}, queries: {:?}, id: {}",
                &src_addr,
                context.request.queries(),
                context.request.id()
            );
        }

        if let Err(err) = self.entry_executor.execute(&mut context, None).await {
            warn!(
                "entry executor failed for {} (queries: {:?}): {}",
                &src_addr,
                context.request.queries(),
                err
            );
        }

        let response = match context.response.take() {
            Some(response) => response,
            None => {
                debug!("No response produced by the chain, answering SERVFAIL");
                build_response_from_request(&context.request, ResponseCode::ServFail)
            }
        };

        if event_enabled!(Level::DEBUG) {
            debug!(
                "Sending response to {}, id: {}, rcode: {:?}",
                &src_addr,
                response.id(),
                response.response_code()
            );
        }

        response
    }
}
