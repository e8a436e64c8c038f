/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use hickory_proto::op::Message;
use std::net::SocketAddr;

/// Per-query execution context threaded through the executor chain.
///
/// An executor either fills in `response` (terminating resolution) or leaves
/// it empty and lets the next chain node run.
#[derive(Debug)]
pub struct DnsContext {
    pub src_addr: SocketAddr,

    /// The parsed DNS query
    pub request: Message,

    /// The response to send, once an executor has produced one
    pub response: Option<Message>,
}

impl DnsContext {
    pub fn new(src_addr: SocketAddr, request: Message) -> Self {
        DnsContext {
            src_addr,
            request,
            response: None,
        }
    }
}
