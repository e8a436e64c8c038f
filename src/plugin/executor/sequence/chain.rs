/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */
use crate::core::context::DnsContext;
use crate::plugin::executor::{ExecResult, Executor};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

#[async_trait]
pub trait ChainNode: Debug + Send + Sync + 'static {
    async fn next(&self, context: &mut DnsContext) -> ExecResult;

    fn set_next(&mut self, next: Option<Arc<dyn ChainNode>>);
}

#[derive(Debug)]
pub struct DirectChainNode {
    executor: Arc<dyn Executor>,
    next: Option<Arc<dyn ChainNode>>,
}

#[async_trait]
impl ChainNode for DirectChainNode {
    async fn next(&self, context: &mut DnsContext) -> ExecResult {
        // Pass immediate next (if any) to current executor
        self.executor.execute(context, self.next.as_ref()).await
    }

    fn set_next(&mut self, next: Option<Arc<dyn ChainNode>>) {
        self.next = next;
    }
}

pub struct ChainBuilder {
    nodes: Vec<Box<dyn ChainNode>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        ChainBuilder { nodes: Vec::new() }
    }

    pub fn append(&mut self, executor: Arc<dyn Executor>) {
        self.nodes.push(Box::new(DirectChainNode {
            executor,
            next: None,
        }));
    }

    /// Link the nodes back to front and return the head.
    pub fn build(self) -> Option<Arc<dyn ChainNode>> {
        let mut next: Option<Arc<dyn ChainNode>> = None;
        for mut node in self.nodes.into_iter().rev() {
            node.set_next(next.clone());
            next = Some(Arc::from(node));
        }
        next
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}
