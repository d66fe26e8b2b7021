// src/engine/logs.rs

//! Log stream coordinator.
//!
//! One worker per execution unit. Each worker finds the pod backing its
//! node, waits (bounded) for it to start, then reads its log and publishes
//! every line into a shared bounded channel. Lines from different nodes
//! interleave in arrival order.
//!
//! The returned [`LogStream`] ends once every worker has finished. A node
//! whose pod never starts produces a single [`LogEvent::NodeFailed`] and
//! does not hold up the others. Dropping or cancelling the stream stops
//! every worker, which in turn closes its log reader.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, TryStreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cluster::{ClusterBackend, PodRecord};
use crate::config::LogOptions;
use crate::engine::Engine;
use crate::engine::status::{declared_num_nodes, node_index};
use crate::errors::{LaunchError, Result};
use crate::labels::{LabelSelector, NODE_IDX_LABEL, OwnerScope, is_valid_label_value};

/// One log line from one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub node_idx: u32,
    pub text: String,
    /// Whether the task has more than one node (controls the prefix).
    pub multi_node: bool,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.multi_node {
            write!(f, "node-{} | {}", self.node_idx, self.text)
        } else {
            f.write_str(&self.text)
        }
    }
}

#[derive(Debug)]
pub enum LogEvent {
    Line(LogLine),
    /// The node's log could not be read; the other nodes continue.
    NodeFailed { node_idx: u32, error: LaunchError },
}

/// Fan-in of every node's log for one task.
///
/// Implements [`Stream`]; also usable through [`LogStream::next_event`].
pub struct LogStream {
    rx: mpsc::Receiver<LogEvent>,
    cancel: CancellationToken,
    workers: JoinSet<()>,
    nodes: Vec<u32>,
    multi_node: bool,
}

impl fmt::Debug for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStream")
            .field("nodes", &self.nodes)
            .field("multi_node", &self.multi_node)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl LogStream {
    pub async fn next_event(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }

    /// Node indices being streamed, ascending.
    pub fn nodes(&self) -> &[u32] {
        &self.nodes
    }

    pub fn is_multi_node(&self) -> bool {
        self.multi_node
    }

    /// Ask every worker to stop. Events already queued stay readable.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait until every worker has exited.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.rx.close();
        while self.workers.join_next().await.is_some() {}
    }
}

impl Stream for LogStream {
    type Item = LogEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LogEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<C: ClusterBackend + 'static> Engine<C> {
    /// Start streaming the logs of every node of a task.
    pub async fn stream_logs(&self, task_id: &str, scope: &OwnerScope) -> Result<LogStream> {
        if !is_valid_label_value(task_id) {
            return Err(LaunchError::not_found("task", task_id));
        }
        let units = self
            .cluster
            .list_units(&LabelSelector::task(task_id, scope))
            .await?;
        if units.is_empty() {
            return Err(LaunchError::not_found("task", task_id));
        }

        let observed = u32::try_from(units.len()).unwrap_or(u32::MAX);
        let multi_node = declared_num_nodes(&units).unwrap_or(observed) > 1;

        let mut nodes: Vec<(u32, String)> = units
            .iter()
            .filter_map(|u| node_index(u).map(|idx| (idx, u.name.clone())))
            .collect();
        nodes.sort();
        nodes.dedup_by_key(|(idx, _)| *idx);

        let options = self.config.logs;
        let (tx, rx) = mpsc::channel(options.channel_capacity);
        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();

        for (node_idx, unit) in &nodes {
            let worker = NodeWorker {
                cluster: Arc::clone(&self.cluster),
                unit: unit.clone(),
                node_idx: *node_idx,
                selector: LabelSelector::task(task_id, scope)
                    .eq(NODE_IDX_LABEL, node_idx.to_string()),
                multi_node,
                options,
                tx: tx.clone(),
            };
            workers.spawn(worker.run(cancel.child_token()));
        }
        drop(tx);

        info!(task_id, nodes = nodes.len(), "streaming task logs");
        Ok(LogStream {
            rx,
            cancel,
            workers,
            nodes: nodes.into_iter().map(|(idx, _)| idx).collect(),
            multi_node,
        })
    }
}

struct NodeWorker<C: ClusterBackend + 'static> {
    cluster: Arc<C>,
    unit: String,
    node_idx: u32,
    /// Matches the pods of this node only.
    selector: LabelSelector,
    multi_node: bool,
    options: LogOptions,
    tx: mpsc::Sender<LogEvent>,
}

impl<C: ClusterBackend + 'static> NodeWorker<C> {
    async fn run(self, cancel: CancellationToken) {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(unit = %self.unit, "log worker cancelled");
                return;
            }
            res = self.forward() => res,
        };

        match outcome {
            Ok(()) => debug!(unit = %self.unit, "log worker reached end of stream"),
            Err(error) => {
                warn!(unit = %self.unit, node_idx = self.node_idx, %error, "log worker failed");
                let event = LogEvent::NodeFailed {
                    node_idx: self.node_idx,
                    error,
                };
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = self.tx.send(event) => {}
                }
            }
        }
    }

    async fn forward(&self) -> Result<()> {
        let pod = self.wait_until_started().await?;
        // A finished pod is read once; a live one is followed.
        let follow = !pod.phase.is_terminal();
        debug!(unit = %self.unit, pod = %pod.name, follow, "reading pod log");

        let mut lines = self.cluster.stream_pod_logs(&pod.name, follow).await?;
        while let Some(text) = lines
            .try_next()
            .await
            .map_err(|e| LaunchError::upstream("read pod log", pod.name.clone(), e))?
        {
            let line = LogLine {
                node_idx: self.node_idx,
                text,
                multi_node: self.multi_node,
            };
            if self.tx.send(LogEvent::Line(line)).await.is_err() {
                debug!(unit = %self.unit, "log consumer went away");
                break;
            }
        }
        Ok(())
    }

    async fn wait_until_started(&self) -> Result<PodRecord> {
        let waited = self.options.schedule_timeout;
        match tokio::time::timeout(waited, self.poll_started_pod()).await {
            Ok(res) => res,
            Err(_) => Err(LaunchError::SchedulingTimeout {
                node_idx: self.node_idx,
                unit: self.unit.clone(),
                waited,
            }),
        }
    }

    /// Newest pod of the node once it is running or finished.
    async fn poll_started_pod(&self) -> Result<PodRecord> {
        loop {
            let pods = self.cluster.list_pods(&self.selector).await?;
            if let Some(pod) = pods.into_iter().max_by_key(|p| p.created_at) {
                if pod.phase.has_started() {
                    return Ok(pod);
                }
                trace!(pod = %pod.name, phase = ?pod.phase, "pod not started yet");
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}
