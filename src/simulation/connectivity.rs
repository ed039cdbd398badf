//! Connectivity graph: which node pairs are currently within radio range.
//!
//! Edge existence is a pure function of the pairwise distance and the
//! initiating node's range. Every recomputation re-runs the full range test;
//! the graph is never patched without one. Transitions are announced to the
//! hardware simulator as symmetric directive pairs (A→B and B→A).

use std::collections::{BTreeSet, HashMap};

use crate::control::{Directive, DirectiveSink, EdgeAction};

use super::geometry::{distance, within_range};
use super::signal_calculations::{PropagationModel, SignalParameters, link_quality_indicator};
use super::types::{Node, NodeId};

/// Outcome of a single edge recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTransition {
    Unchanged,
    Added,
    Removed,
}

/// Result of [`ConnectivityGraph::recompute_edge`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeCheck {
    pub transition: EdgeTransition,
    /// Whether the edge exists after the recomputation.
    pub active: bool,
    pub distance: f64,
}

#[derive(Debug, Default)]
pub struct ConnectivityGraph {
    adjacency: HashMap<NodeId, BTreeSet<NodeId>>,
    link_quality: HashMap<(NodeId, NodeId), i32>,
}

impl ConnectivityGraph {
    pub fn has_edge(&self, a: NodeId, b: NodeId) -> bool {
        self.adjacency.get(&a).is_some_and(|peers| peers.contains(&b))
    }

    /// Current neighbors of `node_id` in ascending id order.
    pub fn neighbors(&self, node_id: NodeId) -> Vec<NodeId> {
        self.adjacency.get(&node_id).map(|peers| peers.iter().copied().collect()).unwrap_or_default()
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Link quality `node_id` stores for `peer` (0 when out of range).
    pub fn link_quality(&self, node_id: NodeId, peer: NodeId) -> i32 {
        self.link_quality.get(&(node_id, peer)).copied().unwrap_or(0)
    }

    fn insert(&mut self, a: NodeId, b: NodeId) {
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    fn remove(&mut self, a: NodeId, b: NodeId) {
        if let Some(peers) = self.adjacency.get_mut(&a) {
            peers.remove(&b);
        }
        if let Some(peers) = self.adjacency.get_mut(&b) {
            peers.remove(&a);
        }
    }

    /// Quality values are always written on both endpoints.
    fn store_quality(&mut self, a: NodeId, b: NodeId, quality: i32) {
        self.link_quality.insert((a, b), quality);
        self.link_quality.insert((b, a), quality);
    }

    /// Re-run the range test for `initiator` → `peer` and reconcile the edge.
    ///
    /// Only the initiator's radio 0 range is consulted, so the test is
    /// one-way: A may see B in range while B, with a shorter range, does not
    /// see A. Quality directives are issued when an edge appears and whenever
    /// the integer quality of an existing edge changes; an already-correct
    /// edge emits nothing.
    pub fn recompute_edge(&mut self, initiator: &Node, peer: &Node, model: &PropagationModel, sink: &dyn DirectiveSink) -> EdgeCheck {
        let (a, b) = (initiator.node_id, peer.node_id);
        let d = distance(&initiator.position(), &peer.position());

        if !within_range(d, initiator.range(0)) {
            let transition = if self.has_edge(a, b) {
                self.remove(a, b);
                emit_symmetric_edge(sink, a, b, EdgeAction::Remove);
                log::info!("Edge removed: {} <-> {} (distance {:.2} m)", a, b, d);
                EdgeTransition::Removed
            } else {
                EdgeTransition::Unchanged
            };
            self.store_quality(a, b, 0);
            return EdgeCheck {
                transition,
                active: false,
                distance: d,
            };
        }

        let transition = if self.has_edge(a, b) {
            EdgeTransition::Unchanged
        } else {
            self.insert(a, b);
            emit_symmetric_edge(sink, a, b, EdgeAction::Add);
            log::info!("Edge added: {} <-> {} (distance {:.2} m)", a, b, d);
            EdgeTransition::Added
        };

        match quality_between(initiator, peer, d, model) {
            Some(quality) => {
                let stale = self.link_quality.get(&(a, b)) != Some(&quality);
                if transition == EdgeTransition::Added || stale {
                    self.store_quality(a, b, quality);
                    sink.emit(Directive::SetEdgeQuality { from: a, to: b, quality });
                    sink.emit(Directive::SetEdgeQuality { from: b, to: a, quality });
                }
            }
            None => self.store_quality(a, b, 0),
        }

        EdgeCheck {
            transition,
            active: true,
            distance: d,
        }
    }
}

fn emit_symmetric_edge(sink: &dyn DirectiveSink, a: NodeId, b: NodeId, action: EdgeAction) {
    sink.emit(Directive::SetEdge { from: a, to: b, action });
    sink.emit(Directive::SetEdge { from: b, to: a, action });
}

/// LQI of the link as heard by `receiver` from `transmitter`.
fn quality_between(receiver: &Node, transmitter: &Node, d: f64, model: &PropagationModel) -> Option<i32> {
    let (rx, tx) = (receiver.radio(0)?, transmitter.radio(0)?);
    match model.signal_strength(d, &SignalParameters::between(tx, rx)) {
        Ok(rssi) => Some(link_quality_indicator(rssi)),
        Err(err) => {
            log::warn!("Signal strength {} <- {} unavailable: {}", receiver.node_id, transmitter.node_id, err);
            None
        }
    }
}
