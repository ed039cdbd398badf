//! Link quality engine: per-pair recomputation and per-node aggregation.
//!
//! For one node, every other registered node is visited once. Each visit
//! reconciles the edge through the connectivity graph; active edges feed the
//! distance-derived loss, latency and bandwidth figures, which are averaged
//! (unweighted) into the node's aggregate and pushed as a shaping directive.

use serde::Deserialize;

use crate::control::{Directive, DirectiveSink, ShapingDirective};

use super::connectivity::EdgeTransition;
use super::context::SimulationContext;
use super::types::{AggregateLinkParams, NodeId};

/// Formula constants turning edge distance into impairment, plus the floors
/// below which a term is left out of the shaping directive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LinkMetrics {
    /// loss(d) = d × loss_per_meter (%)
    pub loss_per_meter: f64,
    /// latency(d) = latency_floor_ms + d × latency_per_meter_ms
    pub latency_floor_ms: f64,
    pub latency_per_meter_ms: f64,
    /// bandwidth(d) = base_bandwidth_mbit × bandwidth_decay^(−d), clamped to
    /// at least bandwidth_floor_mbit
    pub base_bandwidth_mbit: f64,
    pub bandwidth_decay: f64,
    pub bandwidth_floor_mbit: f64,
    /// Latency term is only emitted above this value (ms).
    pub latency_threshold_ms: f64,
    /// Loss term is only emitted above this value (%).
    pub loss_threshold_percent: f64,
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self {
            loss_per_meter: 0.002,
            latency_floor_ms: 1.0,
            latency_per_meter_ms: 0.05,
            base_bandwidth_mbit: 2.0,
            bandwidth_decay: 1.01,
            bandwidth_floor_mbit: 0.1,
            latency_threshold_ms: 0.1,
            loss_threshold_percent: 0.1,
        }
    }
}

/// Impairment attributed to a single active edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeMetrics {
    pub loss_percent: f64,
    pub latency_ms: f64,
    pub bandwidth_mbit: f64,
}

impl LinkMetrics {
    pub fn loss(&self, distance: f64) -> f64 {
        (distance * self.loss_per_meter).clamp(0.0, 100.0)
    }

    pub fn latency(&self, distance: f64) -> f64 {
        self.latency_floor_ms + distance * self.latency_per_meter_ms
    }

    /// Never returns less than the (strictly positive) bandwidth floor, so a
    /// shaping directive never asks for zero throughput.
    pub fn bandwidth(&self, distance: f64) -> f64 {
        let floor = self.bandwidth_floor_mbit.max(f64::MIN_POSITIVE);
        let rate = self.base_bandwidth_mbit * self.bandwidth_decay.powf(-distance);
        if rate.is_finite() && rate > floor { rate } else { floor }
    }

    pub fn edge_metrics(&self, distance: f64) -> EdgeMetrics {
        EdgeMetrics {
            loss_percent: self.loss(distance),
            latency_ms: self.latency(distance),
            bandwidth_mbit: self.bandwidth(distance),
        }
    }
}

/// Outcome of one node evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Aggregate over active edges; `None` when no edge is active, in which
    /// case no shaping directive was issued and prior parameters stay in effect.
    pub params: Option<AggregateLinkParams>,
    /// Peers whose edge with the evaluated node appeared or disappeared.
    pub changed_peers: Vec<NodeId>,
}

pub struct LinkQualityEngine {
    metrics: LinkMetrics,
}

impl LinkQualityEngine {
    pub fn new(metrics: LinkMetrics) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    /// Re-evaluate every pair touching `node_id` and shape its interface.
    ///
    /// The graph lock is held for the whole neighbor scan, so one evaluation
    /// never interleaves with another. Positions are read as they are at the
    /// moment each pair is visited.
    pub fn evaluate(&self, ctx: &SimulationContext, node_id: NodeId, sink: &dyn DirectiveSink) -> Evaluation {
        let Some(node) = ctx.node(node_id) else {
            log::warn!("Evaluation requested for unknown node {}", node_id);
            return Evaluation::default();
        };

        let mut changed_peers = Vec::new();
        let mut active_edges = 0usize;
        let (mut loss, mut latency, mut bandwidth) = (0.0, 0.0, 0.0);

        {
            let mut graph = ctx.graph();
            for peer in ctx.nodes().iter().filter(|p| p.node_id != node_id) {
                let check = graph.recompute_edge(node, peer, ctx.propagation(), sink);
                if check.transition != EdgeTransition::Unchanged {
                    changed_peers.push(peer.node_id);
                }
                if check.active {
                    let edge = self.metrics.edge_metrics(check.distance);
                    loss += edge.loss_percent;
                    latency += edge.latency_ms;
                    bandwidth += edge.bandwidth_mbit;
                    active_edges += 1;
                }
            }
        }

        if active_edges == 0 {
            return Evaluation {
                params: None,
                changed_peers,
            };
        }

        let n = active_edges as f64;
        let params = AggregateLinkParams {
            bandwidth_mbit: bandwidth / n,
            loss_percent: loss / n,
            latency_ms: latency / n,
            active_edges,
        };

        match node.interface(0) {
            Some(interface) => {
                sink.emit(Directive::Shaping(self.shaping_directive(node_id, interface, &params)));
                ctx.record_applied(node_id, params);
            }
            None => log::debug!("Node {} has no radio interface to shape", node_id),
        }

        Evaluation {
            params: Some(params),
            changed_peers,
        }
    }

    fn shaping_directive(&self, node_id: NodeId, interface: &str, params: &AggregateLinkParams) -> ShapingDirective {
        ShapingDirective {
            node_id,
            interface: interface.to_string(),
            bandwidth_mbit: params.bandwidth_mbit,
            loss_percent: (params.loss_percent > self.metrics.loss_threshold_percent).then_some(params.loss_percent),
            latency_ms: (params.latency_ms > self.metrics.latency_threshold_ms).then_some(params.latency_ms),
        }
    }
}
