//! Explicit simulation context shared by every component.
//!
//! Holds the node registry (in registration order), the connectivity graph,
//! the station → access point association table and the last aggregate link
//! parameters applied per node. One context is created per scene and handed to
//! the scheduler, the link-quality engine and the handover policy.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::connectivity::ConnectivityGraph;
use super::signal_calculations::PropagationModel;
use super::types::{AggregateLinkParams, Node, NodeId};

/// Station radio → access point associations.
///
/// Written only by the association layer (scene setup or an external
/// collaborator reacting to disconnect directives); the handover policy reads
/// it but never rewrites it.
#[derive(Debug, Default)]
pub struct AssociationTable {
    associated_to: HashMap<(NodeId, usize), NodeId>,
}

impl AssociationTable {
    pub fn associate(&mut self, station: NodeId, radio_index: usize, access_point: NodeId) {
        self.associated_to.insert((station, radio_index), access_point);
    }

    pub fn disassociate(&mut self, station: NodeId, radio_index: usize) -> Option<NodeId> {
        self.associated_to.remove(&(station, radio_index))
    }

    pub fn associated_peer(&self, station: NodeId, radio_index: usize) -> Option<NodeId> {
        self.associated_to.get(&(station, radio_index)).copied()
    }

    /// All `(station, radio_index, access_point)` entries, ordered by station.
    pub fn entries(&self) -> Vec<(NodeId, usize, NodeId)> {
        let mut entries: Vec<_> = self.associated_to.iter().map(|(&(sta, radio), &ap)| (sta, radio, ap)).collect();
        entries.sort_unstable();
        entries
    }

    /// Number of station radios currently associated with `access_point`.
    pub fn station_count(&self, access_point: NodeId) -> usize {
        self.associated_to.values().filter(|ap| **ap == access_point).count()
    }
}

pub struct SimulationContext {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    propagation: PropagationModel,
    graph: Mutex<ConnectivityGraph>,
    associations: Mutex<AssociationTable>,
    applied: Mutex<HashMap<NodeId, AggregateLinkParams>>,
}

impl SimulationContext {
    /// Build a context from nodes in registration order. Later duplicates of a
    /// node id are ignored; scene validation rejects them before this point.
    pub fn new(nodes: Vec<Node>, propagation: PropagationModel) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        let mut registered = Vec::with_capacity(nodes.len());
        for node in nodes {
            if index.contains_key(&node.node_id) {
                log::warn!("Ignoring duplicate registration of node {}", node.node_id);
                continue;
            }
            index.insert(node.node_id, registered.len());
            registered.push(node);
        }

        Self {
            nodes: registered,
            index,
            propagation,
            graph: Mutex::new(ConnectivityGraph::default()),
            associations: Mutex::new(AssociationTable::default()),
            applied: Mutex::new(HashMap::new()),
        }
    }

    /// All nodes in registration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.index.get(&node_id).map(|&i| &self.nodes[i])
    }

    /// Registration index of a node; evaluation order follows it.
    pub fn registration_index(&self, node_id: NodeId) -> Option<usize> {
        self.index.get(&node_id).copied()
    }

    pub fn propagation(&self) -> &PropagationModel {
        &self.propagation
    }

    pub fn graph(&self) -> MutexGuard<'_, ConnectivityGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn associations(&self) -> MutexGuard<'_, AssociationTable> {
        self.associations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parameters from the last shaping directive issued for `node_id`.
    pub fn applied_params(&self, node_id: NodeId) -> Option<AggregateLinkParams> {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner).get(&node_id).copied()
    }

    pub(crate) fn record_applied(&self, node_id: NodeId, params: AggregateLinkParams) {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner).insert(node_id, params);
    }
}
