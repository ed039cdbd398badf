#![cfg(test)]
#![allow(dead_code)] // Not every test module uses every helper

use std::sync::{Mutex, PoisonError};

use crate::control::{Directive, DirectiveSink, EdgeAction};
use crate::simulation::context::SimulationContext;
use crate::simulation::signal_calculations::PropagationModel;
use crate::simulation::types::{Node, NodeId, Position, Radio};

/// Sink that records every directive for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    directives: Mutex<Vec<Directive>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Directive> {
        std::mem::take(&mut *self.directives.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn snapshot(&self) -> Vec<Directive> {
        self.directives.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.directives.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn edge_directives(&self, action: EdgeAction) -> Vec<(NodeId, NodeId)> {
        self.snapshot()
            .into_iter()
            .filter_map(|d| match d {
                Directive::SetEdge { from, to, action: a } if a == action => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl DirectiveSink for RecordingSink {
    fn emit(&self, directive: Directive) {
        self.directives.lock().unwrap_or_else(PoisonError::into_inner).push(directive);
    }
}

pub fn radio(interface: &str, range: f64) -> Radio {
    Radio {
        interface: interface.to_string(),
        range,
        tx_power: 14.0,
        antenna_gain: 5.0,
        antenna_height: 1.0,
        frequency: 2.48,
    }
}

pub fn node_at(node_id: NodeId, x: f64, y: f64, range: f64) -> Node {
    let name = format!("sensor{node_id}");
    let iface = format!("{name}-pan0");
    Node::new(node_id, name, Position::new(x, y, 0.0), vec![radio(&iface, range)])
}

pub fn context(nodes: Vec<Node>) -> SimulationContext {
    SimulationContext::new(nodes, PropagationModel::default())
}
