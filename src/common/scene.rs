//! Scene loading, parsing, and validation logic.
//!
//! A scene is a JSON file describing the nodes, the propagation model, the
//! initial station associations and an optional mobility session. Loading
//! validates everything up front, so the running simulation never sees a
//! malformed coordinate or a dangling node reference.

use anyhow::Context;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;

use crate::simulation::context::SimulationContext;
use crate::simulation::scheduler::{MobilityPlan, ReversalParity};
use crate::simulation::signal_calculations::{PropagationModel, SignalParameters};
use crate::simulation::trajectory::Trajectory;
use crate::simulation::types::{self, DEFAULT_SENSITIVITY_DBM, NodeId, Position};

/// Error type for scene loading failures.
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

fn default_tx_power() -> f64 {
    14.0
}

fn default_antenna_gain() -> f64 {
    5.0
}

fn default_antenna_height() -> f64 {
    1.0
}

fn default_frequency() -> f64 {
    2.48
}

fn default_sensitivity() -> f64 {
    DEFAULT_SENSITIVITY_DBM
}

fn default_repetitions() -> u32 {
    1
}

/// Radio interface of a scene node.
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    pub interface: String,
    /// Range in meters; derived from the link budget when omitted.
    #[serde(default)]
    pub range: Option<f64>,
    /// Transmit power in dBm.
    #[serde(default = "default_tx_power")]
    pub tx_power: f64,
    #[serde(default = "default_antenna_gain")]
    pub antenna_gain: f64,
    #[serde(default = "default_antenna_height")]
    pub antenna_height: f64,
    /// Carrier frequency in GHz.
    #[serde(default = "default_frequency")]
    pub frequency: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    pub node_id: NodeId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Radio id inside the hardware simulator; defaults to `node_id`.
    #[serde(default)]
    pub hwsim_id: Option<u32>,
    /// `"x,y,z"`, or `"x,y"` for a node on the ground plane.
    pub position: String,
    pub radios: Vec<RadioConfig>,
}

/// Initial station radio → access point association.
#[derive(Debug, Deserialize, Clone)]
pub struct AssociationConfig {
    pub station: NodeId,
    #[serde(default)]
    pub radio: usize,
    pub access_point: NodeId,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrajectoryConfig {
    pub node_id: NodeId,
    /// Either `start` + `end` or a `waypoints` chain must be given.
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub waypoints: Vec<String>,
    pub start_time: f64,
    pub end_time: f64,
}

impl TrajectoryConfig {
    fn coordinates(&self) -> Vec<&str> {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => vec![start.as_str(), end.as_str()],
            _ => self.waypoints.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MobilityConfig {
    #[serde(default)]
    pub init_time: f64,
    pub final_time: f64,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub reverse_parity: ReversalParity,
    pub trajectories: Vec<TrajectoryConfig>,
}

/// Root structure representing the entire scene.
#[derive(Debug, Deserialize)]
pub struct Scene {
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub propagation: PropagationModel,
    /// Receiver sensitivity (dBm) used for derived ranges.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
    #[serde(default)]
    pub associations: Vec<AssociationConfig>,
    #[serde(default)]
    pub mobility: Option<MobilityConfig>,
}

/// Everything the engine needs to run a scene.
pub struct SceneSetup {
    pub context: SimulationContext,
    pub plan: Option<MobilityPlan>,
}

/// Load, parse and validate a scene from a file.
pub fn load_scene(path: &str) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SceneLoadError::FileReadError(e.to_string()))?;

    parse_scene(&data)
}

pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?;

    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;

    Ok(scene)
}

/// Validate scene configuration.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    const MAX_NODES: usize = 10000;
    const MIN_TX_POWER: f64 = -50.0;
    const MAX_TX_POWER: f64 = 50.0;

    if scene.nodes.is_empty() {
        return Err("Scene must contain at least one node".to_string());
    }
    if scene.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.nodes.len(), MAX_NODES));
    }

    scene.propagation.validate()?;

    let mut radios_per_node = HashMap::new();
    for node in &scene.nodes {
        if radios_per_node.insert(node.node_id, node.radios.len()).is_some() {
            return Err(format!("Duplicate node_id found: {}", node.node_id));
        }
    }

    let mut hwsim_ids = HashSet::new();
    for node in &scene.nodes {
        node.position
            .parse::<Position>()
            .map_err(|e| format!("Node {}: {}", node.node_id, e))?;

        if !hwsim_ids.insert(node.hwsim_id.unwrap_or(node.node_id)) {
            return Err(format!("Node {} reuses hwsim_id {}", node.node_id, node.hwsim_id.unwrap_or(node.node_id)));
        }

        if node.radios.is_empty() {
            return Err(format!("Node {} has no radios", node.node_id));
        }
        for (idx, radio) in node.radios.iter().enumerate() {
            if radio.interface.trim().is_empty() {
                return Err(format!("Node {} radio {} has an empty interface name", node.node_id, idx));
            }
            if let Some(range) = radio.range.filter(|r| !(r.is_finite() && *r > 0.0)) {
                return Err(format!("Node {} radio {} range {} must be positive", node.node_id, idx, range));
            }
            if !(radio.frequency.is_finite() && radio.frequency > 0.0) {
                return Err(format!("Node {} radio {} frequency {} GHz must be positive", node.node_id, idx, radio.frequency));
            }
            if !(MIN_TX_POWER..=MAX_TX_POWER).contains(&radio.tx_power) {
                return Err(format!(
                    "Node {} radio {} tx_power {} dBm outside realistic range ({} to {} dBm)",
                    node.node_id, idx, radio.tx_power, MIN_TX_POWER, MAX_TX_POWER
                ));
            }
        }
    }

    for assoc in &scene.associations {
        match radios_per_node.get(&assoc.station) {
            None => return Err(format!("Association references unknown station {}", assoc.station)),
            Some(&radios) if assoc.radio >= radios => {
                return Err(format!("Station {} has no radio {}", assoc.station, assoc.radio));
            }
            Some(_) => {}
        }
        if !radios_per_node.contains_key(&assoc.access_point) {
            return Err(format!("Association references unknown access point {}", assoc.access_point));
        }
    }

    if let Some(mobility) = &scene.mobility {
        validate_mobility(mobility, &radios_per_node)?;
    }

    Ok(())
}

fn validate_mobility(mobility: &MobilityConfig, known: &HashMap<NodeId, usize>) -> Result<(), String> {
    if mobility.repetitions < 1 {
        return Err("Mobility repetitions must be at least 1".to_string());
    }
    if !(mobility.init_time >= 0.0 && mobility.final_time >= mobility.init_time) {
        return Err(format!(
            "Mobility window invalid: init_time {} must be non-negative and not after final_time {}",
            mobility.init_time, mobility.final_time
        ));
    }

    let mut moving = HashSet::new();
    for trajectory in &mobility.trajectories {
        if !known.contains_key(&trajectory.node_id) {
            return Err(format!("Trajectory references unknown node {}", trajectory.node_id));
        }
        if !moving.insert(trajectory.node_id) {
            return Err(format!("Node {} has more than one trajectory", trajectory.node_id));
        }
        if trajectory.start.is_some() != trajectory.end.is_some() {
            return Err(format!("Trajectory for node {} needs both start and end", trajectory.node_id));
        }
        Trajectory::from_coordinates(trajectory.node_id, &trajectory.coordinates(), trajectory.start_time, trajectory.end_time)
            .map_err(|e| format!("Trajectory for node {}: {}", trajectory.node_id, e))?;
    }
    Ok(())
}

/// Turn a validated scene into a simulation context and mobility plan.
pub fn build_simulation(scene: &Scene) -> Result<SceneSetup, SceneLoadError> {
    let mut nodes = Vec::with_capacity(scene.nodes.len());
    for config in &scene.nodes {
        let position = config
            .position
            .parse::<Position>()
            .map_err(|e| SceneLoadError::ValidationError(format!("Node {}: {}", config.node_id, e)))?;
        let radios = config
            .radios
            .iter()
            .map(|radio| build_radio(radio, &scene.propagation, scene.sensitivity))
            .collect();
        let name = config.name.clone().unwrap_or_else(|| format!("node{}", config.node_id));

        let mut node = types::Node::new(config.node_id, name, position, radios).with_hwsim_id(config.hwsim_id.unwrap_or(config.node_id));
        if let Some(ns) = &config.namespace {
            node = node.with_namespace(ns.clone());
        }
        nodes.push(node);
    }

    let context = SimulationContext::new(nodes, scene.propagation.clone());
    {
        let mut associations = context.associations();
        for assoc in &scene.associations {
            associations.associate(assoc.station, assoc.radio, assoc.access_point);
        }
    }

    let plan = match &scene.mobility {
        Some(mobility) => {
            let trajectories = mobility
                .trajectories
                .iter()
                .map(|t| Trajectory::from_coordinates(t.node_id, &t.coordinates(), t.start_time, t.end_time))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| SceneLoadError::ValidationError(e.to_string()))?;
            Some(MobilityPlan {
                init_time: mobility.init_time,
                final_time: mobility.final_time,
                repetitions: mobility.repetitions,
                reverse: mobility.reverse,
                reverse_parity: mobility.reverse_parity,
                trajectories,
            })
        }
        None => None,
    };

    Ok(SceneSetup { context, plan })
}

fn build_radio(config: &RadioConfig, model: &PropagationModel, sensitivity: f64) -> types::Radio {
    let mut radio = types::Radio {
        interface: config.interface.clone(),
        range: config.range.unwrap_or(0.0),
        tx_power: config.tx_power,
        antenna_gain: config.antenna_gain,
        antenna_height: config.antenna_height,
        frequency: config.frequency,
    };
    if config.range.is_none() {
        radio.range = model.effective_range(&SignalParameters::symmetric(&radio), sensitivity);
        log::debug!("Derived range {:.2} m for {}", radio.range, radio.interface);
    }
    radio
}
