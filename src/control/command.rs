//! Directive type definitions for the control module.
//!
//! Directives are the only way the simulation touches the outside world:
//! traffic shaping for a node's interface, topology changes for the radio
//! hardware simulator, and association teardown for stations.

use std::fmt;

use crate::simulation::types::NodeId;

/// Edge transition requested from the hardware simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAction {
    Add,
    Remove,
}

impl EdgeAction {
    /// Verb understood by `wpan-hwsim edge`.
    pub fn as_hwsim_verb(&self) -> &'static str {
        match self {
            EdgeAction::Add => "add",
            EdgeAction::Remove => "del",
        }
    }
}

impl fmt::Display for EdgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeAction::Add => write!(f, "add"),
            EdgeAction::Remove => write!(f, "remove"),
        }
    }
}

/// Impairment to impose on one node interface.
///
/// `loss_percent` and `latency_ms` are `None` when the aggregate value did not
/// exceed its threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapingDirective {
    pub node_id: NodeId,
    pub interface: String,
    pub bandwidth_mbit: f64,
    pub loss_percent: Option<f64>,
    pub latency_ms: Option<f64>,
}

/// Commands emitted by the simulation towards external collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Apply bandwidth/loss/latency to a node interface.
    Shaping(ShapingDirective),
    /// Add or remove the directed edge `from → to`.
    SetEdge { from: NodeId, to: NodeId, action: EdgeAction },
    /// Rescore the directed edge `from → to`.
    SetEdgeQuality { from: NodeId, to: NodeId, quality: i32 },
    /// Tear down the radio association of a station interface.
    Disconnect { node_id: NodeId, interface: String },
}

impl Directive {
    /// Whether the command runs inside the node's network namespace
    /// (as opposed to the host namespace where the hardware simulator lives).
    pub fn namespaced_node(&self) -> Option<NodeId> {
        match self {
            Directive::Shaping(shaping) => Some(shaping.node_id),
            Directive::Disconnect { node_id, .. } => Some(*node_id),
            Directive::SetEdge { .. } | Directive::SetEdgeQuality { .. } => None,
        }
    }

    /// Render the directive as an argv. `hwsim_id` maps node ids to the
    /// identifiers the hardware simulator knows the radios by.
    pub fn to_argv(&self, hwsim_id: impl Fn(NodeId) -> u32) -> Vec<String> {
        match self {
            Directive::Shaping(shaping) => {
                let mut argv: Vec<String> = ["tc", "qdisc", "replace", "dev", shaping.interface.as_str(), "root", "handle", "2:", "netem"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                argv.extend(["rate".into(), format!("{:.4}mbit", shaping.bandwidth_mbit)]);
                if let Some(latency) = shaping.latency_ms {
                    argv.extend(["delay".into(), format!("{latency:.2}ms")]);
                }
                if let Some(loss) = shaping.loss_percent {
                    argv.extend(["loss".into(), format!("{loss:.1}%")]);
                }
                argv
            }
            Directive::SetEdge { from, to, action } => vec![
                "wpan-hwsim".into(),
                "edge".into(),
                action.as_hwsim_verb().into(),
                hwsim_id(*from).to_string(),
                hwsim_id(*to).to_string(),
            ],
            Directive::SetEdgeQuality { from, to, quality } => vec![
                "wpan-hwsim".into(),
                "edge".into(),
                "lqi".into(),
                hwsim_id(*from).to_string(),
                hwsim_id(*to).to_string(),
                quality.to_string(),
            ],
            Directive::Disconnect { interface, .. } => vec!["iw".into(), "dev".into(), interface.clone(), "disconnect".into()],
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Shaping(s) => {
                write!(f, "shape node {} dev {} rate {:.4}mbit", s.node_id, s.interface, s.bandwidth_mbit)?;
                if let Some(latency) = s.latency_ms {
                    write!(f, " delay {latency:.2}ms")?;
                }
                if let Some(loss) = s.loss_percent {
                    write!(f, " loss {loss:.1}%")?;
                }
                Ok(())
            }
            Directive::SetEdge { from, to, action } => write!(f, "edge {action} {from} -> {to}"),
            Directive::SetEdgeQuality { from, to, quality } => write!(f, "edge lqi {from} -> {to} = {quality}"),
            Directive::Disconnect { node_id, interface } => write!(f, "disconnect node {node_id} dev {interface}"),
        }
    }
}

/// Receiver of directives.
///
/// Emission is fire-and-forget: implementations log their own failures and
/// never report them back into the simulation loops.
pub trait DirectiveSink: Send + Sync {
    fn emit(&self, directive: Directive);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaping(loss: Option<f64>, latency: Option<f64>) -> Directive {
        Directive::Shaping(ShapingDirective {
            node_id: 1,
            interface: "sensor1-pan0".into(),
            bandwidth_mbit: 1.5,
            loss_percent: loss,
            latency_ms: latency,
        })
    }

    #[test]
    fn shaping_argv_includes_only_present_terms() {
        let argv = shaping(None, None).to_argv(|id| id);
        assert_eq!(argv.join(" "), "tc qdisc replace dev sensor1-pan0 root handle 2: netem rate 1.5000mbit");

        let argv = shaping(Some(2.3), Some(3.456)).to_argv(|id| id);
        assert_eq!(
            argv.join(" "),
            "tc qdisc replace dev sensor1-pan0 root handle 2: netem rate 1.5000mbit delay 3.46ms loss 2.3%"
        );
    }

    #[test]
    fn edge_argv_uses_hwsim_ids() {
        let add = Directive::SetEdge {
            from: 1,
            to: 2,
            action: EdgeAction::Add,
        };
        assert_eq!(add.to_argv(|id| id - 1).join(" "), "wpan-hwsim edge add 0 1");

        let remove = Directive::SetEdge {
            from: 2,
            to: 1,
            action: EdgeAction::Remove,
        };
        assert_eq!(remove.to_argv(|id| id - 1).join(" "), "wpan-hwsim edge del 1 0");

        let lqi = Directive::SetEdgeQuality { from: 1, to: 2, quality: 42 };
        assert_eq!(lqi.to_argv(|id| id - 1).join(" "), "wpan-hwsim edge lqi 0 1 42");
    }

    #[test]
    fn namespace_applies_to_node_commands_only() {
        assert_eq!(shaping(None, None).namespaced_node(), Some(1));
        let disconnect = Directive::Disconnect {
            node_id: 7,
            interface: "sta7-wlan0".into(),
        };
        assert_eq!(disconnect.namespaced_node(), Some(7));
        assert_eq!(disconnect.to_argv(|id| id).join(" "), "iw dev sta7-wlan0 disconnect");
        let lqi = Directive::SetEdgeQuality { from: 1, to: 2, quality: 0 };
        assert_eq!(lqi.namespaced_node(), None);
    }
}
