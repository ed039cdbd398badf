//! Directive sinks that reach the host.
//!
//! [`CommandSink`] turns each directive into a process invocation (`tc`,
//! `wpan-hwsim`, `iw`), wrapped in `ip netns exec` when the target node lives
//! in its own namespace. [`LogSink`] only logs, for dry runs.

use std::collections::HashMap;
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};

use crate::simulation::context::SimulationContext;
use crate::simulation::types::NodeId;

use super::command::{Directive, DirectiveSink};

#[derive(Debug, Clone)]
struct NodeTarget {
    namespace: Option<String>,
    hwsim_id: u32,
}

pub struct CommandSink {
    targets: HashMap<NodeId, NodeTarget>,
    use_sudo: bool,
}

impl CommandSink {
    /// Capture namespaces and hardware-simulator ids of every registered node.
    pub fn from_context(ctx: &SimulationContext, use_sudo: bool) -> Self {
        let targets = ctx
            .nodes()
            .iter()
            .map(|node| {
                (
                    node.node_id,
                    NodeTarget {
                        namespace: node.namespace.clone(),
                        hwsim_id: node.hwsim_id,
                    },
                )
            })
            .collect();
        Self { targets, use_sudo }
    }

    fn hwsim_id(&self, node_id: NodeId) -> u32 {
        self.targets.get(&node_id).map_or(node_id, |t| t.hwsim_id)
    }

    /// Full argv for `directive`, including namespace and sudo wrapping.
    pub fn command_line(&self, directive: &Directive) -> Vec<String> {
        let mut argv = Vec::new();
        if self.use_sudo {
            argv.push("sudo".to_string());
        }
        let namespace = directive
            .namespaced_node()
            .and_then(|id| self.targets.get(&id))
            .and_then(|t| t.namespace.as_deref());
        if let Some(ns) = namespace {
            argv.extend(["ip", "netns", "exec", ns].map(String::from));
        }
        argv.extend(directive.to_argv(|id| self.hwsim_id(id)));
        argv
    }

    fn run(&self, directive: &Directive) -> Result<Output> {
        let argv = self.command_line(directive);
        let Some((program, args)) = argv.split_first() else {
            bail!("empty command for {}", directive);
        };
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("spawn {}", argv.join(" ")))?;
        if !output.status.success() {
            bail!("command failed: {}\n{}", argv.join(" "), String::from_utf8_lossy(&output.stderr).trim());
        }
        Ok(output)
    }
}

impl DirectiveSink for CommandSink {
    fn emit(&self, directive: Directive) {
        log::debug!("{}", directive);
        if let Err(err) = self.run(&directive) {
            // Best-effort: the simulation keeps going with stale impairment.
            log::warn!("{:#}", err);
        }
    }
}

/// Logs directives without executing anything.
#[derive(Debug, Default)]
pub struct LogSink;

impl DirectiveSink for LogSink {
    fn emit(&self, directive: Directive) {
        log::info!("[dry-run] {}", directive);
    }
}
