//! Handover policy: decides whether a station should leave its access point
//! for a candidate.
//!
//! The policy only ever asks for a disconnect. Rewriting the association
//! table is left to whoever executes the directive and re-associates the
//! station.

use serde::Deserialize;

use crate::control::{Directive, DirectiveSink};

use super::context::SimulationContext;
use super::geometry::distance;
use super::signal_calculations::SignalParameters;
use super::types::{Node, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum HandoverStrategy {
    /// Move when the candidate serves `margin` fewer stations than the
    /// incumbent, strictly: `candidate + margin < incumbent`.
    LeastLoadedFirst {
        #[serde(default = "default_load_margin")]
        margin: usize,
    },
    /// Move when the candidate is heard more than `margin_db` louder.
    StrongestSignalFirst {
        #[serde(default = "default_signal_margin", rename = "margin-db")]
        margin_db: f64,
    },
}

fn default_load_margin() -> usize {
    2
}

fn default_signal_margin() -> f64 {
    0.1
}

impl Default for HandoverStrategy {
    fn default() -> Self {
        HandoverStrategy::StrongestSignalFirst {
            margin_db: default_signal_margin(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverDecision {
    Stay,
    ChangeRequested,
}

pub struct HandoverPolicy {
    strategy: HandoverStrategy,
}

impl HandoverPolicy {
    pub fn new(strategy: HandoverStrategy) -> Self {
        Self { strategy }
    }

    /// Weigh `candidate` against the access point `station` is currently
    /// associated with on `radio_index`.
    ///
    /// A station without an association always requests a change. On
    /// `ChangeRequested` a disconnect directive for the station's interface
    /// has been emitted.
    pub fn evaluate(&self, ctx: &SimulationContext, station: NodeId, candidate: NodeId, radio_index: usize, sink: &dyn DirectiveSink) -> HandoverDecision {
        let (Some(sta), Some(cand)) = (ctx.node(station), ctx.node(candidate)) else {
            log::warn!("Handover between unknown nodes {} -> {}", station, candidate);
            return HandoverDecision::Stay;
        };
        let Some(interface) = sta.interface(radio_index) else {
            log::warn!("Station {} has no radio {}", station, radio_index);
            return HandoverDecision::Stay;
        };

        let incumbent = ctx.associations().associated_peer(station, radio_index);
        let change = match incumbent {
            None => true,
            Some(current) if current == candidate => false,
            Some(current) => match self.strategy {
                HandoverStrategy::LeastLoadedFirst { margin } => {
                    let associations = ctx.associations();
                    associations.station_count(candidate).saturating_add(margin) < associations.station_count(current)
                }
                HandoverStrategy::StrongestSignalFirst { margin_db } => ctx.node(current).is_some_and(|ap| {
                    match (received_signal(ctx, sta, ap, radio_index), received_signal(ctx, sta, cand, radio_index)) {
                        (Some(incumbent_rssi), Some(candidate_rssi)) => candidate_rssi > incumbent_rssi + margin_db,
                        _ => false,
                    }
                }),
            },
        };

        if !change {
            return HandoverDecision::Stay;
        }

        log::info!(
            "Handover requested for station {} radio {}: {:?} -> {}",
            station,
            radio_index,
            incumbent,
            candidate
        );
        sink.emit(Directive::Disconnect {
            node_id: station,
            interface: interface.to_string(),
        });
        HandoverDecision::ChangeRequested
    }

    /// Weigh every associated station against the access points it can
    /// currently reach, in ascending id order. A station stops at its first
    /// requested change. Returns the `(station, radio_index, candidate)`
    /// triples that requested one.
    pub fn review(&self, ctx: &SimulationContext, access_points: &[NodeId], sink: &dyn DirectiveSink) -> Vec<(NodeId, usize, NodeId)> {
        let entries = ctx.associations().entries();
        let mut requested = Vec::new();
        for (station, radio_index, incumbent) in entries {
            let reachable = ctx.graph().neighbors(station);
            let candidate = reachable
                .into_iter()
                .filter(|id| *id != incumbent && access_points.contains(id))
                .find(|&id| self.evaluate(ctx, station, id, radio_index, sink) == HandoverDecision::ChangeRequested);
            if let Some(candidate) = candidate {
                requested.push((station, radio_index, candidate));
            }
        }
        requested
    }
}

/// RSSI at the station's radio from the access point's first radio.
fn received_signal(ctx: &SimulationContext, station: &Node, access_point: &Node, radio_index: usize) -> Option<f64> {
    let params = SignalParameters::between(access_point.radio(0)?, station.radio(radio_index)?);
    let d = distance(&station.position(), &access_point.position());
    ctx.propagation()
        .signal_strength(d, &params)
        .map_err(|err| log::warn!("Signal strength {} <- {} unavailable: {}", station.node_id, access_point.node_id, err))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingSink, context, node_at};

    fn disconnects(sink: &RecordingSink) -> Vec<(NodeId, String)> {
        sink.snapshot()
            .into_iter()
            .filter_map(|d| match d {
                Directive::Disconnect { node_id, interface } => Some((node_id, interface)),
                _ => None,
            })
            .collect()
    }

    // Station 100 sits on AP 1 with nine other stations; AP 2 serves two.
    fn loaded_context() -> SimulationContext {
        let mut nodes = vec![node_at(1, 0.0, 0.0, 100.0), node_at(2, 50.0, 0.0, 100.0), node_at(100, 10.0, 0.0, 50.0)];
        nodes.extend((101..112).map(|id| node_at(id, 0.0, 5.0, 50.0)));
        let ctx = context(nodes);
        {
            let mut table = ctx.associations();
            table.associate(100, 0, 1);
            for id in 101..110 {
                table.associate(id, 0, 1);
            }
            table.associate(110, 0, 2);
            table.associate(111, 0, 2);
        }
        ctx
    }

    #[test]
    fn least_loaded_moves_off_crowded_access_point() {
        let ctx = loaded_context();
        assert_eq!(ctx.associations().station_count(1), 10);
        assert_eq!(ctx.associations().station_count(2), 2);

        let policy = HandoverPolicy::new(HandoverStrategy::LeastLoadedFirst { margin: 2 });
        let sink = RecordingSink::new();
        assert_eq!(policy.evaluate(&ctx, 100, 2, 0, &sink), HandoverDecision::ChangeRequested);
        assert_eq!(disconnects(&sink), vec![(100, "sensor100-pan0".to_string())]);
        // The policy never rewrites associations itself.
        assert_eq!(ctx.associations().associated_peer(100, 0), Some(1));
    }

    #[test]
    fn least_loaded_margin_is_strict() {
        let ctx = loaded_context();
        let policy = HandoverPolicy::new(HandoverStrategy::LeastLoadedFirst { margin: 8 });
        let sink = RecordingSink::new();
        // 2 + 8 < 10 does not hold.
        assert_eq!(policy.evaluate(&ctx, 100, 2, 0, &sink), HandoverDecision::Stay);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn oversized_load_margin_never_moves() {
        let ctx = loaded_context();
        let policy = HandoverPolicy::new(HandoverStrategy::LeastLoadedFirst { margin: usize::MAX });
        let sink = RecordingSink::new();
        assert_eq!(policy.evaluate(&ctx, 100, 2, 0, &sink), HandoverDecision::Stay);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn unassociated_station_requests_change_under_both_strategies() {
        for strategy in [
            HandoverStrategy::LeastLoadedFirst { margin: 2 },
            HandoverStrategy::StrongestSignalFirst { margin_db: 0.1 },
        ] {
            let ctx = context(vec![node_at(1, 0.0, 0.0, 100.0), node_at(100, 10.0, 0.0, 50.0)]);
            let sink = RecordingSink::new();
            let decision = HandoverPolicy::new(strategy).evaluate(&ctx, 100, 1, 0, &sink);
            assert_eq!(decision, HandoverDecision::ChangeRequested, "{strategy:?}");
            assert_eq!(disconnects(&sink).len(), 1);
        }
    }

    #[test]
    fn strongest_signal_prefers_closer_candidate() {
        let ctx = context(vec![node_at(1, 0.0, 0.0, 100.0), node_at(2, 50.0, 0.0, 100.0), node_at(100, 40.0, 0.0, 50.0)]);
        ctx.associations().associate(100, 0, 1);
        let policy = HandoverPolicy::new(HandoverStrategy::default());

        let sink = RecordingSink::new();
        assert_eq!(policy.evaluate(&ctx, 100, 2, 0, &sink), HandoverDecision::ChangeRequested);

        // Once the station is closer to its own AP, the farther candidate loses.
        ctx.node(100).unwrap().set_position(crate::simulation::types::Position::new(5.0, 0.0, 0.0));
        let sink = RecordingSink::new();
        assert_eq!(policy.evaluate(&ctx, 100, 2, 0, &sink), HandoverDecision::Stay);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn equal_signal_within_margin_stays() {
        // Candidate mirrors the incumbent around the station.
        let ctx = context(vec![node_at(1, 0.0, 0.0, 100.0), node_at(2, 20.0, 0.0, 100.0), node_at(100, 10.0, 0.0, 50.0)]);
        ctx.associations().associate(100, 0, 1);
        let sink = RecordingSink::new();
        let decision = HandoverPolicy::new(HandoverStrategy::StrongestSignalFirst { margin_db: 0.1 }).evaluate(&ctx, 100, 2, 0, &sink);
        assert_eq!(decision, HandoverDecision::Stay);
    }

    #[test]
    fn candidate_equal_to_incumbent_stays() {
        let ctx = loaded_context();
        let sink = RecordingSink::new();
        let policy = HandoverPolicy::new(HandoverStrategy::LeastLoadedFirst { margin: 0 });
        assert_eq!(policy.evaluate(&ctx, 100, 1, 0, &sink), HandoverDecision::Stay);
    }

    #[test]
    fn review_moves_stations_toward_reachable_access_points() {
        let ctx = context(vec![
            node_at(1, 0.0, 0.0, 100.0),
            node_at(2, 50.0, 0.0, 100.0),
            node_at(3, 500.0, 0.0, 100.0),
            node_at(100, 45.0, 0.0, 100.0),
        ]);
        ctx.associations().associate(100, 0, 1);
        let engine = crate::simulation::link_quality::LinkQualityEngine::new(Default::default());
        let sink = RecordingSink::new();
        engine.evaluate(&ctx, 100, &sink);
        sink.take();

        let policy = HandoverPolicy::new(HandoverStrategy::default());
        // AP 3 is out of range and never considered.
        assert_eq!(policy.review(&ctx, &[1, 2, 3], &sink), vec![(100, 0, 2)]);
        assert_eq!(disconnects(&sink), vec![(100, "sensor100-pan0".to_string())]);
    }

    #[test]
    fn strategy_is_read_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            handover: HandoverStrategy,
        }
        let w: Wrapper = toml::from_str("[handover]\nstrategy = \"least-loaded-first\"\nmargin = 3\n").unwrap();
        assert_eq!(w.handover, HandoverStrategy::LeastLoadedFirst { margin: 3 });
        let w: Wrapper = toml::from_str("[handover]\nstrategy = \"strongest-signal-first\"\n").unwrap();
        assert_eq!(w.handover, HandoverStrategy::StrongestSignalFirst { margin_db: 0.1 });
    }
}
