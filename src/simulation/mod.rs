//! Mobility and link emulation core.
//!
//! ## Module Organization
//!
//! - `types`: Positions, radios, nodes and aggregate link parameters
//! - `geometry`: Distances and the range test
//! - `signal_calculations`: Propagation models, RSSI and link quality indicator
//! - `context`: The explicit simulation context shared by every component
//! - `connectivity`: Which node pairs are in range, and the edge directives
//! - `link_quality`: Per-node impairment aggregation and shaping directives
//! - `trajectory`: Line rasterization and per-node traversal state
//! - `clock`: Speed-scaled simulated clock
//! - `scheduler`: The advance and re-evaluation loops
//! - `handover`: Access point selection for stations

pub mod clock;
pub mod connectivity;
pub mod context;
pub mod geometry;
pub mod handover;
pub mod link_quality;
pub mod scheduler;
pub mod signal_calculations;
pub mod trajectory;
pub mod types;
