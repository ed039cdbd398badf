//! Directives leaving the simulation and the sinks that carry them out.
//!
//! The core only ever produces [`Directive`] values. Turning them into
//! `tc`, `wpan-hwsim` or `iw` invocations, or merely logging them, is the
//! job of a [`DirectiveSink`].

pub mod command;
pub mod config;
pub mod executor;

pub use command::{Directive, DirectiveSink, EdgeAction, ShapingDirective};
pub use config::EngineConfig;
pub use executor::{CommandSink, LogSink};
