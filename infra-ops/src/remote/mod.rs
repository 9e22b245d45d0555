//! Command execution on managed hosts and the detached-session registry.

pub mod ps;
pub mod registry;
pub mod screen;
pub mod transport;
