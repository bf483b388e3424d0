//! Per-tab marker agent.

pub mod agent;

pub use agent::{AgentHandle, Lifecycle, TabAgent};
