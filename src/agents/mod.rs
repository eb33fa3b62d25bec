//! Multi-agent coordination engine for Agora
//!
//! Routes a user message to a set of specialized agents, runs them under one
//! of four coordination protocols and returns a single synthesized answer:
//! - Sequential (each agent builds on the previous answer)
//! - Parallel (isolated, concurrent answers)
//! - Collaborative (primary consults supporting agents)
//! - Debate (three agents, two rounds, one synthesis)
//!
//! ## Architecture
//!
//! - `domain/` - Core types (Message, AgentInteraction, CoordinationRun)
//! - `registry` / `scoring` - Agent roles and confidence-based routing
//! - `context` / `retrieval` - Size-bounded prompt assembly
//! - `llm/` / `invoker` - Provider implementations and bounded model calls
//! - `orchestration/` - Coordination protocols and the run state machine
//! - `store/` / `recorder` - Append-only session persistence

pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod handler;
pub mod invoker;
pub mod llm;
pub mod orchestration;
pub mod recorder;
pub mod registry;
pub mod retrieval;
pub mod scoring;
pub mod store;

// Re-export commonly used types
pub use config::*;
pub use domain::*;
pub use error::*;
pub use handler::{CoordinationEngine, CoordinationEngineBuilder};
pub use registry::{AgentDescriptor, AgentRegistry};
