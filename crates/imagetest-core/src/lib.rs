//! Configuration resolution and lifecycle engine for imagetest harnesses.
//!
//! A harness is an ephemeral container that hosts test workloads. This crate
//! turns a declarative [`spec::HarnessSpec`] plus optional provider-wide
//! [`spec::ProviderDefaults`] into an ordered list of
//! [`options::ContainerOption`]s, and drives the container engine through
//! create, setup, and teardown via [`lifecycle::HarnessController`].

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod harness;
pub mod lifecycle;
pub mod merge;
pub mod options;
pub mod reference;
pub mod resources;
pub mod skip;
pub mod spec;

pub use error::{HarnessError, Stage, ValidationError};
pub use lifecycle::{HarnessController, HarnessState};
