//! Platform adapters for the relayhub gateway.
//!
//! This crate holds everything an adapter author needs:
//! - [`job`]: the ActivityStream-shaped job document exchanged with clients
//! - [`schema`]: typed structural contracts and the generic validator
//! - [`session`]: the capability an adapter uses to read configuration,
//!   log and push documents back to the client
//! - [`platform`]: the verb contract every adapter implements
//! - [`registry`]: name-to-constructor lookup used by the gateway
//! - [`facebook`] and [`twitter`]: the bundled adapters

pub mod error;
pub mod facebook;
pub mod http;
pub mod job;
pub mod platform;
pub mod registry;
pub mod schema;
pub mod session;
pub mod twitter;

pub use error::AdapterError;
pub use job::{Actor, Job, PostObject, Target, Verb};
pub use platform::{FetchOutcome, Platform, PlatformContext};
pub use registry::PlatformRegistry;
pub use schema::{FieldType, PlatformSchema, SchemaNode, ValidationError};
pub use session::{ConfigError, PlatformSession, credentials_for};
