//! # tabularium
//!
//! A coordination core for multi-user, version-controlled tabular data.
//! Users log in, enter data bases, and edit tables and types through
//! *domains*: exclusive collaborative edit sessions whose every action is
//! validated, logged to a replayable journal, and echoed to subscribers as
//! an ordered callback stream.
//!
//! The concurrency model is ownership by dispatcher: every stateful owner
//! (host, contexts, domains, loggers) has exactly one serialized execution
//! queue, so state mutations of one owner never interleave while distinct
//! owners run in parallel. See [`dispatch`] for the primitives, [`domain`]
//! for the actor-per-session layer, and [`host`] for the lifecycle that ties
//! them together.

#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod access;
pub mod auth;
pub mod config;
pub mod data;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod host;
pub mod repository;
pub mod users;

pub use access::AccessHolder;
pub use auth::{Authentication, Authority};
pub use config::Config;
pub use data::{DataBase, DataBaseContext};
pub use domain::{DomainContext, DomainHandle};
pub use error::{CoreError, Result};
pub use host::{HostState, RepoHost};
pub use repository::{MemoryRepository, Repository, RepositoryHost};
pub use users::UserContext;

pub use tabularium_model as model;
