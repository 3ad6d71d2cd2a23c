// SPDX-License-Identifier: GPL-3.0-only

//! Declarative storage layouts to ordered storage actions
//!
//! Two inputs are understood:
//! - a declarative [`StorageConfig`](storage_types::StorageConfig), walked
//!   section by section by [`graph`]
//! - an imperative [`KickstartScript`](storage_types::KickstartScript),
//!   executed command by command by [`commands`]
//!
//! Both register create/destroy/format/resize actions with a
//! [`StorageEngine`](storage_contracts::StorageEngine). [`Resolver`] owns the
//! engine and runs one pass at a time; errors abort the pass and leave the
//! engine reset.

pub mod commands;
pub mod context;
pub mod encryption;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod reclaim;
pub mod resize;
pub mod resolver;
pub mod size;
pub mod swap;

pub use context::{ClearSelection, DeferredMount, ResolveContext, ResolveOptions};
pub use error::{ResolveError, Result, SpecLocation, Violation};
pub use matcher::NoProbe;
pub use resolver::{Plan, Resolver};
pub use swap::suggest_swap_size;
