//! Availability core - platform-independent liveness checking
//!
//! This crate provides the poll-based [`ProcessChecker`], the one-shot
//! [`AsyncControlPlane`] executor it fans events out on, the listener capability
//! set and the [`ProcessInspector`] seam that platform crates implement.

mod checker;
mod config;
mod error;
mod event;
mod listener;
mod plane;
mod process;

pub use checker::{CheckerPhase, CheckerType, ProcessChecker};
pub use config::*;
pub use error::*;
pub use event::*;
pub use listener::{ErrorFn, EventFn, ListenerSet, ProcessCheckListener};
pub use plane::{AsyncControlPlane, AsyncFutureTask, AsyncTask, PlanePhase, TaskFuture, TaskId};
pub use process::*;
