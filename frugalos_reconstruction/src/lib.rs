//! Detects and rebuilds missing or stale erasure-coded fragments.
//!
//! A [`Reconstructor`] runs on every storage node. Each cycle it inspects
//! the partitions the node takes part in, plans repair jobs for the
//! fragments of its scope and executes them, relying on repeated cycles
//! (instead of coordination among nodes) to converge.
//!
//! [`Reconstructor`]: ./struct.Reconstructor.html
#![warn(missing_docs)]
extern crate adler32;
extern crate byteorder;
extern crate bytecodec;
extern crate ecpool;
extern crate fibers;
#[cfg(test)]
extern crate fibers_global;
extern crate fibers_rpc;
extern crate frugalos_ring;
extern crate futures;
extern crate prometrics;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[cfg(test)]
extern crate serde_yaml;
extern crate siphasher;
#[macro_use]
extern crate slog;
#[macro_use]
extern crate trackable;

pub use crate::codec::{ErasureCodec, IndexedFragment, PooledCodec};
pub use crate::error::{Error, ErrorKind};
pub use crate::executor::{Executor, JobOutcome, JobReport};
pub use crate::fragment::{etag_of, Fragment, FragmentMeta, FragmentState, ObjectVersion, Timestamp};
pub use crate::inspector::{Inspection, Inspector, NodeListing, SlotInspection};
pub use crate::metrics::ReconstructorMetrics;
pub use crate::planner::{
    select_winner, DeferReason, Deferral, Job, JobAction, Plan, Planner, Winner,
};
pub use crate::read::{DegradedRead, ObjectContent};
pub use crate::scheduler::{
    worker_scope, CycleSummary, PartitionReport, PartitionStage, PartitionState, Reconstructor,
};
pub use crate::service::{ReconstructorService, ReconstructorServiceHandle};
pub use crate::store::{DurabilityPreference, FragmentStore};
pub use crate::util::BoxFuture;

pub mod config;
pub mod rpc;

mod codec;
mod collect;
mod error;
mod executor;
mod fragment;
mod inspector;
mod metrics;
mod planner;
mod read;
mod scheduler;
mod serde_ext;
mod service;
mod store;
mod util;

/// クレート固有の`Result`型。
pub type Result<T> = ::std::result::Result<T, Error>;
