//! Ring topology used by the Frugalos fragment reconstructor.
//!
//! A [`Ring`] maps an object key to a partition and a partition to the ordered
//! list of [`FragmentSlot`]s (one per erasure-coding index). The partner relation
//! over fragment indices lives in [`partners_of`].
//!
//! [`Ring`]: ./struct.Ring.html
//! [`FragmentSlot`]: ./struct.FragmentSlot.html
//! [`partners_of`]: ./fn.partners_of.html
#![warn(missing_docs)]
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_yaml;
extern crate siphasher;
#[macro_use]
extern crate trackable;

pub use crate::error::{Error, ErrorKind};
pub use crate::partners::{fallback_chain, partners_of};
pub use crate::policy::{PolicyId, StoragePolicy};
pub use crate::ring::{FragmentSlot, Node, PartitionId, Ring, RingResolver, RingSet};

mod error;
mod partners;
mod policy;
mod ring;

/// クレート固有の`Result`型。
pub type Result<T> = ::std::result::Result<T, Error>;
