//! Fragment reconstruction daemon for Frugalos storage nodes.
#![warn(missing_docs)]
extern crate bytecodec;
extern crate fibers;
#[cfg(test)]
extern crate fibers_global;
extern crate fibers_http_server;
extern crate fibers_rpc;
extern crate frugalos_reconstruction;
extern crate frugalos_ring;
extern crate futures;
extern crate num_cpus;
extern crate prometrics;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_yaml;
#[macro_use]
extern crate slog;
#[cfg(test)]
extern crate tempdir;
#[macro_use]
extern crate trackable;

pub use crate::error::{Error, ErrorKind};

pub mod config;
pub mod control;
pub mod daemon;

mod error;

/// クレート固有の`Result`型。
pub type Result<T> = ::std::result::Result<T, Error>;
