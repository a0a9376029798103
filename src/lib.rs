//! Run AI command-line tools as subprocesses and normalize their output.
//!
//! A [`dispatch::registry::Registry`] holds named [`dispatch::Provider`]s.
//! CLI-backed providers run one subprocess per call through
//! [`dispatch::cli::ProcessExecutor`] and hand its stdout to the parser for
//! their output format, which never fails: unrecognized output becomes the
//! answer verbatim.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod parsers;
pub mod response;
