//! Tapedeck - record HTTP interactions once, replay them deterministically
//!
//! Cassettes hold previously captured request/response pairs. Interception
//! adapters ask the engine for a recorded answer and report live interactions
//! back for recording, subject to the cassette's recording mode.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::multiple_crate_versions
)]

pub mod adapter;
pub mod cassette;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hooks;
pub mod ignorer;
pub mod matcher;
pub mod request;
pub mod vcr;

pub use error::{Result, TapedeckError};
pub use vcr::Vcr;
