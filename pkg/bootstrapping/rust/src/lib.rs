// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod ansible;
pub mod api;
pub mod bundle;
pub mod chef;
pub mod cli;
pub mod config;
mod errors;
mod files;
pub mod ledger;
pub mod lifecycle;
pub mod orchestrator;
pub mod platform;
pub mod policyfile;
pub mod process;
pub mod reporter;
pub mod runner;
pub mod service;

#[cfg(test)]
pub(crate) mod test_utils;

pub use errors::{Error, Result};
pub use orchestrator::{Bootstrapper, RunSummary};
pub use policyfile::{BootstrappingConfiguration, CmsType, Policyfile};
pub use process::BootstrappingProcess;
pub use runner::{Chunk, ChunkSink, ChunkedCommand, run_chunked};
pub use service::BootstrappingService;
