// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::process::DEFAULT_THRESHOLD_LINES;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cmp-bootstrapping")]
#[command(about = "Apply pending policyfiles on this node and report their output")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Apply every policyfile not yet applied at its current revision
    Start {
        /// Maximum number of output lines per reported log chunk
        #[arg(short = 'l', long, default_value_t = DEFAULT_THRESHOLD_LINES, value_parser = parse_lines)]
        lines: usize,
    },
    /// Ask a running `start` to terminate
    Stop,
}

fn parse_lines(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(lines) => Ok(lines),
        Err(e) => Err(e.to_string()),
    }
}
