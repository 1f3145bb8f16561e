// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use crate::ledger::AppliedLedger;
use crate::policyfile::Policyfile;
use crate::reporter::LogReporter;
use crate::runner::run_chunked;
use crate::service::BootstrappingService;
use log::info;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_THRESHOLD_LINES: usize = 10;

/// Mutable context of one `start` run. Everything a policyfile applier reads
/// or writes goes through this value; nothing is process-global.
#[derive(Debug)]
pub struct BootstrappingProcess {
    /// Holds generated inventory/variables/attributes files and unpacked bundles.
    pub directory: PathBuf,
    pub attributes: Map<String, Value>,
    /// Pending policyfiles in the order they must be applied.
    pub policyfiles: Vec<Policyfile>,
    pub applied: AppliedLedger,
    /// Version of the configuration-management tool reported by the current
    /// policyfile's output. Reset before every policyfile.
    pub cms_version: Option<String>,
    pub threshold_lines: usize,
}

impl BootstrappingProcess {
    pub fn new(
        directory: PathBuf,
        attributes: Map<String, Value>,
        policyfiles: Vec<Policyfile>,
        applied: AppliedLedger,
        threshold_lines: usize,
    ) -> Self {
        Self {
            directory,
            attributes,
            policyfiles,
            applied,
            cms_version: None,
            threshold_lines: threshold_lines.max(1),
        }
    }

    /// Run `command` for `policyfile`, reporting its output chunk by chunk.
    /// Any exit code other than 0 is an error.
    pub async fn run_policyfile_command<S: BootstrappingService>(
        &mut self,
        service: &S,
        policyfile: &Policyfile,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let threshold = self.threshold_lines;
        self.cms_version = None;
        let mut reporter = LogReporter::new(service, policyfile, &mut self.cms_version);

        let code = run_chunked(command, threshold, &mut reporter, cancel).await?;
        if code != 0 {
            return Err(Error::ExitCode {
                command: command.to_string(),
                code,
            });
        }
        Ok(())
    }

    /// Record a policyfile whose command exited with code 0.
    pub fn record_applied(&mut self, policyfile: &Policyfile) -> Result<()> {
        self.applied.record(policyfile)?;
        info!(
            "[{}] recorded revision {} as applied",
            policyfile.id, policyfile.revision_id
        );
        Ok(())
    }
}
