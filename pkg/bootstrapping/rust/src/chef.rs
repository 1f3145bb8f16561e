// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use crate::files::write_atomic;
use crate::platform::WorkdirStrategy;
use crate::policyfile::Policyfile;
use crate::process::BootstrappingProcess;
use crate::runner::{in_dir, quote};
use crate::service::BootstrappingService;
use log::{info, warn};
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub const POLICY_GROUP: &str = "local";

/// A chef-client invocation ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub command: String,
    /// Where the bundle was unpacked.
    pub bundle_dir: PathBuf,
    /// Where the command runs; differs from `bundle_dir` when the platform
    /// renamed it.
    pub workdir: PathBuf,
}

/// Applies Chef policyfiles with `chef-client` in local mode.
pub struct ChefApplier {
    client: String,
    workdir: Box<dyn WorkdirStrategy>,
}

impl ChefApplier {
    pub fn new(client: impl Into<String>, workdir: Box<dyn WorkdirStrategy>) -> Self {
        Self {
            client: client.into(),
            workdir,
        }
    }

    pub fn attributes_path(process: &BootstrappingProcess, policyfile: &Policyfile) -> PathBuf {
        process
            .directory
            .join(format!("attrs-{}.json", policyfile.id))
    }

    /// Inject `policy_group`/`policy_name` into the attributes and write them
    /// to `attrs-<id>.json`.
    pub fn save_attributes(
        &self,
        process: &mut BootstrappingProcess,
        policyfile: &Policyfile,
    ) -> Result<PathBuf> {
        process.attributes.insert(
            "policy_group".to_string(),
            Value::String(POLICY_GROUP.to_string()),
        );
        process.attributes.insert(
            "policy_name".to_string(),
            Value::String(policyfile.id.clone()),
        );

        let path = Self::attributes_path(process, policyfile);
        let bytes = serde_json::to_vec_pretty(&process.attributes).map_err(|source| {
            Error::EncodeJson {
                path: path.clone(),
                source,
            }
        })?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    pub fn prepare_command(
        &self,
        process: &mut BootstrappingProcess,
        policyfile: &Policyfile,
    ) -> Result<PreparedCommand> {
        let attributes = self.save_attributes(process, policyfile)?;
        let bundle_dir = policyfile.path(&process.directory);
        let workdir = self.workdir.prepare(&bundle_dir)?;

        let client = format!("{} -z -j {}", self.client, quote(&attributes));
        let command = format!("{}{}", self.workdir.path_prefix(), in_dir(&workdir, &client));
        Ok(PreparedCommand {
            command,
            bundle_dir,
            workdir,
        })
    }

    /// Apply the pending policyfiles in order, stopping at the first failure.
    pub async fn apply<S: BootstrappingService>(
        &self,
        process: &mut BootstrappingProcess,
        service: &S,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let policyfiles = process.policyfiles.clone();
        for policyfile in &policyfiles {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            info!(
                "[{}] applying revision {} with {}",
                policyfile.id, policyfile.revision_id, self.client
            );
            self.apply_one(process, service, policyfile, cancel)
                .await
                .map_err(|e| e.for_policyfile(&policyfile.id))?;
        }
        Ok(())
    }

    async fn apply_one<S: BootstrappingService>(
        &self,
        process: &mut BootstrappingProcess,
        service: &S,
        policyfile: &Policyfile,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let prepared = self.prepare_command(process, policyfile)?;
        let outcome = process
            .run_policyfile_command(service, policyfile, &prepared.command, cancel)
            .await;
        let restored = self.workdir.restore(&prepared.bundle_dir, &prepared.workdir);

        if let Err(e) = outcome {
            if let Err(restore_err) = restored {
                warn!("[{}] {restore_err}", policyfile.id);
            }
            return Err(e);
        }
        restored?;
        process.record_applied(policyfile)
    }
}
