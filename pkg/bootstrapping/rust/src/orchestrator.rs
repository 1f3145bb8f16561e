// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::ansible::AnsibleApplier;
use crate::bundle;
use crate::chef::ChefApplier;
use crate::config::ClientConfig;
use crate::errors::Error;
use crate::ledger::AppliedLedger;
use crate::platform;
use crate::policyfile::{AppliedConfiguration, CmsType, Policyfile};
use crate::process::BootstrappingProcess;
use crate::service::BootstrappingService;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Outcome of one `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Policyfiles in the configuration served by the platform.
    pub total: usize,
    /// Policyfiles that were not applied at their current revision.
    pub pending: usize,
    /// Pending policyfiles applied by this run.
    pub applied: usize,
}

/// Drives one bootstrapping run: fetch, diff against the ledger, stage
/// bundles, apply and report.
pub struct Bootstrapper<S> {
    service: S,
    ledger_path: PathBuf,
    run_dir: PathBuf,
    chef_client: String,
}

impl<S: BootstrappingService> Bootstrapper<S> {
    pub fn new(service: S, config: &ClientConfig) -> Self {
        Self {
            service,
            ledger_path: config.ledger_file(),
            run_dir: config.run_dir(),
            chef_client: config.chef_client.clone(),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub async fn start(
        &self,
        threshold_lines: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let ledger = AppliedLedger::load(&self.ledger_path)?;
        let configuration = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled.into()),
            configuration = self.service.get_configuration() => {
                configuration.context("Failed to fetch bootstrapping configuration")?
            }
        };

        for policyfile in &configuration.policyfiles {
            policyfile.validate()?;
        }
        let pending = ledger.pending(&configuration.policyfiles);
        let mut summary = RunSummary {
            total: configuration.policyfiles.len(),
            pending: pending.len(),
            applied: 0,
        };
        if pending.is_empty() {
            info!(
                "all {} policyfiles are already applied, nothing to do",
                summary.total
            );
            return Ok(summary);
        }
        info!(
            "{} of {} policyfiles pending ({})",
            summary.pending, summary.total, configuration.cms_type
        );

        self.prepare_run_dir()?;
        self.stage(&pending, cancel).await?;

        let attribute_revision_id = configuration.attribute_revision_id.clone();
        let mut process = BootstrappingProcess::new(
            self.run_dir.clone(),
            configuration.attributes,
            pending,
            ledger,
            threshold_lines,
        );

        let outcome = match configuration.cms_type {
            CmsType::Chef => {
                ChefApplier::new(self.chef_client.as_str(), platform::for_host())
                    .apply(&mut process, &self.service, cancel)
                    .await
            }
            CmsType::Ansible => AnsibleApplier.apply(&mut process, &self.service, cancel).await,
        };
        summary.applied = process
            .policyfiles
            .iter()
            .filter(|p| process.applied.is_applied(p))
            .count();

        let applied = AppliedConfiguration {
            policyfile_revision_ids: process.applied.revisions().clone(),
            attribute_revision_id,
        };
        let reported = self.service.report_applied_configuration(&applied).await;

        if let Err(e) = outcome {
            if let Err(report_err) = reported {
                warn!("Failed to report applied configuration: {report_err:#}");
            }
            return Err(e.into());
        }
        reported.context("Failed to report applied configuration")?;

        if let Err(e) = std::fs::remove_dir_all(&self.run_dir) {
            warn!("Failed to clean up {}: {e}", self.run_dir.display());
        }
        info!(
            "applied {} policyfiles, {} total on this node",
            summary.applied,
            process.applied.len()
        );
        Ok(summary)
    }

    fn prepare_run_dir(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.run_dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(e)
                    .with_context(|| format!("Failed to clean {}", self.run_dir.display()));
            }
            _ => {}
        }
        std::fs::create_dir_all(&self.run_dir)
            .with_context(|| format!("Failed to create {}", self.run_dir.display()))
    }

    /// Download and unpack the bundle of every pending policyfile.
    async fn stage(&self, pending: &[Policyfile], cancel: &CancellationToken) -> Result<()> {
        for policyfile in pending {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled.into());
            }
            let archive = policyfile.archive_path(&self.run_dir);
            info!(
                "[{}] downloading revision {}",
                policyfile.id, policyfile.revision_id
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled.into()),
                downloaded = self.service.download_policyfile(&policyfile.download_url, &archive) => {
                    downloaded.with_context(|| {
                        format!("[{}] failed to download policyfile bundle", policyfile.id)
                    })?;
                }
            }

            let target = policyfile.path(&self.run_dir);
            unpack(archive, target.clone())
                .await
                .with_context(|| format!("[{}] failed to unpack policyfile bundle", policyfile.id))?;
            debug!("[{}] staged in {}", policyfile.id, target.display());
        }
        Ok(())
    }
}

async fn unpack(archive: PathBuf, target: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || bundle::extract(&archive, &target))
        .await
        .context("bundle extraction task failed")??;
    Ok(())
}
