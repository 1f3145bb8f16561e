// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use crate::files::write_atomic;
use crate::policyfile::Policyfile;
use crate::process::BootstrappingProcess;
use crate::runner::{in_dir, quote};
use crate::service::BootstrappingService;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub const INVENTORY_FILE: &str = "inventory.yml";
pub const VARIABLES_FILE: &str = "variables.yml";
pub const APPLY_SCRIPT: &str = "apply.sh";

#[derive(Serialize)]
struct Inventory {
    all: InventoryGroup,
}

#[derive(Serialize)]
struct InventoryGroup {
    hosts: BTreeMap<&'static str, InventoryHost>,
}

#[derive(Serialize)]
struct InventoryHost {
    ansible_connection: &'static str,
}

fn local_inventory() -> Inventory {
    Inventory {
        all: InventoryGroup {
            hosts: BTreeMap::from([(
                "localhost",
                InventoryHost {
                    ansible_connection: "local",
                },
            )]),
        },
    }
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(value).map_err(|source| Error::EncodeYaml {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, yaml.as_bytes())
}

/// Applies Ansible policyfiles through the `apply.sh` script each bundle ships.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnsibleApplier;

impl AnsibleApplier {
    /// Write a single-host inventory targeting the local machine.
    pub fn prepare_inventory(&self, process: &BootstrappingProcess) -> Result<PathBuf> {
        let path = process.directory.join(INVENTORY_FILE);
        write_yaml(&path, &local_inventory())?;
        Ok(path)
    }

    /// Dump the attributes as playbook variables.
    pub fn prepare_variables(&self, process: &BootstrappingProcess) -> Result<PathBuf> {
        let path = process.directory.join(VARIABLES_FILE);
        write_yaml(&path, &process.attributes)?;
        Ok(path)
    }

    pub fn command_for(
        &self,
        process: &BootstrappingProcess,
        policyfile: &Policyfile,
        inventory: &Path,
        variables: &Path,
    ) -> String {
        let script = format!(
            "sh ./{APPLY_SCRIPT} {} {}",
            quote(inventory),
            quote(variables)
        );
        in_dir(&policyfile.path(&process.directory), &script)
    }

    /// Apply the pending policyfiles in order, stopping at the first failure.
    pub async fn apply<S: BootstrappingService>(
        &self,
        process: &mut BootstrappingProcess,
        service: &S,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let inventory = self.prepare_inventory(process)?;
        let variables = self.prepare_variables(process)?;

        let policyfiles = process.policyfiles.clone();
        for policyfile in &policyfiles {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            info!(
                "[{}] applying revision {} with {APPLY_SCRIPT}",
                policyfile.id, policyfile.revision_id
            );
            let command = self.command_for(process, policyfile, &inventory, &variables);
            process
                .run_policyfile_command(service, policyfile, &command, cancel)
                .await
                .and_then(|()| process.record_applied(policyfile))
                .map_err(|e| e.for_policyfile(&policyfile.id))?;
        }
        Ok(())
    }
}
