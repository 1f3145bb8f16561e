// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use crate::files::write_atomic;
use crate::policyfile::Policyfile;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Policyfile id -> revision id of every policyfile applied with exit code 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedLedger {
    revisions: BTreeMap<String, String>,
    path: Option<PathBuf>,
}

impl AppliedLedger {
    /// A ledger that lives in memory only.
    pub fn in_memory(revisions: BTreeMap<String, String>) -> Self {
        Self {
            revisions,
            path: None,
        }
    }

    /// Load the ledger persisted at `path`. A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        let revisions = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| Error::DecodeJson {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(Error::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self {
            revisions,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn save(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.revisions).map_err(|source| {
            Error::EncodeJson {
                path: path.clone(),
                source,
            }
        })?;
        write_atomic(path, &bytes)
    }

    pub fn revision(&self, id: &str) -> Option<&str> {
        self.revisions.get(id).map(String::as_str)
    }

    pub fn is_applied(&self, policyfile: &Policyfile) -> bool {
        self.revision(&policyfile.id) == Some(policyfile.revision_id.as_str())
    }

    /// Policyfiles, in platform order, whose revision has not been applied yet.
    pub fn pending(&self, policyfiles: &[Policyfile]) -> Vec<Policyfile> {
        policyfiles
            .iter()
            .filter(|p| !self.is_applied(p))
            .cloned()
            .collect()
    }

    /// Record `policyfile` as applied and persist the ledger.
    pub fn record(&mut self, policyfile: &Policyfile) -> Result<()> {
        self.revisions
            .insert(policyfile.id.clone(), policyfile.revision_id.clone());
        self.save()
    }

    pub fn revisions(&self) -> &BTreeMap<String, String> {
        &self.revisions
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}
