// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Configuration-management system the policyfiles are written for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmsType {
    #[default]
    Chef,
    Ansible,
}

impl fmt::Display for CmsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmsType::Chef => write!(f, "chef"),
            CmsType::Ansible => write!(f, "ansible"),
        }
    }
}

/// One unit of configuration to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policyfile {
    pub id: String,
    pub revision_id: String,
    #[serde(default)]
    pub download_url: String,
}

impl Policyfile {
    /// Check that `id` and `revision_id` can be used as single path
    /// components. Both end up in file and directory names under the run
    /// directory.
    pub fn validate(&self) -> Result<()> {
        check_component("id", &self.id)?;
        check_component("revision_id", &self.revision_id)
    }

    /// Directory name the bundle is unpacked to.
    pub fn file_name(&self) -> String {
        format!("{}-{}", self.id, self.revision_id)
    }

    /// Directory under `base` holding the unpacked bundle.
    pub fn path(&self, base: &Path) -> PathBuf {
        base.join(self.file_name())
    }

    /// Where the downloaded archive is stored before unpacking.
    pub fn archive_path(&self, base: &Path) -> PathBuf {
        base.join(format!("{}.tar.gz", self.file_name()))
    }
}

fn check_component(field: &'static str, value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.contains(['/', '\\', '\0']) {
        "must not contain path separators"
    } else if value.contains("..") {
        "must not contain `..`"
    } else if value.contains(':') {
        "must not contain `:`"
    } else {
        return Ok(());
    };
    Err(Error::InvalidPolicyfile {
        field,
        value: value.to_string(),
        reason,
    })
}

/// The pending configuration as served by the platform.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BootstrappingConfiguration {
    #[serde(default)]
    pub policyfiles: Vec<Policyfile>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub attribute_revision_id: Option<String>,
    #[serde(default)]
    pub cms_type: CmsType,
}

/// One reported chunk of command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub policyfile_id: String,
    pub policyfile_revision_id: String,
    pub stdout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cms_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// What has actually been applied on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedConfiguration {
    pub policyfile_revision_ids: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_revision_id: Option<String>,
}
