// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::policyfile::{
    AppliedConfiguration, BootstrappingConfiguration, LogEntry, Policyfile,
};
use crate::service::BootstrappingService;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// In-memory platform that records everything it is sent.
#[derive(Default)]
pub(crate) struct RecordingService {
    pub configuration: BootstrappingConfiguration,
    /// 1-based `report_log` call that fails.
    pub fail_log_at: Option<usize>,
    pub fail_applied: bool,
    /// Download URL -> archive served for it.
    pub bundles: HashMap<String, PathBuf>,
    pub log_calls: Mutex<usize>,
    pub logs: Mutex<Vec<LogEntry>>,
    pub applied: Mutex<Vec<AppliedConfiguration>>,
}

impl RecordingService {
    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<AppliedConfiguration> {
        self.applied.lock().unwrap().clone()
    }
}

impl BootstrappingService for RecordingService {
    async fn get_configuration(&self) -> anyhow::Result<BootstrappingConfiguration> {
        Ok(self.configuration.clone())
    }

    async fn report_log(&self, entry: &LogEntry) -> anyhow::Result<()> {
        let call = {
            let mut calls = self.log_calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if self.fail_log_at.is_some_and(|n| call >= n) {
            anyhow::bail!("bootstrap log upload failed with status 503");
        }
        self.logs.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn report_applied_configuration(
        &self,
        applied: &AppliedConfiguration,
    ) -> anyhow::Result<()> {
        if self.fail_applied {
            anyhow::bail!("applied configuration rejected with status 500");
        }
        self.applied.lock().unwrap().push(applied.clone());
        Ok(())
    }

    async fn download_policyfile(&self, url: &str, path: &Path) -> anyhow::Result<()> {
        let Some(source) = self.bundles.get(url) else {
            anyhow::bail!("no bundle served at {url}");
        };
        std::fs::copy(source, path)?;
        Ok(())
    }
}

pub(crate) fn policyfile(id: &str, revision_id: &str) -> Policyfile {
    Policyfile {
        id: id.to_string(),
        revision_id: revision_id.to_string(),
        download_url: format!("https://cdn.example.com/{id}-{revision_id}.tar.gz"),
    }
}

/// Write a gzip-compressed tarball holding `files`.
pub(crate) fn write_bundle(path: &Path, files: &[(&str, &str)]) {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Write an executable shell script.
#[cfg(unix)]
pub(crate) fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
