// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use cmp_bootstrapping::BootstrappingService;
use cmp_bootstrapping::policyfile::{
    AppliedConfiguration, BootstrappingConfiguration, LogEntry, Policyfile,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const BIN: &str = env!("CARGO_BIN_EXE_cmp-bootstrapping");
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Platform stand-in that serves a fixed configuration and bundles and
/// records every report.
#[derive(Default)]
pub struct FakePlatform {
    pub configuration: BootstrappingConfiguration,
    pub bundles: HashMap<String, PathBuf>,
    /// Number of `report_log` calls that succeed before the platform starts
    /// rejecting them.
    pub accept_logs: Option<usize>,
    pub logs: Mutex<Vec<LogEntry>>,
    pub applied: Mutex<Vec<AppliedConfiguration>>,
}

impl FakePlatform {
    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().unwrap().clone()
    }

    pub fn logs_for(&self, id: &str) -> Vec<LogEntry> {
        self.logs()
            .into_iter()
            .filter(|l| l.policyfile_id == id)
            .collect()
    }

    pub fn applied(&self) -> Vec<AppliedConfiguration> {
        self.applied.lock().unwrap().clone()
    }
}

impl BootstrappingService for FakePlatform {
    async fn get_configuration(&self) -> anyhow::Result<BootstrappingConfiguration> {
        Ok(self.configuration.clone())
    }

    async fn report_log(&self, entry: &LogEntry) -> anyhow::Result<()> {
        let mut logs = self.logs.lock().unwrap();
        if self.accept_logs.is_some_and(|n| logs.len() >= n) {
            anyhow::bail!("bootstrap log rejected with status 503");
        }
        logs.push(entry.clone());
        Ok(())
    }

    async fn report_applied_configuration(
        &self,
        applied: &AppliedConfiguration,
    ) -> anyhow::Result<()> {
        self.applied.lock().unwrap().push(applied.clone());
        Ok(())
    }

    async fn download_policyfile(&self, url: &str, path: &Path) -> anyhow::Result<()> {
        let source = self
            .bundles
            .get(url)
            .ok_or_else(|| anyhow::anyhow!("404 for {url}"))?;
        std::fs::copy(source, path)?;
        Ok(())
    }
}

pub fn policyfile(id: &str, revision_id: &str) -> Policyfile {
    Policyfile {
        id: id.to_string(),
        revision_id: revision_id.to_string(),
        download_url: format!("https://cdn.example.com/{id}/{revision_id}.tar.gz"),
    }
}

pub fn write_script(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn write_bundle(path: &Path, files: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Write a client config whose state lives under `dir`.
pub fn write_config(dir: &Path, api_endpoint: Option<&str>) -> PathBuf {
    let path = dir.join("client.yaml");
    let mut yaml = format!(
        "state_dir: {}\nrequest_timeout_secs: 120\nlog_level: debug\n",
        dir.join("state").display()
    );
    if let Some(endpoint) = api_endpoint {
        yaml.push_str(&format!("api_endpoint: {endpoint}\n"));
    }
    std::fs::write(&path, yaml).unwrap();
    path
}

pub fn pid_file(dir: &Path) -> PathBuf {
    dir.join("state").join("bootstrapping.pid")
}

/// Run the binary to completion.
pub fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(BIN)
        .args(args)
        .env("CMP_CONFIG", config)
        .env_remove("CMP_LOG_LEVEL")
        .output()
        .expect("failed to run cmp-bootstrapping")
}

/// Start the binary in the background.
pub fn spawn(config: &Path, args: &[&str]) -> Child {
    Command::new(BIN)
        .args(args)
        .env("CMP_CONFIG", config)
        .env_remove("CMP_LOG_LEVEL")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start cmp-bootstrapping")
}

pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Wait for `child` to exit within `timeout`.
pub fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let mut status = None;
    wait_for(timeout, || {
        status = child.try_wait().expect("failed to check child status");
        status.is_some()
    });
    status
}

pub fn output_text(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}
