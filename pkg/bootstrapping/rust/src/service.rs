// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::policyfile::{AppliedConfiguration, BootstrappingConfiguration, LogEntry};
use std::future::Future;
use std::path::Path;

/// Platform operations the bootstrapping engine depends on.
pub trait BootstrappingService {
    /// Pending policyfiles and attributes for this node.
    fn get_configuration(
        &self,
    ) -> impl Future<Output = anyhow::Result<BootstrappingConfiguration>>;

    /// Upload one chunk of command output.
    fn report_log(&self, entry: &LogEntry) -> impl Future<Output = anyhow::Result<()>>;

    /// Tell the platform which revisions are applied on this node.
    fn report_applied_configuration(
        &self,
        applied: &AppliedConfiguration,
    ) -> impl Future<Output = anyhow::Result<()>>;

    /// Store the bundle served at `url` as `path`.
    fn download_policyfile(
        &self,
        url: &str,
        path: &Path,
    ) -> impl Future<Output = anyhow::Result<()>>;
}
