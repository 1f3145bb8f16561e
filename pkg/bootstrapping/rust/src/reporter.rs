// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::policyfile::{LogEntry, Policyfile};
use crate::runner::{Chunk, ChunkSink};
use crate::service::BootstrappingService;
use anyhow::Context;
use log::{debug, info};
use regex::Regex;
use std::sync::LazyLock;

static CMS_VERSION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?:(?:Chef|Cinc)(?: Infra)? Client, version ([0-9][0-9A-Za-z.\-]*))|(?:ansible-playbook (?:\[core )?([0-9][0-9A-Za-z.\-]*))",
    )
    .ok()
});

/// Extract the configuration-management tool version from a banner line.
pub fn detect_cms_version(line: &str) -> Option<String> {
    let captures = CMS_VERSION.as_ref()?.captures(line)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().trim_end_matches('.').to_string())
}

/// Posts every chunk of a policyfile's command output as a bootstrap log entry.
pub struct LogReporter<'a, S> {
    service: &'a S,
    policyfile: &'a Policyfile,
    cms_version: &'a mut Option<String>,
}

impl<'a, S: BootstrappingService> LogReporter<'a, S> {
    pub fn new(
        service: &'a S,
        policyfile: &'a Policyfile,
        cms_version: &'a mut Option<String>,
    ) -> Self {
        Self {
            service,
            policyfile,
            cms_version,
        }
    }
}

impl<S: BootstrappingService> ChunkSink for LogReporter<'_, S> {
    async fn accept(&mut self, chunk: &Chunk) -> anyhow::Result<()> {
        if self.cms_version.is_none()
            && let Some(version) = chunk.lines.iter().find_map(|l| detect_cms_version(l))
        {
            info!("[{}] detected cms version {version}", self.policyfile.id);
            *self.cms_version = Some(version);
        }

        let entry = LogEntry {
            policyfile_id: self.policyfile.id.clone(),
            policyfile_revision_id: self.policyfile.revision_id.clone(),
            stdout: chunk.text(),
            cms_version: self.cms_version.clone(),
            exit_code: chunk.exit_code,
        };
        debug!(
            "[{}] reporting {} line(s)",
            self.policyfile.id,
            chunk.lines.len()
        );
        self.service
            .report_log(&entry)
            .await
            .with_context(|| format!("reporting output of policyfile {}", self.policyfile.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingService;

    fn policyfile() -> Policyfile {
        Policyfile {
            id: "web".into(),
            revision_id: "r3".into(),
            download_url: String::new(),
        }
    }

    #[test]
    fn test_detect_chef_banners() {
        assert_eq!(
            detect_cms_version("Starting Chef Infra Client, version 18.2.7").as_deref(),
            Some("18.2.7")
        );
        assert_eq!(
            detect_cms_version("Starting Cinc Client, version 17.10.0").as_deref(),
            Some("17.10.0")
        );
        assert_eq!(
            detect_cms_version("Starting Chef Client, version 14.15.6.").as_deref(),
            Some("14.15.6")
        );
    }

    #[test]
    fn test_detect_ansible_banners() {
        assert_eq!(
            detect_cms_version("ansible-playbook [core 2.15.3]").as_deref(),
            Some("2.15.3")
        );
        assert_eq!(
            detect_cms_version("ansible-playbook 2.9.27").as_deref(),
            Some("2.9.27")
        );
    }

    #[test]
    fn test_detect_nothing() {
        assert!(detect_cms_version("Recipe: nginx::default").is_none());
        assert!(detect_cms_version("").is_none());
    }

    #[tokio::test]
    async fn test_reports_each_chunk_with_context() {
        let service = RecordingService::default();
        let pf = policyfile();
        let mut cms_version = None;
        let mut reporter = LogReporter::new(&service, &pf, &mut cms_version);

        reporter
            .accept(&Chunk {
                lines: vec!["Starting Chef Infra Client, version 18.2.7".into()],
                exit_code: None,
            })
            .await
            .unwrap();
        reporter
            .accept(&Chunk {
                lines: vec!["done".into()],
                exit_code: Some(0),
            })
            .await
            .unwrap();

        let logs = service.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].policyfile_id, "web");
        assert_eq!(logs[0].policyfile_revision_id, "r3");
        assert_eq!(logs[0].stdout, "Starting Chef Infra Client, version 18.2.7\n");
        assert_eq!(logs[0].exit_code, None);
        assert_eq!(logs[1].cms_version.as_deref(), Some("18.2.7"));
        assert_eq!(logs[1].exit_code, Some(0));
        assert_eq!(cms_version.as_deref(), Some("18.2.7"));
    }

    #[tokio::test]
    async fn test_keeps_first_detected_version() {
        let service = RecordingService::default();
        let pf = policyfile();
        let mut cms_version = Some("17.0.0".to_string());
        let mut reporter = LogReporter::new(&service, &pf, &mut cms_version);

        reporter
            .accept(&Chunk {
                lines: vec!["Starting Chef Infra Client, version 18.2.7".into()],
                exit_code: None,
            })
            .await
            .unwrap();

        assert_eq!(service.logs()[0].cms_version.as_deref(), Some("17.0.0"));
    }

    #[tokio::test]
    async fn test_propagates_service_error() {
        let service = RecordingService {
            fail_log_at: Some(1),
            ..RecordingService::default()
        };
        let pf = policyfile();
        let mut cms_version = None;
        let mut reporter = LogReporter::new(&service, &pf, &mut cms_version);

        let err = reporter.accept(&Chunk::default()).await.unwrap_err();
        assert!(format!("{err:#}").contains("policyfile web"));
        assert!(service.logs().is_empty());
    }
}
