// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! HTTP client for the platform's bootstrapping endpoints.

use crate::config::ClientConfig;
use crate::policyfile::{AppliedConfiguration, BootstrappingConfiguration, LogEntry};
use crate::service::BootstrappingService;
use anyhow::{Context, Result};
use log::debug;
use reqwest::{Certificate, Identity};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const CONFIGURATION_PATH: &str = "/blueprint/configuration";
const BOOTSTRAP_LOGS_PATH: &str = "/blueprint/bootstrap_logs";
const APPLIED_CONFIGURATION_PATH: &str = "/blueprint/applied_configuration";

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let endpoint = config
            .api_endpoint
            .as_deref()
            .context("api_endpoint is not configured")?;

        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.request_timeout_secs));

        if let Some(ref cert) = config.certificate {
            let mut pem = std::fs::read(&cert.cert)
                .with_context(|| format!("reading {}", cert.cert.display()))?;
            pem.push(b'\n');
            pem.extend(
                std::fs::read(&cert.key)
                    .with_context(|| format!("reading {}", cert.key.display()))?,
            );
            builder = builder.identity(
                Identity::from_pem(&pem).context("Failed to load client certificate")?,
            );

            if let Some(ref ca) = cert.ca {
                let ca_pem =
                    std::fs::read(ca).with_context(|| format!("reading {}", ca.display()))?;
                builder = builder.add_root_certificate(
                    Certificate::from_pem(&ca_pem).context("Failed to load CA certificate")?,
                );
            }
        }

        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self {
            base_url: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl BootstrappingService for ApiClient {
    async fn get_configuration(&self) -> Result<BootstrappingConfiguration> {
        let url = self.url(CONFIGURATION_PATH);
        self.client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch bootstrapping configuration")?
            .error_for_status()
            .context("Failed to fetch bootstrapping configuration")?
            .json()
            .await
            .context("Failed to parse bootstrapping configuration")
    }

    async fn report_log(&self, entry: &LogEntry) -> Result<()> {
        let url = self.url(BOOTSTRAP_LOGS_PATH);
        self.client
            .post(&url)
            .json(entry)
            .send()
            .await
            .context("Failed to send bootstrap log")?
            .error_for_status()
            .context("Bootstrap log was rejected")?;
        Ok(())
    }

    async fn report_applied_configuration(&self, applied: &AppliedConfiguration) -> Result<()> {
        let url = self.url(APPLIED_CONFIGURATION_PATH);
        self.client
            .put(&url)
            .json(applied)
            .send()
            .await
            .context("Failed to send applied configuration")?
            .error_for_status()
            .context("Applied configuration was rejected")?;
        Ok(())
    }

    async fn download_policyfile(&self, url: &str, path: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {url}"))?
            .error_for_status()
            .with_context(|| format!("Failed to download {url}"))?;

        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        let mut written = 0usize;
        while let Some(bytes) = response
            .chunk()
            .await
            .with_context(|| format!("Failed to download {url}"))?
        {
            file.write_all(&bytes)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            written += bytes.len();
        }
        file.flush().await?;
        debug!("downloaded {written} bytes from {url} to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_endpoint() {
        let err = ApiClient::new(&ClientConfig::default()).err().unwrap();
        assert!(err.to_string().contains("api_endpoint"));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = ClientConfig {
            api_endpoint: Some("https://clients.cmp.example.com:886/v3/".to_string()),
            ..ClientConfig::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(
            client.url(CONFIGURATION_PATH),
            "https://clients.cmp.example.com:886/v3/blueprint/configuration"
        );
    }

    #[test]
    fn test_missing_certificate_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            api_endpoint: Some("https://localhost".to_string()),
            certificate: Some(crate::config::CertificateConfig {
                cert: dir.path().join("cert.crt"),
                key: dir.path().join("cert.key"),
                ca: None,
            }),
            ..ClientConfig::default()
        };
        let err = ApiClient::new(&config).err().unwrap();
        assert!(format!("{err:#}").contains("cert.crt"));
    }
}
