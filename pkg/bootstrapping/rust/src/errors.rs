// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode {} as JSON", path.display())]
    EncodeJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not decode {} as JSON", path.display())]
    DecodeJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode {} as YAML", path.display())]
    EncodeYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("could not launch `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read output of `{command}`")]
    Output {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with `{code}` code")]
    ExitCode { command: String, code: i32 },

    #[error("could not report bootstrap log")]
    Reporting {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("could not rename {} to {}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policyfile bundle {}: {reason}", archive.display())]
    Bundle { archive: PathBuf, reason: String },

    #[error("invalid policyfile {field} {value:?}: {reason}")]
    InvalidPolicyfile {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("bootstrapping was cancelled")]
    Cancelled,

    #[error("applying policyfile {id} failed")]
    Policyfile {
        id: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the id of the policyfile being applied.
    pub(crate) fn for_policyfile(self, id: &str) -> Self {
        match self {
            // Already attributed, or not specific to one policyfile.
            Error::Policyfile { .. } | Error::Cancelled => self,
            other => Error::Policyfile {
                id: id.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True when the run stopped because cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
