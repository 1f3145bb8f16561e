// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use log::debug;
use std::path::{Path, PathBuf};

/// Name chef-client on Windows expects the policyfile directory to have.
pub const ACTIVE_DIR_NAME: &str = "active";

const WINDOWS_PATH_PREFIX: &str = concat!(
    r#"set "PATH=C:\opscode\chef\bin;C:\opscode\chef\embedded\bin;"#,
    r#"C:\cinc-project\cinc\bin;C:\cinc-project\cinc\embedded\bin;"#,
    r#"C:\ruby\bin;%PATH%" && "#,
);

/// How a policyfile bundle directory is made ready for chef-client and put
/// back afterwards.
pub trait WorkdirStrategy: Send + Sync {
    /// Returns the directory the command has to run in.
    fn prepare(&self, bundle_dir: &Path) -> Result<PathBuf>;

    /// Undo `prepare`. Called whether the command succeeded or not.
    fn restore(&self, bundle_dir: &Path, prepared: &Path) -> Result<()>;

    /// Prepended to the composed command line.
    fn path_prefix(&self) -> &str;
}

/// Runs in the bundle directory as unpacked.
#[derive(Debug, Default, Clone, Copy)]
pub struct InPlace;

impl WorkdirStrategy for InPlace {
    fn prepare(&self, bundle_dir: &Path) -> Result<PathBuf> {
        Ok(bundle_dir.to_path_buf())
    }

    fn restore(&self, _bundle_dir: &Path, _prepared: &Path) -> Result<()> {
        Ok(())
    }

    fn path_prefix(&self) -> &str {
        ""
    }
}

/// Renames the bundle directory to `active` for the duration of the command
/// and extends PATH with the Chef/Cinc/Ruby install locations.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenameToActive;

impl WorkdirStrategy for RenameToActive {
    fn prepare(&self, bundle_dir: &Path) -> Result<PathBuf> {
        let active = bundle_dir.with_file_name(ACTIVE_DIR_NAME);
        rename(bundle_dir, &active)?;
        Ok(active)
    }

    fn restore(&self, bundle_dir: &Path, prepared: &Path) -> Result<()> {
        rename(prepared, bundle_dir)
    }

    fn path_prefix(&self) -> &str {
        WINDOWS_PATH_PREFIX
    }
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    debug!("renaming {} to {}", from.display(), to.display());
    std::fs::rename(from, to).map_err(|source| Error::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}

/// Strategy for the platform this binary was built for.
pub fn for_host() -> Box<dyn WorkdirStrategy> {
    if cfg!(windows) {
        Box::new(RenameToActive)
    } else {
        Box::new(InPlace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_place_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("web-r1");
        std::fs::create_dir(&bundle).unwrap();

        let prepared = InPlace.prepare(&bundle).unwrap();
        assert_eq!(prepared, bundle);
        InPlace.restore(&bundle, &prepared).unwrap();
        assert!(bundle.is_dir());
        assert_eq!(InPlace.path_prefix(), "");
    }

    #[test]
    fn test_rename_to_active_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("web-r1");
        std::fs::create_dir(&bundle).unwrap();
        std::fs::write(bundle.join("Policyfile.lock.json"), "{}").unwrap();

        let prepared = RenameToActive.prepare(&bundle).unwrap();
        assert_eq!(prepared, dir.path().join("active"));
        assert!(prepared.join("Policyfile.lock.json").exists());
        assert!(!bundle.exists());

        RenameToActive.restore(&bundle, &prepared).unwrap();
        assert!(bundle.join("Policyfile.lock.json").exists());
        assert!(!prepared.exists());
    }

    #[test]
    fn test_rename_missing_directory_surfaces_os_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RenameToActive
            .prepare(&dir.path().join("missing-r1"))
            .unwrap_err();
        assert!(matches!(err, Error::Rename { .. }));
    }

    #[test]
    fn test_windows_prefix_extends_path() {
        let prefix = RenameToActive.path_prefix();
        assert!(prefix.starts_with("set \"PATH="));
        assert!(prefix.contains(r"C:\opscode\chef\embedded\bin"));
        assert!(prefix.contains(r"C:\cinc-project\cinc\embedded\bin"));
        assert!(prefix.ends_with("%PATH%\" && "));
    }
}
