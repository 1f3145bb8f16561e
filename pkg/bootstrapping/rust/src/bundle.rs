// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};
use flate2::read::GzDecoder;
use log::debug;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

/// Unpack a gzip-compressed tarball into `target`, creating it if needed.
/// Entries that would land outside `target` are rejected.
pub fn extract(archive: &Path, target: &Path) -> Result<()> {
    let invalid = |reason: String| Error::Bundle {
        archive: archive.to_path_buf(),
        reason,
    };

    let file = File::open(archive).map_err(|source| Error::Read {
        path: archive.to_path_buf(),
        source,
    })?;
    fs::create_dir_all(target).map_err(|source| Error::Write {
        path: target.to_path_buf(),
        source,
    })?;

    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    let entries = tarball
        .entries()
        .map_err(|e| invalid(format!("unreadable archive: {e}")))?;

    let mut count = 0usize;
    for entry in entries {
        let mut entry = entry.map_err(|e| invalid(format!("unreadable entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| invalid(format!("unreadable entry path: {e}")))?
            .into_owned();
        let relative = sanitize(&path).ok_or_else(|| {
            invalid(format!("entry {} escapes the bundle directory", path.display()))
        })?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let destination = target.join(&relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        entry
            .unpack(&destination)
            .map_err(|source| Error::Write {
                path: destination.clone(),
                source,
            })?;
        count += 1;
    }

    debug!(
        "unpacked {count} entries from {} into {}",
        archive.display(),
        target.display()
    );
    Ok(())
}

fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}
