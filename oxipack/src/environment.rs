// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolve details about the oxipack execution environment.

use std::path::{Path, PathBuf};

pub const OXIPACK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rust target triple of the machine oxipack was built on.
pub const HOST: &str = env!("HOST");

/// Version requirement of the `pyembed` crate written into new projects.
pub const PYEMBED_VERSION: &str = "0.3";

pub fn canonicalize_path(path: &Path) -> Result<PathBuf, std::io::Error> {
    let mut p = path.canonicalize()?;

    // Strip \\?\ prefix on Windows and replace \ with /, which is valid.
    if cfg!(windows) {
        let mut s = p.display().to_string().replace('\\', "/");
        if let Some(stripped) = s.strip_prefix("//?/") {
            s = stripped.to_string();
        }

        p = PathBuf::from(s);
    }

    Ok(p)
}

/// Target triple to build for when none is specified.
pub fn default_target_triple() -> &'static str {
    HOST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_path() -> Result<(), std::io::Error> {
        let temp_dir = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let nested = temp_dir.path().join("a");
        std::fs::create_dir(&nested)?;

        let p = canonicalize_path(&nested.join("..").join("a"))?;
        assert!(p.is_absolute());
        assert!(p.ends_with("a"));

        assert!(canonicalize_path(&temp_dir.path().join("missing")).is_err());

        Ok(())
    }

    #[test]
    fn test_default_target_triple() {
        assert_eq!(default_target_triple(), HOST);
        assert!(!HOST.is_empty());
    }
}
