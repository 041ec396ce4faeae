// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    anyhow::{Context, Result},
    std::path::{Path, PathBuf},
};

/// Resolve the files matching a glob pattern.
///
/// Relative patterns are evaluated against `cwd`. Directories are not returned.
pub fn evaluate_glob(cwd: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let search = if Path::new(pattern).is_absolute() || pattern.starts_with('/') {
        pattern.to_string()
    } else {
        format!("{}/{}", cwd.display(), pattern)
    };

    let mut res = Vec::new();

    for path in glob::glob(&search).with_context(|| format!("invalid glob: {}", pattern))? {
        let path = path?;

        if path.is_file() {
            res.push(path);
        }
    }

    Ok(res)
}
