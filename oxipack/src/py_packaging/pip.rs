// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    super::{
        distribution::ParsedPythonDistribution,
        fsscan::{find_python_resources, PythonFileResource},
        resource::PythonResource,
    },
    anyhow::{anyhow, Result},
    log::warn,
    std::{
        collections::HashMap,
        io::{BufRead, BufReader},
        path::Path,
    },
};

/// Convert the Python resources found in a directory.
///
/// Sources, resource files, and extension modules are retained.
pub fn resources_from_directory(path: &Path) -> Result<Vec<PythonResource>> {
    let mut res = Vec::new();

    for r in find_python_resources(path) {
        let r = r?;

        match r {
            PythonFileResource::Source { .. }
            | PythonFileResource::Resource(..)
            | PythonFileResource::ExtensionModule { .. } => {
                res.push(PythonResource::try_from(&r)?);
            }
            PythonFileResource::Other { .. } => {}
        }
    }

    Ok(res)
}

/// Run `pip install` and return found resources.
pub fn pip_install(
    dist: &ParsedPythonDistribution,
    verbose: bool,
    install_args: &[String],
    extra_envs: &HashMap<String, String>,
) -> Result<Vec<PythonResource>> {
    let temp_dir = tempfile::Builder::new()
        .prefix("oxipack-pip-install")
        .tempdir()?;

    dist.ensure_pip()?;

    let target_dir = temp_dir.path().join("install");

    warn!("pip installing to {}", target_dir.display());

    let mut pip_args: Vec<String> = vec![
        "-m".to_string(),
        "pip".to_string(),
        "--disable-pip-version-check".to_string(),
    ];

    if verbose {
        pip_args.push("--verbose".to_string());
    }

    pip_args.extend(vec![
        "install".to_string(),
        "--target".to_string(),
        format!("{}", target_dir.display()),
    ]);

    pip_args.extend(install_args.iter().cloned());

    let mut cmd = std::process::Command::new(&dist.python_exe)
        .args(&pip_args)
        .envs(extra_envs)
        .stdout(std::process::Stdio::piped())
        .spawn()?;
    {
        let stdout = cmd
            .stdout
            .as_mut()
            .ok_or_else(|| anyhow!("unable to get stdout"))?;
        let reader = BufReader::new(stdout);

        for line in reader.lines() {
            warn!("{}", line?);
        }
    }

    let status = cmd.wait()?;
    if !status.success() {
        return Err(anyhow!("error running pip"));
    }

    resources_from_directory(&target_dir)
}

#[cfg(test)]
mod tests {
    use {super::*, std::fs::create_dir_all};

    #[test]
    fn test_resources_from_directory() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let tp = td.path();

        let acme_path = tp.join("acme");
        create_dir_all(acme_path.join("__pycache__"))?;
        std::fs::write(acme_path.join("__init__.py"), "import os\n")?;
        std::fs::write(acme_path.join("data.txt"), "hello")?;
        std::fs::write(acme_path.join("__pycache__").join("__init__.cpython-37.pyc"), "")?;

        let resources = resources_from_directory(tp)?;
        assert_eq!(resources.len(), 2);

        match &resources[0] {
            PythonResource::ModuleSource {
                name,
                source,
                is_package,
            } => {
                assert_eq!(name, "acme");
                assert_eq!(source, b"import os\n");
                assert!(is_package);
            }
            _ => panic!("expected module source"),
        }

        match &resources[1] {
            PythonResource::Resource {
                package,
                name,
                data,
            } => {
                assert_eq!(package, "acme");
                assert_eq!(name, "data.txt");
                assert_eq!(data, b"hello");
            }
            _ => panic!("expected resource"),
        }

        Ok(())
    }
}
