// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Tar archives of packaged applications.
*/

use {
    super::{
        config::{Distribution, DistributionTarball},
        state::BuildContext,
    },
    anyhow::{Context, Result},
    log::{info, warn},
    std::{
        fs::{create_dir_all, File},
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Write an uncompressed tar of a directory's content to a writer.
///
/// Entries are added in sorted order with normalized metadata so the same
/// input produces the same archive.
pub fn write_tarball_from_directory<W: Write>(
    fh: &mut W,
    source_path: &Path,
    path_prefix: Option<&str>,
) -> Result<()> {
    let mut builder = tar::Builder::new(fh);
    builder.mode(tar::HeaderMode::Deterministic);

    // The tar crate doesn't order directory iteration.
    let walk = walkdir::WalkDir::new(source_path).sort_by(|a, b| a.file_name().cmp(b.file_name()));

    for entry in walk {
        let entry = entry?;
        let path = entry.path();

        if path == source_path {
            continue;
        }

        let rel_path = path.strip_prefix(source_path)?;

        let archive_path = match path_prefix {
            Some(prefix) => PathBuf::from(prefix).join(rel_path),
            None => rel_path.to_path_buf(),
        };

        info!("adding {} as {}", path.display(), archive_path.display());
        builder
            .append_path_with_name(path, &archive_path)
            .with_context(|| format!("adding {} to tarball", path.display()))?;
    }

    builder.finish()?;

    Ok(())
}

/// Write `<app name>.tar` of the application directory.
pub fn produce_tarball(context: &BuildContext, config: &DistributionTarball) -> Result<PathBuf> {
    let filename = context
        .distributions_path
        .join(format!("{}.tar", context.app_name));

    warn!("writing tarball to {}", filename.display());

    create_dir_all(&context.distributions_path)
        .with_context(|| format!("creating {}", context.distributions_path.display()))?;

    let mut fh =
        File::create(&filename).with_context(|| format!("opening {}", filename.display()))?;

    write_tarball_from_directory(&mut fh, &context.app_path, config.path_prefix.as_deref())?;

    Ok(filename)
}

/// Produce every distribution the configuration asks for.
///
/// The application must already be packaged into its directory.
pub fn produce_distributions(context: &BuildContext) -> Result<Vec<PathBuf>> {
    let mut res = Vec::new();

    for distribution in &context.config.distributions {
        match distribution {
            Distribution::Tarball(config) => res.push(produce_tarball(context, config)?),
        }
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            app_packaging::config::{BuildConfig, Config},
            py_packaging::{
                config::{EmbeddedPythonConfig, RunMode},
                distribution::PythonDistributionLocation,
            },
        },
        std::fs::write,
    };

    const TARGET: &str = "x86_64-unknown-linux-gnu";

    fn archive_names(data: &[u8]) -> Result<Vec<String>> {
        let mut archive = tar::Archive::new(data);

        let mut names = Vec::new();
        for entry in archive.entries()? {
            let name = entry?.path()?.display().to_string();
            names.push(name.trim_end_matches('/').to_string());
        }

        Ok(names)
    }

    fn populate(root: &Path) -> Result<()> {
        create_dir_all(root.join("lib").join("acme"))?;
        write(root.join("myapp"), "exe")?;
        write(root.join("lib").join("acme").join("__init__.py"), "")?;
        write(root.join("COPYING.txt"), "license")?;

        Ok(())
    }

    #[test]
    fn test_write_tarball_sorted() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        populate(td.path())?;

        let mut data = Vec::new();
        write_tarball_from_directory(&mut data, td.path(), None)?;

        assert_eq!(
            archive_names(&data)?,
            vec![
                "COPYING.txt",
                "lib",
                "lib/acme",
                "lib/acme/__init__.py",
                "myapp"
            ]
        );

        let mut again = Vec::new();
        write_tarball_from_directory(&mut again, td.path(), None)?;
        assert_eq!(data, again);

        Ok(())
    }

    #[test]
    fn test_write_tarball_prefix() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        populate(td.path())?;

        let mut data = Vec::new();
        write_tarball_from_directory(&mut data, td.path(), Some("myapp-1.0"))?;

        let names = archive_names(&data)?;
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|n| n.starts_with("myapp-1.0/")));
        assert!(names.contains(&"myapp-1.0/lib/acme/__init__.py".to_string()));

        Ok(())
    }

    #[test]
    fn test_produce_distributions() -> Result<()> {
        let td = tempfile::Builder::new().prefix("oxipack-test").tempdir()?;
        let root = td.path();
        write(root.join("Cargo.toml"), "")?;

        let config = Config {
            config_path: root.join("oxipack.bzl"),
            build_config: BuildConfig {
                application_name: "myapp".to_string(),
                build_path: root.join("build"),
            },
            embedded_python_config: EmbeddedPythonConfig::default_for_target(TARGET),
            python_distribution: PythonDistributionLocation::Url {
                url: "https://example.com/python.tar.zst".to_string(),
                sha256: "0".repeat(64),
            },
            python_packaging: vec![],
            run: RunMode::Repl,
            distributions: vec![Distribution::Tarball(DistributionTarball {
                path_prefix: Some("myapp".to_string()),
            })],
        };

        let context = BuildContext::from_config(root, config, None, TARGET, false, None, false)?;
        populate(&context.app_path)?;

        let paths = produce_distributions(&context)?;
        assert_eq!(paths, vec![context.distributions_path.join("myapp.tar")]);

        let data = std::fs::read(&paths[0])?;
        assert!(archive_names(&data)?.contains(&"myapp/myapp".to_string()));

        Ok(())
    }
}
