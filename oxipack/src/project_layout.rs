// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handle file layout of oxipack projects.

use {
    crate::{
        app_packaging::config::CONFIG_FILENAME,
        environment::{canonicalize_path, PYEMBED_VERSION},
    },
    anyhow::{anyhow, Context, Result},
    handlebars::{Handlebars, TemplateError},
    once_cell::sync::Lazy,
    serde_json::json,
    std::{
        fs::{create_dir_all, OpenOptions},
        io::Write,
        path::Path,
    },
};

static HANDLEBARS: Lazy<Result<Handlebars<'static>, TemplateError>> = Lazy::new(|| {
    let mut handlebars = Handlebars::new();

    handlebars.register_template_string("new-build.rs", include_str!("templates/new-build.rs.hbs"))?;
    handlebars.register_template_string(
        "new-cargo.toml",
        include_str!("templates/new-cargo.toml.hbs"),
    )?;
    handlebars.register_template_string("new-main.rs", include_str!("templates/new-main.rs.hbs"))?;
    handlebars.register_template_string(
        "new-oxipack.bzl",
        include_str!("templates/new-oxipack.bzl.hbs"),
    )?;

    Ok(handlebars)
});

fn render(name: &str, data: &serde_json::Value) -> Result<String> {
    let handlebars = HANDLEBARS
        .as_ref()
        .map_err(|e| anyhow!("error parsing templates: {}", e))?;

    handlebars
        .render(name, data)
        .with_context(|| format!("rendering {}", name))
}

/// Write a file that must not already exist.
fn write_new_file(path: &Path, content: &str) -> Result<()> {
    println!("writing {}", path.display());

    let mut fh = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    fh.write_all(content.as_bytes())?;

    Ok(())
}

/// Quote a value as a Starlark string literal.
pub fn starlark_string_literal(value: &str) -> String {
    let mut res = String::with_capacity(value.len() + 2);
    res.push('"');

    for c in value.chars() {
        match c {
            '\\' => res.push_str("\\\\"),
            '"' => res.push_str("\\\""),
            '\n' => res.push_str("\\n"),
            '\r' => res.push_str("\\r"),
            '\t' => res.push_str("\\t"),
            c => res.push(c),
        }
    }

    res.push('"');
    res
}

/// Write a new `oxipack.bzl` into a directory.
///
/// `code` becomes the Python code run at startup. Without it the
/// application starts a REPL.
pub fn write_new_oxipack_config_file(
    project_dir: &Path,
    name: &str,
    code: Option<&str>,
    pip_install: &[&str],
) -> Result<()> {
    let path = project_dir.join(CONFIG_FILENAME);

    if path.exists() {
        return Err(anyhow!("config file {} already exists", path.display()));
    }

    let data = json!({
        "program_name": name,
        "python_code": code.map(starlark_string_literal),
        "pip_install_simple": pip_install
            .iter()
            .map(|p| starlark_string_literal(p))
            .collect::<Vec<_>>(),
    });

    write_new_file(&path, &render("new-oxipack.bzl", &data)?)
}

/// Write a new build.rs file that invokes this executable.
pub fn write_new_build_rs(path: &Path) -> Result<()> {
    let exe = canonicalize_path(&std::env::current_exe()?)?;

    let data = json!({
        "oxipack_exe": exe.display().to_string(),
    });

    write_new_file(path, &render("new-build.rs", &data)?)
}

/// Write a new main.rs file that runs the embedded Python interpreter.
pub fn write_new_main_rs(path: &Path) -> Result<()> {
    write_new_file(path, &render("new-main.rs", &json!({}))?)
}

/// Write a new Cargo.toml depending on the embedding runtime.
pub fn write_new_cargo_toml(project_dir: &Path, name: &str) -> Result<()> {
    let data = json!({
        "program_name": name,
        "pyembed_version": PYEMBED_VERSION,
    });

    write_new_file(&project_dir.join("Cargo.toml"), &render("new-cargo.toml", &data)?)
}

/// Create a new Rust project embedding Python.
///
/// The directory must not exist.
pub fn initialize_project(
    project_path: &Path,
    code: Option<&str>,
    pip_install: &[&str],
) -> Result<()> {
    if project_path.exists() {
        return Err(anyhow!("{} already exists", project_path.display()));
    }

    let name = project_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("unable to resolve project name of {}", project_path.display()))?;

    println!("creating {}", project_path.display());
    create_dir_all(project_path.join("src"))
        .with_context(|| format!("creating {}", project_path.display()))?;

    write_new_cargo_toml(project_path, name)?;
    write_new_build_rs(&project_path.join("build.rs"))?;
    write_new_main_rs(&project_path.join("src").join("main.rs"))?;
    write_new_oxipack_config_file(project_path, name, code, pip_install)?;

    Ok(())
}
