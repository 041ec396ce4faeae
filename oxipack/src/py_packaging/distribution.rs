// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Obtaining, extracting, and parsing Python distributions.

A distribution is a tar archive (optionally zstandard compressed) containing a
`python/PYTHON.json` file describing the Python install within it.
*/

use {
    super::fsscan::{find_python_resources, PythonFileResource},
    anyhow::{anyhow, Context, Result},
    fs2::FileExt,
    itertools::Itertools,
    log::warn,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::{
        collections::BTreeMap,
        fs::{self, create_dir_all, File},
        io::Read,
        path::{Path, PathBuf},
    },
    url::Url,
};

const STDLIB_TEST_PACKAGES: &[&str] = &[
    "bsddb.test",
    "ctypes.test",
    "distutils.tests",
    "email.test",
    "idlelib.idle_test",
    "json.tests",
    "lib-tk.test",
    "lib2to3.tests",
    "sqlite3.test",
    "test",
    "tkinter.test",
    "unittest.test",
];

/// Whether a module or package name belongs to a standard library test package.
pub fn is_stdlib_test_package(name: &str) -> bool {
    for package in STDLIB_TEST_PACKAGES {
        let prefix = format!("{}.", package);

        if &name == package || name.starts_with(&prefix) {
            return true;
        }
    }

    false
}

/// Denotes methods to filter extension modules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtensionModuleFilter {
    Minimal,
    All,
    NoLibraries,
    NoGPL,
}

impl TryFrom<&str> for ExtensionModuleFilter {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "minimal" => Ok(ExtensionModuleFilter::Minimal),
            "all" => Ok(ExtensionModuleFilter::All),
            "no-libraries" => Ok(ExtensionModuleFilter::NoLibraries),
            "no-gpl" => Ok(ExtensionModuleFilter::NoGPL),
            t => Err(format!("{} is not a valid extension module filter", t)),
        }
    }
}

/// Where a Python distribution can be obtained from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PythonDistributionLocation {
    Local { local_path: String, sha256: String },
    Url { url: String, sha256: String },
}

impl PythonDistributionLocation {
    pub fn sha256(&self) -> &str {
        match self {
            Self::Local { sha256, .. } => sha256,
            Self::Url { sha256, .. } => sha256,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LinkEntry {
    name: String,
    framework: Option<bool>,
    system: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PythonBuildExtensionInfo {
    in_core: bool,
    init_fn: String,
    licenses: Option<Vec<String>>,
    license_paths: Option<Vec<String>>,
    license_public_domain: Option<bool>,
    #[serde(default)]
    links: Vec<LinkEntry>,
    required: bool,
    variant: String,
}

#[derive(Debug, Deserialize)]
struct PythonBuildInfo {
    #[serde(default)]
    extensions: BTreeMap<String, Vec<PythonBuildExtensionInfo>>,
}

#[derive(Debug, Deserialize)]
struct PythonJsonMain {
    arch: String,
    os: String,
    python_exe: String,
    python_flavor: String,
    python_stdlib: String,
    python_version: String,
    build_info: PythonBuildInfo,
    licenses: Option<Vec<String>>,
    license_path: Option<String>,
}

fn parse_python_json(path: &Path) -> Result<PythonJsonMain> {
    if !path.exists() {
        return Err(anyhow!(
            "{} does not exist; are you using a Python distribution that conforms with our requirements?",
            path.display()
        ));
    }

    let buf = fs::read(path).with_context(|| format!("reading {}", path.display()))?;

    serde_json::from_slice(&buf).with_context(|| format!("parsing {}", path.display()))
}

/// Describes a library dependency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryDepends {
    /// Name of the library we depend on.
    pub name: String,

    /// Whether this is a system framework.
    pub framework: bool,

    /// Whether this is a system library.
    pub system: bool,
}

/// Describes an extension module in a Python distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionModule {
    /// Name of the Python module this extension module provides.
    pub module: String,

    /// Module initialization function.
    pub init_fn: Option<String>,

    /// Whether the extension module is built-in by default.
    pub builtin_default: bool,

    /// Library linking metadata.
    pub links: Vec<LibraryDepends>,

    /// Whether the extension must be loaded to initialize Python.
    pub required: bool,

    /// Name of the variant of this extension module.
    pub variant: String,

    /// SPDX license shortnames that apply to this extension.
    pub licenses: Option<Vec<String>>,

    /// Whether the license for this extension is in the public domain.
    pub license_public_domain: Option<bool>,
}

impl ExtensionModule {
    /// Whether this extension only links against system libraries and frameworks.
    pub fn links_only_system(&self) -> bool {
        self.links.iter().all(|l| l.system || l.framework)
    }

    /// Whether any license of this extension is in the GPL family.
    pub fn is_gpl(&self) -> bool {
        match &self.licenses {
            Some(licenses) => licenses.iter().any(|l| l.contains("GPL")),
            None => false,
        }
    }
}

/// Describes license information for a library.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseInfo {
    /// SPDX license shortnames.
    pub licenses: Vec<String>,
    /// Suggested filename for the license.
    pub license_filename: String,
    /// Text of the license.
    pub license_text: String,
}

/// Paths within a Python installation.
#[derive(Debug, PartialEq, Eq)]
pub struct PythonPaths {
    pub stdlib: PathBuf,
    pub site_packages: PathBuf,
}

/// Resolve the location of Python modules given a base install path.
pub fn resolve_python_paths(base: &Path, python_version: &str) -> PythonPaths {
    let p = base.to_path_buf();

    let windows_layout = p.join("Scripts").exists();

    let stdlib_path = if windows_layout {
        p.join("Lib")
    } else {
        let major_minor = python_version.split('.').take(2).join(".");
        p.join("lib").join(format!("python{}", major_minor))
    };

    PythonPaths {
        site_packages: stdlib_path.join("site-packages"),
        stdlib: stdlib_path,
    }
}

/// Minimal summary of a distribution, suitable for logging.
#[derive(Debug)]
pub struct PythonDistributionMinimalInfo {
    pub flavor: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub extension_modules: Vec<String>,
    pub py_module_count: usize,
}

/// Represents a parsed Python distribution.
#[derive(Clone, Debug)]
pub struct ParsedPythonDistribution {
    /// Directory where distribution lives in the filesystem.
    pub base_dir: PathBuf,

    /// Python distribution flavor.
    pub flavor: String,

    /// Python version string.
    pub version: String,

    /// Operating system this Python runs on.
    pub os: String,

    /// Architecture this Python runs on.
    pub arch: String,

    /// Path to Python interpreter executable.
    pub python_exe: PathBuf,

    /// Path to Python standard library.
    pub stdlib_path: PathBuf,

    /// SPDX license shortnames that apply to the core distribution.
    pub licenses: Option<Vec<String>>,

    /// Extension modules available to this distribution.
    ///
    /// The first variant of each entry is the default one.
    pub extension_modules: BTreeMap<String, Vec<ExtensionModule>>,

    /// Python source modules in the standard library.
    pub py_modules: BTreeMap<String, PathBuf>,

    /// Non-module Python resource files, keyed by package then resource name.
    pub resources: BTreeMap<String, BTreeMap<String, PathBuf>>,

    /// Describes license info for things in this distribution.
    pub license_infos: BTreeMap<String, Vec<LicenseInfo>>,
}

/// A Python source module read from a distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceModule {
    pub name: String,
    pub source: Vec<u8>,
    pub is_package: bool,
}

impl ParsedPythonDistribution {
    /// Parse an extracted distribution directory.
    ///
    /// The directory must contain `python/PYTHON.json`.
    pub fn from_directory(dist_dir: &Path) -> Result<Self> {
        let python_path = dist_dir.join("python");
        let pi = parse_python_json(&python_path.join("PYTHON.json"))?;

        let mut license_infos = BTreeMap::new();

        if let Some(python_license_path) = &pi.license_path {
            let license_path = python_path.join(python_license_path);
            let license_text = fs::read_to_string(&license_path)
                .with_context(|| format!("reading Python license {}", license_path.display()))?;

            license_infos.insert(
                "python".to_string(),
                vec![LicenseInfo {
                    licenses: pi.licenses.clone().unwrap_or_default(),
                    license_filename: "LICENSE.python.txt".to_string(),
                    license_text,
                }],
            );
        }

        let mut extension_modules = BTreeMap::new();

        for (module, variants) in &pi.build_info.extensions {
            let mut ems = Vec::new();

            for entry in variants {
                if let Some(license_paths) = &entry.license_paths {
                    let mut licenses = Vec::new();

                    for license_path in license_paths {
                        let license_path = python_path.join(license_path);
                        let license_text = fs::read_to_string(&license_path).with_context(|| {
                            format!("reading license file {}", license_path.display())
                        })?;

                        licenses.push(LicenseInfo {
                            licenses: entry.licenses.clone().unwrap_or_default(),
                            license_filename: license_path
                                .file_name()
                                .map(|x| x.to_string_lossy().to_string())
                                .unwrap_or_else(|| format!("LICENSE.{}.txt", module)),
                            license_text,
                        });
                    }

                    license_infos.insert(module.clone(), licenses);
                }

                ems.push(ExtensionModule {
                    module: module.clone(),
                    init_fn: Some(entry.init_fn.clone()),
                    builtin_default: entry.in_core,
                    links: entry
                        .links
                        .iter()
                        .map(|link| LibraryDepends {
                            name: link.name.clone(),
                            framework: link.framework.unwrap_or(false),
                            system: link.system.unwrap_or(false),
                        })
                        .collect(),
                    required: entry.required,
                    variant: entry.variant.clone(),
                    licenses: entry.licenses.clone(),
                    license_public_domain: entry.license_public_domain,
                });
            }

            if !ems.is_empty() {
                extension_modules.insert(module.clone(), ems);
            }
        }

        let stdlib_path = python_path.join(&pi.python_stdlib);

        let mut py_modules = BTreeMap::new();
        let mut resources: BTreeMap<String, BTreeMap<String, PathBuf>> = BTreeMap::new();

        let site_packages = stdlib_path.join("site-packages");

        for entry in find_python_resources(&stdlib_path) {
            let entry = entry?;

            // Packages installed into the distribution are not the standard library.
            let in_site_packages = match &entry {
                PythonFileResource::Source { path, .. }
                | PythonFileResource::ExtensionModule { path, .. }
                | PythonFileResource::Other { path } => path.starts_with(&site_packages),
                PythonFileResource::Resource(resource) => resource.path.starts_with(&site_packages),
            };

            if in_site_packages {
                continue;
            }

            match entry {
                PythonFileResource::Source {
                    full_name, path, ..
                } => {
                    py_modules.insert(full_name, path);
                }
                PythonFileResource::Resource(resource) => {
                    resources
                        .entry(resource.package.clone())
                        .or_default()
                        .insert(resource.stem.clone(), resource.path);
                }
                _ => {}
            }
        }

        Ok(Self {
            base_dir: dist_dir.to_path_buf(),
            flavor: pi.python_flavor.clone(),
            version: pi.python_version.clone(),
            os: pi.os.clone(),
            arch: pi.arch.clone(),
            python_exe: python_path.join(&pi.python_exe),
            stdlib_path,
            licenses: pi.licenses.clone(),
            extension_modules,
            py_modules,
            resources,
            license_infos,
        })
    }

    /// Obtain a parsed distribution from an archive or directory.
    ///
    /// Archives are extracted into `extract_dir`. Directories are used as is.
    pub fn from_path(path: &Path, extract_dir: &Path) -> Result<Self> {
        if path.is_dir() {
            return Self::from_directory(path);
        }

        extract_distribution(path, extract_dir)?;

        Self::from_directory(extract_dir)
    }

    pub fn as_minimal_info(&self) -> PythonDistributionMinimalInfo {
        PythonDistributionMinimalInfo {
            flavor: self.flavor.clone(),
            version: self.version.clone(),
            os: self.os.clone(),
            arch: self.arch.clone(),
            extension_modules: self.extension_modules.keys().cloned().collect_vec(),
            py_module_count: self.py_modules.len(),
        }
    }

    /// The bytecode cache tag, e.g. `cpython-37`.
    pub fn cache_tag(&self) -> String {
        let major_minor = self.version.split('.').take(2).join("");

        format!("{}-{}", self.flavor, major_minor)
    }

    /// Obtain extension modules satisfying a filter.
    ///
    /// At most one variant per extension module is returned.
    pub fn filter_extension_modules(&self, filter: &ExtensionModuleFilter) -> Vec<ExtensionModule> {
        let mut res = Vec::new();

        for (name, variants) in &self.extension_modules {
            let chosen = match filter {
                ExtensionModuleFilter::All => variants.first(),
                ExtensionModuleFilter::Minimal => variants
                    .first()
                    .filter(|em| em.builtin_default || em.required),
                ExtensionModuleFilter::NoLibraries => {
                    variants.iter().find(|em| em.links_only_system())
                }
                ExtensionModuleFilter::NoGPL => variants.iter().find(|em| !em.is_gpl()),
            };

            match chosen {
                Some(em) => res.push(em.clone()),
                None => {
                    if variants.iter().any(|em| em.builtin_default || em.required) {
                        warn!(
                            "required extension module {} has no variant satisfying filter {:?}",
                            name, filter
                        );
                    }
                }
            }
        }

        res
    }

    /// Obtain Python source modules in the standard library.
    pub fn source_modules(&self) -> Result<Vec<SourceModule>> {
        self.py_modules
            .iter()
            .map(|(name, path)| {
                let source =
                    fs::read(path).with_context(|| format!("reading {}", path.display()))?;

                Ok(SourceModule {
                    name: name.clone(),
                    source,
                    is_package: super::fsscan::is_package_from_path(path),
                })
            })
            .collect()
    }

    /// Ensure pip is available to run in the distribution.
    pub fn ensure_pip(&self) -> Result<()> {
        let status = std::process::Command::new(&self.python_exe)
            .args(["-m", "pip", "--version"])
            .stdout(std::process::Stdio::null())
            .status()?;

        if !status.success() {
            warn!("pip not found in distribution; running ensurepip");
            let status = std::process::Command::new(&self.python_exe)
                .args(["-m", "ensurepip"])
                .status()?;

            if !status.success() {
                return Err(anyhow!("ensurepip failed"));
            }
        }

        Ok(())
    }
}

/// Multiple processes could race to extract or download into the same
/// directory. So a lock file guards access.
struct DirectoryLock {
    file: File,
}

impl DirectoryLock {
    fn new(dir: &Path, name: &str) -> Result<Self> {
        create_dir_all(dir)?;
        let lock_path = dir.join(name);

        let file = File::create(&lock_path)
            .with_context(|| format!("could not create {}", lock_path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("failed to obtain lock for {}", lock_path.display()))?;

        Ok(Self { file })
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Extract a distribution archive into a directory.
///
/// `.tar.zst` archives are zstandard decompressed. Anything else is read as a
/// plain tar archive. Extraction is skipped if a previous extraction completed.
pub fn extract_distribution(archive_path: &Path, extract_dir: &Path) -> Result<()> {
    let marker = extract_dir.join(".extracted");

    let parent = extract_dir
        .parent()
        .ok_or_else(|| anyhow!("unable to resolve parent of {}", extract_dir.display()))?;
    let _lock = DirectoryLock::new(parent, "distribution-extract-lock")?;

    if marker.exists() {
        return Ok(());
    }

    if extract_dir.exists() {
        remove_dir_all::remove_dir_all(extract_dir)?;
    }
    create_dir_all(extract_dir)?;

    let fh = File::open(archive_path)
        .with_context(|| format!("opening {}", archive_path.display()))?;

    let name = archive_path.to_string_lossy();

    if name.ends_with(".zst") {
        let dctx = zstd::stream::Decoder::new(fh)?;
        tar::Archive::new(dctx).unpack(extract_dir)
    } else {
        tar::Archive::new(fh).unpack(extract_dir)
    }
    .with_context(|| format!("extracting {}", archive_path.display()))?;

    // Archives sometimes carry read-only permissions, which trips up later copies.
    for entry in walkdir::WalkDir::new(extract_dir) {
        let entry = entry?;
        let mut permissions = entry.metadata()?.permissions();

        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(entry.path(), permissions)
                .with_context(|| format!("unable to mark {} as writable", entry.path().display()))?;
        }
    }

    fs::write(&marker, b"")?;

    Ok(())
}

/// Compute the SHA-256 of a file.
pub fn sha256_path(path: &Path) -> Result<Vec<u8>> {
    let mut hasher = Sha256::new();
    let fh = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = std::io::BufReader::new(fh);

    let mut buffer = [0; 32768];

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(hasher.finalize().to_vec())
}

pub fn get_http_client() -> reqwest::Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::ClientBuilder::new();

    for (key, value) in std::env::vars() {
        let key = key.to_lowercase();
        if let Some(schema) = key.strip_suffix("_proxy") {
            if let Ok(url) = Url::parse(&value) {
                let proxy = match schema {
                    "http" => Some(reqwest::Proxy::http(url.as_str())),
                    "https" => Some(reqwest::Proxy::https(url.as_str())),
                    _ => None,
                };

                if let Some(Ok(proxy)) = proxy {
                    builder = builder.proxy(proxy);
                }
            }
        }
    }

    builder.build()
}

/// Ensure a Python distribution at a URL is available in a local directory.
///
/// The path to the downloaded and validated file is returned.
pub fn download_distribution(url: &str, sha256: &str, cache_dir: &Path) -> Result<PathBuf> {
    let expected_hash = hex::decode(sha256)?;
    let u = Url::parse(url)?;

    let basename = u
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("unable to resolve filename from URL {}", url))?
        .to_string();

    let _lock = DirectoryLock::new(cache_dir, "distribution-download-lock")?;

    let cache_path = cache_dir.join(basename);

    if cache_path.exists() && sha256_path(&cache_path)? == expected_hash {
        return Ok(cache_path);
    }

    warn!("downloading {}", u);
    let client = get_http_client()?;
    let mut response = client.get(u.as_str()).send()?.error_for_status()?;

    let mut data: Vec<u8> = Vec::new();
    response.read_to_end(&mut data)?;

    let url_hash = Sha256::digest(&data).to_vec();
    if url_hash != expected_hash {
        return Err(anyhow!("sha256 of Python distribution does not validate"));
    }

    let mut temp_file = tempfile::NamedTempFile::new_in(cache_dir)?;
    std::io::Write::write_all(&mut temp_file, &data)?;
    temp_file
        .persist(&cache_path)
        .with_context(|| format!("unable to persist {}", cache_path.display()))?;

    Ok(cache_path)
}

/// Verify a local distribution archive and copy it into the cache directory.
pub fn copy_local_distribution(path: &Path, sha256: &str, cache_dir: &Path) -> Result<PathBuf> {
    let expected_hash = hex::decode(sha256)?;
    let basename = path
        .file_name()
        .ok_or_else(|| anyhow!("unable to resolve filename of {}", path.display()))?;
    let cache_path = cache_dir.join(basename);

    if cache_path.exists() && sha256_path(&cache_path)? == expected_hash {
        warn!(
            "existing {} passes SHA-256 integrity check",
            cache_path.display()
        );
        return Ok(cache_path);
    }

    if sha256_path(path)? != expected_hash {
        return Err(anyhow!(
            "sha256 of Python distribution {} does not validate",
            path.display()
        ));
    }

    warn!("copying {}", path.display());
    fs::copy(path, &cache_path)
        .with_context(|| format!("copying {} to {}", path.display(), cache_path.display()))?;

    Ok(cache_path)
}

/// Obtain a local path for a Python distribution.
///
/// Archives are fetched or copied into `cache_dir` after SHA-256 validation.
/// A local directory is an already extracted distribution and is used in
/// place without validation.
pub fn resolve_python_distribution_archive(
    dist: &PythonDistributionLocation,
    cache_dir: &Path,
) -> Result<PathBuf> {
    create_dir_all(cache_dir)
        .with_context(|| format!("creating {}", cache_dir.display()))?;

    match dist {
        PythonDistributionLocation::Local { local_path, sha256 } => {
            let p = PathBuf::from(local_path);

            if p.is_dir() {
                Ok(p)
            } else {
                copy_local_distribution(&p, sha256, cache_dir)
            }
        }
        PythonDistributionLocation::Url { url, sha256 } => {
            download_distribution(url, sha256, cache_dir)
        }
    }
}
