// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Defines known Python distributions.

use {
    crate::py_packaging::distribution::PythonDistributionLocation,
    once_cell::sync::Lazy,
    std::collections::BTreeMap,
};

const RELEASE_URL: &str =
    "https://github.com/indygreg/python-build-standalone/releases/download/20200408";

fn hosted(filename: &str, sha256: &str) -> PythonDistributionLocation {
    PythonDistributionLocation::Url {
        url: format!("{}/{}", RELEASE_URL, filename),
        sha256: sha256.to_string(),
    }
}

/// Standalone CPython distributions keyed by Rust target triple.
pub static CPYTHON_BY_TRIPLE: Lazy<BTreeMap<&'static str, PythonDistributionLocation>> =
    Lazy::new(|| {
        let mut res = BTreeMap::new();

        res.insert(
            "x86_64-unknown-linux-gnu",
            hosted(
                "cpython-3.7.7-linux64-20200409T0045.tar.zst",
                "74799ae3b7f3ddc2d118516d65d46356fb3ef3ff3c4c4591a0dde073c413aff0",
            ),
        );

        res.insert(
            "x86_64-unknown-linux-musl",
            hosted(
                "cpython-3.7.7-linux64-musl-20200409T0047.tar.zst",
                "c1ffa330c7305f46886b7cd2b77edf0e43463113cef426d388476337c3e5cfa9",
            ),
        );

        res.insert(
            "i686-pc-windows-msvc",
            hosted(
                "cpython-3.7.7-windows-x86-static-20200409T0107.tar.zst",
                "978e863fd39f8758c2af18dd750f64eb4b57bd8bfea86cae5fcdde305c56dca7",
            ),
        );

        res.insert(
            "x86_64-pc-windows-msvc",
            hosted(
                "cpython-3.7.7-windows-amd64-static-20200409T0105.tar.zst",
                "fe8d95bc2d7d911ba23c318b786ea7d17c3e2aadbedf47b1d53962bf42e418fe",
            ),
        );

        res.insert(
            "x86_64-apple-darwin",
            hosted(
                "cpython-3.7.7-macos-20200409T0412.tar.zst",
                "f312bea46a7d8efecd4df6b22c03f83016775e6bb5944a5701d697e0a52c63b2",
            ),
        );

        res
    });

/// Obtain the default distribution for a target triple.
pub fn default_distribution_location(target_triple: &str) -> Option<PythonDistributionLocation> {
    CPYTHON_BY_TRIPLE.get(target_triple).cloned()
}
