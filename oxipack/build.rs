// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

fn main() {
    // The host and target triples are only available to build scripts. Re-export
    // them so the library can default to building for the machine it runs on.
    for key in ["HOST", "TARGET"] {
        let value = std::env::var(key).unwrap_or_else(|_| panic!("{} not set", key));
        println!("cargo:rustc-env={}={}", key, value);
    }

    println!("cargo:rerun-if-changed=build.rs");
}
