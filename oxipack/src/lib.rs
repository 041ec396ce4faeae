// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Functionality for packaging Python applications into Rust executables.

oxipack evaluates an `oxipack.bzl` Starlark file describing a Python
distribution, the Python resources to package and the settings of the
embedded interpreter. From it, artifacts consumed by a Rust crate's build
script are derived and the built executable is assembled into an
application directory.
*/

pub mod app_packaging;
pub mod cli;
pub mod environment;
pub mod logging;
pub mod project_layout;
pub mod projectmgmt;
pub mod py_packaging;
pub mod python_distributions;
pub mod starlark;

#[cfg(test)]
mod testutil;
