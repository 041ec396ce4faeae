// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod config;
pub mod glob;
pub mod packaging_rule;
pub mod repackage;
pub mod state;
pub mod tarball;
