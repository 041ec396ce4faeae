// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod bytecode;
pub mod config;
pub mod distribution;
pub mod embedded_resource;
pub mod fsscan;
pub mod pip;
pub mod pyembed;
pub mod resource;
