// Copyright (C) 2025 Erwan Le Blond <erwanleblond@gmail.com>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at
// <https://mozilla.org/MPL/2.0/>.
//
// SPDX-License-Identifier: MPL-2.0
#![allow(unused_doc_comments)]

/**
 * plugin-lvcompositor:
 *
 * Injects enhancement layer payloads into video elementary streams as SEI NAL units.
 */
use gst::glib;

pub mod identifier;
mod lvcompositor;
pub mod sei;

fn plugin_init(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    lvcompositor::register(plugin)
}

gst::plugin_define!(
    lvcompositor,
    env!("CARGO_PKG_DESCRIPTION"),
    plugin_init,
    concat!(env!("CARGO_PKG_VERSION"), "-", env!("COMMIT_ID")),
    "MPL",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_REPOSITORY"),
    env!("BUILD_REL_DATE")
);
