// Copyright (C) 2025 Erwan Le Blond <erwanleblond@gmail.com>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at
// <https://mozilla.org/MPL/2.0/>.
//
// SPDX-License-Identifier: MPL-2.0

/**
 * SECTION:element-lvcompositor
 *
 * Combines a main H.264, H.265, H.266 or EVC byte-stream with a secondary enhancement stream
 * (e.g. LCEVC). Each enhancement buffer is wrapped into a `user_data_unregistered` SEI NAL unit
 * for the codec of the main stream and output with the timestamps of the corresponding main
 * buffer.
 *
 * If no enhancement buffer is available, the main buffer is output unchanged. Enhancement
 * buffers are output unchanged as long as the main stream has not produced any data yet.
 *
 * Output caps are the caps of the main stream, with `width`, `height` and `framerate` fixated
 * according to the element properties.
 *
 * ## Example launch line
 * ```
 * gst-launch-1.0 lvcompositor name=c ! filesink location=out.h265 \
 *   filesrc location=main.h265 ! h265parse ! c.sink_main \
 *   filesrc location=enhancement.evc ! c.sink_secondary
 * ```
 */
use gst::glib;
use gst::prelude::*;

mod imp;
mod merge;

pub(crate) use imp::CAT;

glib::wrapper! {
    pub struct LvCompositor(ObjectSubclass<imp::LvCompositor>) @extends gst_base::Aggregator, gst::Element, gst::Object;
}

pub fn register(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    gst::Element::register(
        Some(plugin),
        "lvcompositor",
        gst::Rank::NONE,
        LvCompositor::static_type(),
    )
}
