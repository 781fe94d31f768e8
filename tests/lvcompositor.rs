// Copyright (C) 2025 Erwan Le Blond <erwanleblond@gmail.com>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at
// <https://mozilla.org/MPL/2.0/>.
//
// SPDX-License-Identifier: MPL-2.0

use gst::prelude::*;
use gst_check::Harness;
use pretty_assertions::assert_eq;

use gstlvcompositor::sei::{self, Codec};

const H265_CAPS: &str = "video/x-h265,stream-format=byte-stream,alignment=au";
const EVC_CAPS: &str = "video/x-evc,stream-format=byte-stream,alignment=au";

fn init() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        gst::init().unwrap();
        gstlvcompositor::plugin_register_static().unwrap();
    });
}

fn make_buffer(data: &[u8], pts_ms: u64) -> gst::Buffer {
    let mut buf = gst::Buffer::from_slice(data.to_vec());
    {
        let buf = buf.get_mut().unwrap();
        buf.set_pts(gst::ClockTime::from_mseconds(pts_ms));
        buf.set_dts(gst::ClockTime::from_mseconds(pts_ms));
        buf.set_duration(gst::ClockTime::from_mseconds(40));
    }
    buf
}

struct Harnesses {
    src: Harness,
    main: Harness,
    secondary: Harness,
}

fn make_harnesses(main_caps: &str) -> Harnesses {
    init();

    let src = Harness::with_padnames("lvcompositor", None, Some("src"));
    let element = src.element().unwrap();
    let mut main = Harness::with_element(&element, Some("sink_main"), None);
    let mut secondary = Harness::with_element(&element, Some("sink_secondary"), None);
    main.set_src_caps_str(main_caps);
    secondary.set_src_caps_str(EVC_CAPS);

    Harnesses {
        src,
        main,
        secondary,
    }
}

fn wait_for_event(h: &mut Harness, type_: gst::EventType) -> gst::Event {
    loop {
        let event = h.pull_event().unwrap();
        if event.type_() == type_ {
            return event;
        }
    }
}

#[test]
fn test_merge_h265() {
    let mut h = make_harnesses(H265_CAPS);

    let main_buf = make_buffer(&[0x00, 0x00, 0x00, 0x01, 0x26, 0x01, 0xaf, 0x12], 40);
    h.main.push(main_buf).unwrap();
    h.secondary
        .push(make_buffer(b"enhancement data", 40))
        .unwrap();

    let out = h.src.pull().unwrap();
    assert_eq!(out.pts(), Some(gst::ClockTime::from_mseconds(40)));
    assert_eq!(out.dts(), Some(gst::ClockTime::from_mseconds(40)));
    assert_eq!(out.duration(), Some(gst::ClockTime::from_mseconds(40)));

    let map = out.map_readable().unwrap();
    assert_eq!(&map[..8], &[0x00, 0x00, 0x00, 0x01, 0x4e, 0x01, 0x05, 32]);
    assert_eq!(map.len(), sei::unit_len(Codec::H265, 16).unwrap());

    let unit = sei::parse(&map, Codec::H265).unwrap();
    assert_eq!(unit.payload, b"enhancement data");
    assert_eq!(unit.identifier[12], b'4');
}

#[test]
fn test_merge_h264_sequence() {
    let mut h = make_harnesses("video/x-h264,stream-format=byte-stream,alignment=au");

    for i in 0..3u64 {
        h.main
            .push(make_buffer(&[0x00, 0x00, 0x00, 0x01, 0x65], i * 40))
            .unwrap();
        h.secondary
            .push(make_buffer(&[i as u8; 300], i * 40))
            .unwrap();

        let out = h.src.pull().unwrap();
        assert_eq!(out.pts(), Some(gst::ClockTime::from_mseconds(i * 40)));

        let map = out.map_readable().unwrap();
        assert_eq!(&map[4..6], &[0x06, 0x05]);
        assert_eq!(&map[6..8], &[0xff, (316 - 255) as u8]);
        let unit = sei::parse(&map, Codec::H264).unwrap();
        assert_eq!(unit.payload, &[i as u8; 300][..]);
    }
}

#[test]
fn test_main_only_after_secondary_eos() {
    let mut h = make_harnesses(H265_CAPS);

    h.secondary.push_event(gst::event::Eos::new());

    let data = [0x00, 0x00, 0x00, 0x01, 0x02, 0x01, 0xd0];
    h.main.push(make_buffer(&data, 0)).unwrap();

    let out = h.src.pull().unwrap();
    assert_eq!(out.pts(), Some(gst::ClockTime::ZERO));
    assert_eq!(out.duration(), Some(gst::ClockTime::from_mseconds(40)));
    assert_eq!(&*out.map_readable().unwrap(), &data[..]);

    h.main.push_event(gst::event::Eos::new());
    wait_for_event(&mut h.src, gst::EventType::Eos);
}

#[test]
fn test_secondary_fallback_after_main_eos() {
    let mut h = make_harnesses(H265_CAPS);

    h.main.push_event(gst::event::Eos::new());
    h.secondary.push(make_buffer(b"lcevc only", 80)).unwrap();

    let out = h.src.pull().unwrap();
    assert_eq!(out.pts(), Some(gst::ClockTime::from_mseconds(80)));
    assert_eq!(&*out.map_readable().unwrap(), b"lcevc only");

    h.secondary.push_event(gst::event::Eos::new());
    wait_for_event(&mut h.src, gst::EventType::Eos);
    assert!(h.src.try_pull().is_none());
}

#[test]
fn test_eos_without_data() {
    let mut h = make_harnesses(H265_CAPS);

    h.main.push_event(gst::event::Eos::new());
    h.secondary.push_event(gst::event::Eos::new());

    wait_for_event(&mut h.src, gst::EventType::Eos);
    assert!(h.src.try_pull().is_none());
}

#[test]
fn test_output_caps_fixation() {
    let mut h = make_harnesses(
        "video/x-h265,stream-format=byte-stream,alignment=au,width=1280,height=720,framerate=60/1",
    );
    let element = h.src.element().unwrap();
    element.set_property("fps-n", 30i32);
    element.set_property("fps-d", 1i32);

    h.main
        .push(make_buffer(&[0x00, 0x00, 0x00, 0x01, 0x26, 0x01], 0))
        .unwrap();
    h.secondary.push(make_buffer(b"x", 0)).unwrap();
    let _ = h.src.pull().unwrap();

    let event = wait_for_event(&mut h.src, gst::EventType::Caps);
    let gst::EventView::Caps(caps) = event.view() else {
        unreachable!();
    };
    let s = caps.caps().structure(0).unwrap();
    assert_eq!(s.name(), "video/x-h265");
    assert_eq!(s.get::<i32>("width").unwrap(), 1280);
    assert_eq!(s.get::<i32>("height").unwrap(), 720);
    assert_eq!(
        s.get::<gst::Fraction>("framerate").unwrap(),
        gst::Fraction::new(30, 1)
    );

    // The main pad keeps the upstream caps, not the fixated output caps
    let main_caps = element.static_pad("sink_main").unwrap().current_caps().unwrap();
    let s = main_caps.structure(0).unwrap();
    assert_eq!(
        s.get::<gst::Fraction>("framerate").unwrap(),
        gst::Fraction::new(60, 1)
    );
}

#[test]
fn test_properties() {
    init();

    let element = gst::ElementFactory::make("lvcompositor").build().unwrap();
    assert_eq!(element.property::<i32>("width"), 1920);
    assert_eq!(element.property::<i32>("height"), 1080);
    assert_eq!(element.property::<i32>("fps-n"), 25);
    assert_eq!(element.property::<i32>("fps-d"), 1);

    element.set_property("width", 3840i32);
    element.set_property("height", 2160i32);
    assert_eq!(element.property::<i32>("width"), 3840);
    assert_eq!(element.property::<i32>("height"), 2160);
}

#[test]
fn test_request_pads() {
    init();

    let element = gst::ElementFactory::make("lvcompositor").build().unwrap();
    assert!(element.static_pad("src").is_some());
    assert!(element.static_pad("sink_main").is_none());

    let main = element.request_pad_simple("sink_main").unwrap();
    assert_eq!(main.name(), "sink_main");
    let templ = element.pad_template("sink_main").unwrap();
    assert!(element.request_pad(&templ, None, None).is_none());

    let secondary = element.request_pad_simple("sink_secondary").unwrap();
    assert_eq!(secondary.name(), "sink_secondary");

    assert!(element.request_pad_simple("sink_0").is_none());
    assert!(element.request_pad_simple("sink_other").is_none());
}

#[test]
fn test_secondary_rejects_non_evc_caps() {
    init();

    let element = gst::ElementFactory::make("lvcompositor").build().unwrap();
    let secondary = element.request_pad_simple("sink_secondary").unwrap();

    assert!(secondary.query_accept_caps(&EVC_CAPS.parse::<gst::Caps>().unwrap()));
    assert!(!secondary.query_accept_caps(&H265_CAPS.parse::<gst::Caps>().unwrap()));
}
