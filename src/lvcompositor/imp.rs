// Copyright (C) 2025 Erwan Le Blond <erwanleblond@gmail.com>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at
// <https://mozilla.org/MPL/2.0/>.
//
// SPDX-License-Identifier: MPL-2.0

use std::sync::{LazyLock, Mutex};

use gst::glib;
use gst::prelude::*;
use gst::subclass::prelude::*;
use gst_base::prelude::*;
use gst_base::subclass::prelude::*;

use super::merge::{CycleError, CycleOutcome, FrameAggregator, FrameSink, FrameSource, Port};
use crate::sei::Codec;

pub(crate) static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "lvcompositor",
        gst::DebugColorFlags::empty(),
        Some("LV Compositor Element"),
    )
});

const DEFAULT_WIDTH: i32 = 1920;
const DEFAULT_HEIGHT: i32 = 1080;
const DEFAULT_FPS_N: i32 = 25;
const DEFAULT_FPS_D: i32 = 1;

#[derive(Debug, Clone, Copy)]
struct Settings {
    width: i32,
    height: i32,
    fps_n: i32,
    fps_d: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps_n: DEFAULT_FPS_N,
            fps_d: DEFAULT_FPS_D,
        }
    }
}

#[derive(Default)]
pub struct LvCompositor {
    settings: Mutex<Settings>,
    state: Mutex<FrameAggregator>,
}

/// Main and secondary sink pads, resolved for a single cycle.
struct PadSource {
    main: gst_base::AggregatorPad,
    secondary: gst_base::AggregatorPad,
}

impl PadSource {
    fn resolve(element: &super::LvCompositor) -> Result<Self, CycleError> {
        let pad = |port: Port| {
            element
                .static_pad(port.pad_name())
                .and_then(|pad| pad.downcast::<gst_base::AggregatorPad>().ok())
                .ok_or(CycleError::MissingPort(port))
        };

        Ok(PadSource {
            main: pad(Port::Primary)?,
            secondary: pad(Port::Secondary)?,
        })
    }

    fn pad(&self, port: Port) -> &gst_base::AggregatorPad {
        match port {
            Port::Primary => &self.main,
            Port::Secondary => &self.secondary,
        }
    }

    fn all_eos(&self) -> bool {
        self.main.is_eos() && self.secondary.is_eos()
    }
}

impl FrameSource for PadSource {
    fn pull(&mut self, port: Port, timeout: bool) -> Result<Option<gst::Buffer>, CycleError> {
        let pad = self.pad(port);
        let buffer = pad.pop_buffer();

        if buffer.is_none() && timeout {
            gst::trace!(CAT, obj = pad, "No buffer on timeout");
        }

        Ok(buffer)
    }
}

/// Keeps the output of a cycle until the state lock is released.
#[derive(Default)]
struct PendingOutput(Option<gst::Buffer>);

impl FrameSink for PendingOutput {
    fn emit(&mut self, frame: gst::Buffer) -> Result<gst::FlowSuccess, gst::FlowError> {
        debug_assert!(self.0.is_none());
        self.0 = Some(frame);
        Ok(gst::FlowSuccess::Ok)
    }
}

fn byte_stream_caps<'a>(codecs: impl IntoIterator<Item = &'a Codec>) -> gst::Caps {
    codecs
        .into_iter()
        .filter_map(|codec| codec.media_type())
        .map(|media_type| {
            gst::Structure::builder(media_type)
                .field("stream-format", "byte-stream")
                .field("alignment", gst::List::new(["au", "nal"]))
                .build()
        })
        .collect()
}

impl AggregatorImpl for LvCompositor {
    fn aggregate(&self, timeout: bool) -> Result<gst::FlowSuccess, gst::FlowError> {
        let mut source = match PadSource::resolve(&self.obj()) {
            Ok(source) => source,
            Err(err) => {
                gst::error!(CAT, imp = self, "{err}");
                return Err(gst::FlowError::NotNegotiated);
            }
        };
        let mut output = PendingOutput::default();

        let mut state = self.state.lock().unwrap();
        gst::trace!(
            CAT,
            imp = self,
            "Start aggregating buffers, codec {}",
            state.session().current_codec
        );
        let res = state.aggregate(&mut source, &mut output, timeout);
        drop(state);

        let outcome = match res {
            Ok(outcome) => outcome,
            Err(err @ CycleError::MissingPort(_)) => {
                gst::error!(CAT, imp = self, "{err}");
                return Err(gst::FlowError::NotNegotiated);
            }
            Err(CycleError::Flow(err)) => return Err(err),
        };

        gst::trace!(CAT, imp = self, "Cycle outcome {outcome:?}");

        if let Some(buffer) = output.0 {
            debug_assert!(outcome.emitted());
            gst::log!(CAT, imp = self, "Finishing buffer {buffer:?}");
            return self.finish_buffer(buffer);
        }

        match outcome {
            CycleOutcome::Nothing if source.all_eos() => {
                gst::debug!(CAT, imp = self, "All pads EOS");
                Err(gst::FlowError::Eos)
            }
            CycleOutcome::Nothing => Err(gst_base::AGGREGATOR_FLOW_NEED_DATA),
            _ => Ok(gst::FlowSuccess::Ok),
        }
    }

    fn sink_event(&self, aggregator_pad: &gst_base::AggregatorPad, event: gst::Event) -> bool {
        use gst::EventView;

        match event.view() {
            EventView::Caps(e) if aggregator_pad.name().as_str() == Port::Primary.pad_name() => {
                let caps = e.caps_owned();
                let codec = Codec::from_caps(&caps);

                let mut state = self.state.lock().unwrap();
                if state.latch_codec(codec) {
                    gst::info!(CAT, imp = self, "Main stream codec {codec} from caps {caps}");
                    if codec == Codec::Unknown {
                        gst::warning!(CAT, imp = self, "Unsupported main stream caps {caps}");
                    }
                } else {
                    gst::debug!(
                        CAT,
                        imp = self,
                        "Keeping codec {}, ignoring caps {caps}",
                        state.session().current_codec
                    );
                }
                drop(state);

                let src_caps = self.fixate_src_caps(caps);
                gst::debug!(CAT, imp = self, "Setting source caps {src_caps} from main pad");
                self.obj().set_src_caps(&src_caps);

                self.parent_sink_event(aggregator_pad, event)
            }
            _ => self.parent_sink_event(aggregator_pad, event),
        }
    }

    fn fixate_src_caps(&self, mut caps: gst::Caps) -> gst::Caps {
        let settings = *self.settings.lock().unwrap();

        {
            let caps = caps.make_mut();
            if let Some(s) = caps.structure_mut(0) {
                s.fixate_field_nearest_int("width", settings.width);
                s.fixate_field_nearest_int("height", settings.height);

                if s.has_field("framerate") {
                    s.set(
                        "framerate",
                        gst::Fraction::new(settings.fps_n, settings.fps_d),
                    );
                }
            }
        }

        if !caps.is_any() && !caps.is_empty() {
            caps.fixate();
        }

        caps
    }

    fn negotiate(&self) -> bool {
        // Output caps follow the main pad caps
        true
    }

    fn start(&self) -> Result<(), gst::ErrorMessage> {
        gst::debug!(CAT, imp = self, "Starting");
        self.state.lock().unwrap().reset();

        Ok(())
    }

    fn stop(&self) -> Result<(), gst::ErrorMessage> {
        gst::debug!(CAT, imp = self, "Stopping");
        self.state.lock().unwrap().reset();

        Ok(())
    }
}

impl ElementImpl for LvCompositor {
    fn metadata() -> Option<&'static gst::subclass::ElementMetadata> {
        static ELEMENT_METADATA: LazyLock<gst::subclass::ElementMetadata> = LazyLock::new(|| {
            gst::subclass::ElementMetadata::new(
                "LV Compositor",
                "Filter/Compositor/Video",
                "Carries an enhancement stream as user data unregistered SEI of the main stream",
                "Erwan Le Blond <erwanleblond@gmail.com>",
            )
        });

        Some(&*ELEMENT_METADATA)
    }

    fn pad_templates() -> &'static [gst::PadTemplate] {
        static PAD_TEMPLATES: LazyLock<Vec<gst::PadTemplate>> = LazyLock::new(|| {
            let main_caps = byte_stream_caps(&Codec::SUPPORTED);
            let secondary_caps = byte_stream_caps(&[Codec::Evc]);

            let main_pad_template = gst::PadTemplate::with_gtype(
                Port::Primary.pad_name(),
                gst::PadDirection::Sink,
                gst::PadPresence::Request,
                &main_caps,
                gst_base::AggregatorPad::static_type(),
            )
            .unwrap();

            let secondary_pad_template = gst::PadTemplate::with_gtype(
                Port::Secondary.pad_name(),
                gst::PadDirection::Sink,
                gst::PadPresence::Request,
                &secondary_caps,
                gst_base::AggregatorPad::static_type(),
            )
            .unwrap();

            let src_pad_template = gst::PadTemplate::builder(
                "src",
                gst::PadDirection::Src,
                gst::PadPresence::Always,
                &main_caps,
            )
            .gtype(gst_base::AggregatorPad::static_type())
            .build()
            .unwrap();

            vec![main_pad_template, secondary_pad_template, src_pad_template]
        });

        PAD_TEMPLATES.as_ref()
    }

    fn request_new_pad(
        &self,
        templ: &gst::PadTemplate,
        name: Option<&str>,
        caps: Option<&gst::Caps>,
    ) -> Option<gst::Pad> {
        let templ_name = templ.name_template();

        if let Some(name) = name {
            if name != templ_name {
                gst::error!(
                    CAT,
                    imp = self,
                    "Invalid pad name {name} for template {templ_name}"
                );
                return None;
            }
        }

        if self.obj().static_pad(templ_name).is_some() {
            gst::error!(CAT, imp = self, "Pad {templ_name} already requested");
            return None;
        }

        self.parent_request_new_pad(templ, Some(templ_name), caps)
    }
}

impl GstObjectImpl for LvCompositor {}

impl ObjectImpl for LvCompositor {
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: LazyLock<Vec<glib::ParamSpec>> = LazyLock::new(|| {
            vec![
                glib::ParamSpecInt::builder("width")
                    .nick("Width")
                    .blurb("Output video width")
                    .minimum(1)
                    .default_value(DEFAULT_WIDTH)
                    .build(),
                glib::ParamSpecInt::builder("height")
                    .nick("Height")
                    .blurb("Output video height")
                    .minimum(1)
                    .default_value(DEFAULT_HEIGHT)
                    .build(),
                glib::ParamSpecInt::builder("fps-n")
                    .nick("FPS numerator")
                    .blurb("Frame rate numerator")
                    .minimum(1)
                    .default_value(DEFAULT_FPS_N)
                    .build(),
                glib::ParamSpecInt::builder("fps-d")
                    .nick("FPS denominator")
                    .blurb("Frame rate denominator")
                    .minimum(1)
                    .default_value(DEFAULT_FPS_D)
                    .build(),
            ]
        });

        PROPERTIES.as_ref()
    }

    fn set_property(&self, _id: usize, value: &glib::Value, pspec: &glib::ParamSpec) {
        let mut settings = self.settings.lock().unwrap();
        let new_value = value.get::<i32>().expect("type checked upstream");

        let field = match pspec.name() {
            "width" => &mut settings.width,
            "height" => &mut settings.height,
            "fps-n" => &mut settings.fps_n,
            "fps-d" => &mut settings.fps_d,
            _ => unimplemented!(),
        };

        gst::info!(
            CAT,
            imp = self,
            "Changing {} from {} to {}",
            pspec.name(),
            field,
            new_value
        );
        *field = new_value;
    }

    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        let settings = self.settings.lock().unwrap();

        match pspec.name() {
            "width" => settings.width.to_value(),
            "height" => settings.height.to_value(),
            "fps-n" => settings.fps_n.to_value(),
            "fps-d" => settings.fps_d.to_value(),
            _ => unimplemented!(),
        }
    }
}

#[glib::object_subclass]
impl ObjectSubclass for LvCompositor {
    const NAME: &'static str = "GstLvCompositor";
    type Type = super::LvCompositor;
    type ParentType = gst_base::Aggregator;
}
