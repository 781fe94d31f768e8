// Copyright (C) 2025 Erwan Le Blond <erwanleblond@gmail.com>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at
// <https://mozilla.org/MPL/2.0/>.
//
// SPDX-License-Identifier: MPL-2.0

//! Per-cycle merge and fallback policy between the main stream and the enhancement stream.
//!
//! Each cycle takes at most one buffer from each input and outputs at most one buffer:
//!
//! | main | secondary | output                                                        |
//! |------|-----------|---------------------------------------------------------------|
//! | yes  | yes       | secondary payload as SEI with the main timing, or main as-is   |
//! | yes  | no        | main as-is                                                    |
//! | no   | yes       | secondary as-is, unless a main buffer was ever seen           |
//! | no   | no        | nothing                                                       |

use std::fmt;

use crate::sei::{self, Codec, SeiError};

use super::imp::CAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Primary,
    Secondary,
}

impl Port {
    pub fn pad_name(self) -> &'static str {
        match self {
            Port::Primary => "sink_main",
            Port::Secondary => "sink_secondary",
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.pad_name())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("Input {0} is not available")]
    MissingPort(Port),

    #[error("Downstream flow error: {0}")]
    Flow(#[from] gst::FlowError),
}

/// Why the secondary payload could not be merged into the main stream.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("Failed to map buffer from {}", Port::Secondary)]
    UnmappableSecondary,

    #[error(transparent)]
    Sei(#[from] SeiError),
}

pub trait FrameSource {
    /// Takes the next buffer of `port`, if any is queued.
    fn pull(&mut self, port: Port, timeout: bool) -> Result<Option<gst::Buffer>, CycleError>;
}

pub trait FrameSink {
    fn emit(&mut self, frame: gst::Buffer) -> Result<gst::FlowSuccess, gst::FlowError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Secondary payload was output as SEI with the main timing.
    Merged,
    /// Merging failed and the main buffer was output instead.
    Degraded(MergeError),
    Primary,
    Secondary,
    /// Secondary buffer without main buffer after the main stream had data.
    DroppedSecondary,
    Nothing,
}

impl CycleOutcome {
    pub fn emitted(&self) -> bool {
        matches!(
            self,
            CycleOutcome::Merged
                | CycleOutcome::Degraded(_)
                | CycleOutcome::Primary
                | CycleOutcome::Secondary
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub current_codec: Codec,
    pub negotiated: bool,
    pub primary_seen_data: bool,
}

impl SessionState {
    /// Latches the main stream codec. Only the first call has an effect.
    pub fn latch_codec(&mut self, codec: Codec) -> bool {
        if self.negotiated {
            return false;
        }

        self.current_codec = codec;
        self.negotiated = true;
        true
    }
}

/// Wraps `unit` into an output buffer with the timing and metadata of `primary`.
pub fn combine(primary: &gst::BufferRef, mut unit: gst::Buffer) -> gst::Buffer {
    {
        let unit = unit.make_mut();
        unit.set_pts(primary.pts());
        unit.set_dts(primary.dts());
        unit.set_duration(primary.duration());
        unit.set_offset(primary.offset());
        unit.set_offset_end(primary.offset_end());

        if let Err(err) = primary.copy_into(
            unit,
            gst::BufferCopyFlags::FLAGS | gst::BufferCopyFlags::META,
            ..,
        ) {
            gst::debug!(CAT, "Failed to copy buffer metadata: {err}");
        }
    }

    unit
}

#[derive(Debug, Default)]
pub struct FrameAggregator {
    state: SessionState,
}

impl FrameAggregator {
    pub fn session(&self) -> &SessionState {
        &self.state
    }

    pub fn latch_codec(&mut self, codec: Codec) -> bool {
        self.state.latch_codec(codec)
    }

    pub fn reset(&mut self) {
        self.state = SessionState::default();
    }

    fn merge(
        &self,
        primary: &gst::Buffer,
        secondary: &gst::Buffer,
    ) -> Result<gst::Buffer, MergeError> {
        let codec = self.state.current_codec;
        let map = secondary
            .map_readable()
            .map_err(|_| MergeError::UnmappableSecondary)?;

        let unit = sei::encode(map.as_slice(), codec)?;
        gst::trace!(
            CAT,
            "Created {codec} user_data_unregistered SEI with {} bytes of data, {} bytes total",
            map.len(),
            unit.size()
        );

        Ok(combine(primary, unit))
    }

    /// Runs one cycle. At most one buffer is handed to `sink`.
    pub fn aggregate(
        &mut self,
        source: &mut impl FrameSource,
        sink: &mut impl FrameSink,
        timeout: bool,
    ) -> Result<CycleOutcome, CycleError> {
        let primary = source.pull(Port::Primary, timeout)?;
        let secondary = source.pull(Port::Secondary, timeout)?;
        let codec = self.state.current_codec;

        gst::trace!(
            CAT,
            "Aggregating, codec {codec}, timeout {timeout}, main {}, secondary {}",
            primary.is_some(),
            secondary.is_some()
        );

        let (outcome, output) = match (primary, secondary) {
            (Some(primary), Some(secondary)) => {
                self.state.primary_seen_data = true;

                match self.merge(&primary, &secondary) {
                    Ok(merged) => {
                        gst::debug!(CAT, "SEI data merged for {codec}");
                        (CycleOutcome::Merged, Some(merged))
                    }
                    Err(err) => {
                        gst::warning!(
                            CAT,
                            "SEI merge failed for {codec}, using main stream only: {err}"
                        );
                        (CycleOutcome::Degraded(err), Some(primary))
                    }
                }
            }
            (Some(primary), None) => {
                gst::debug!(CAT, "Using main stream only (no enhancement data)");
                self.state.primary_seen_data = true;
                (CycleOutcome::Primary, Some(primary))
            }
            (None, Some(secondary)) if !self.state.primary_seen_data => {
                gst::debug!(CAT, "Using secondary stream as fallback");
                (CycleOutcome::Secondary, Some(secondary))
            }
            (None, Some(_)) => {
                gst::debug!(CAT, "Dropping secondary buffer without main buffer");
                (CycleOutcome::DroppedSecondary, None)
            }
            (None, None) => {
                gst::trace!(CAT, "No data available from either stream");
                (CycleOutcome::Nothing, None)
            }
        };

        if let Some(output) = output {
            sink.emit(output)?;
        }

        Ok(outcome)
    }
}
