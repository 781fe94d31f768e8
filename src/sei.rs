// Copyright (C) 2025 Erwan Le Blond <erwanleblond@gmail.com>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at
// <https://mozilla.org/MPL/2.0/>.
//
// SPDX-License-Identifier: MPL-2.0

//! Writer and reader for Annex B `user_data_unregistered` SEI NAL units.
//!
//! The unit layout is the same for all supported codecs except for the NAL unit header:
//!
//! ```text
//! start code | NAL header | payload type (5) | payload size | identifier (16) | payload | 0x80
//! ```
//!
//! The payload size covers the identifier and the payload and is coded as a sequence of `0xff`
//! bytes, each adding 255, terminated by a byte smaller than 255.

use std::collections::TryReserveError;
use std::fmt;

use crate::identifier;

pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
pub const USER_DATA_UNREGISTERED: u8 = 5;
pub const IDENTIFIER_LEN: usize = 16;

const RBSP_TRAILING_BITS: u8 = 0x80;
const SIZE_CONTINUATION: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    H264,
    H265,
    H266,
    Evc,
    #[default]
    Unknown,
}

impl Codec {
    pub const SUPPORTED: [Codec; 4] = [Codec::H264, Codec::H265, Codec::H266, Codec::Evc];

    pub fn from_media_type(media_type: &str) -> Self {
        Self::SUPPORTED
            .into_iter()
            .find(|codec| codec.media_type() == Some(media_type))
            .unwrap_or(Codec::Unknown)
    }

    /// Detects the codec from the name of the first structure of `caps`.
    pub fn from_caps(caps: &gst::CapsRef) -> Self {
        caps.structure(0)
            .map_or(Codec::Unknown, |s| Self::from_media_type(s.name().as_str()))
    }

    pub fn media_type(self) -> Option<&'static str> {
        match self {
            Codec::H264 => Some("video/x-h264"),
            Codec::H265 => Some("video/x-h265"),
            Codec::H266 => Some("video/x-h266"),
            Codec::Evc => Some("video/x-evc"),
            Codec::Unknown => None,
        }
    }

    /// NAL unit header of a prefix SEI NAL unit.
    pub fn nal_header(self) -> Option<&'static [u8]> {
        match self {
            // forbidden_zero_bit 0, nal_ref_idc 0, nal_unit_type 6
            Codec::H264 => Some(&[0x06]),
            // nal_unit_type 39, nuh_layer_id 0, nuh_temporal_id_plus1 1
            Codec::H265 => Some(&[0x4e, 0x01]),
            // nal_unit_type 21 in the VVC numbering
            Codec::H266 => Some(&[0x55, 0x01]),
            // Placeholder, reuses the HEVC header
            Codec::Evc => Some(&[0x4e, 0x01]),
            Codec::Unknown => None,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Codec::H264 => "H264",
            Codec::H265 => "H265",
            Codec::H266 => "H266",
            Codec::Evc => "EVC",
            Codec::Unknown => "UNKNOWN",
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SeiError {
    #[error("Unsupported codec {0} for SEI creation")]
    UnsupportedCodec(Codec),

    #[error("Failed to allocate SEI buffer: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("Truncated SEI NAL unit")]
    Truncated,

    #[error("Missing Annex B start code")]
    InvalidStartCode,

    #[error("NAL unit header does not match codec {0}")]
    InvalidNalHeader(Codec),

    #[error("Unexpected SEI payload type {0}")]
    UnexpectedPayloadType(u8),

    #[error("Declared SEI payload size {declared} but {available} bytes available")]
    SizeMismatch { declared: usize, available: usize },

    #[error("Missing RBSP trailing bits")]
    MissingTrailingBits,
}

/// Number of bytes needed to code `size` in the SEI payload size field.
pub fn size_field_len(size: usize) -> usize {
    size / 255 + 1
}

/// Total length of a unit carrying `payload_len` bytes of user data.
pub fn unit_len(codec: Codec, payload_len: usize) -> Option<usize> {
    let header = codec.nal_header()?;
    let payload_size = IDENTIFIER_LEN + payload_len;

    Some(START_CODE.len() + header.len() + 1 + size_field_len(payload_size) + payload_size + 1)
}

fn write_size_field(data: &mut Vec<u8>, size: usize) {
    let mut remaining = size;
    while remaining >= 255 {
        data.push(SIZE_CONTINUATION);
        remaining -= 255;
    }
    data.push(remaining as u8);
}

/// Writes a complete SEI NAL unit with the given identifier.
pub fn write(
    payload: &[u8],
    codec: Codec,
    identifier: &[u8; IDENTIFIER_LEN],
) -> Result<Vec<u8>, SeiError> {
    let header = codec
        .nal_header()
        .ok_or(SeiError::UnsupportedCodec(codec))?;
    let len = unit_len(codec, payload.len()).ok_or(SeiError::UnsupportedCodec(codec))?;

    let mut data = Vec::new();
    data.try_reserve_exact(len)?;

    data.extend_from_slice(&START_CODE);
    data.extend_from_slice(header);
    data.push(USER_DATA_UNREGISTERED);
    write_size_field(&mut data, IDENTIFIER_LEN + payload.len());
    data.extend_from_slice(identifier);
    data.extend_from_slice(payload);
    data.push(RBSP_TRAILING_BITS);

    debug_assert_eq!(data.len(), len);

    Ok(data)
}

/// Creates a buffer holding a SEI NAL unit tagged with a freshly generated identifier.
pub fn encode(payload: &[u8], codec: Codec) -> Result<gst::Buffer, SeiError> {
    let identifier = identifier::sei_identifier(identifier::generate().as_ref());
    encode_with_identifier(payload, codec, &identifier)
}

pub fn encode_with_identifier(
    payload: &[u8],
    codec: Codec,
    identifier: &[u8; IDENTIFIER_LEN],
) -> Result<gst::Buffer, SeiError> {
    write(payload, codec, identifier).map(gst::Buffer::from_mut_slice)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDataUnregistered<'a> {
    pub identifier: &'a [u8; IDENTIFIER_LEN],
    pub payload: &'a [u8],
}

/// Parses a single SEI NAL unit as produced by [`write`].
pub fn parse(data: &[u8], codec: Codec) -> Result<UserDataUnregistered<'_>, SeiError> {
    let header = codec
        .nal_header()
        .ok_or(SeiError::UnsupportedCodec(codec))?;

    if data.len() < START_CODE.len() {
        return Err(SeiError::Truncated);
    }
    let (start_code, rest) = data.split_at(START_CODE.len());
    if start_code != START_CODE {
        return Err(SeiError::InvalidStartCode);
    }

    if rest.len() < header.len() {
        return Err(SeiError::Truncated);
    }
    let (nal_header, rest) = rest.split_at(header.len());
    if nal_header != header {
        return Err(SeiError::InvalidNalHeader(codec));
    }

    let (&payload_type, mut rest) = rest.split_first().ok_or(SeiError::Truncated)?;
    if payload_type != USER_DATA_UNREGISTERED {
        return Err(SeiError::UnexpectedPayloadType(payload_type));
    }

    let mut size = 0;
    loop {
        let (&byte, tail) = rest.split_first().ok_or(SeiError::Truncated)?;
        rest = tail;
        size += byte as usize;
        if byte != SIZE_CONTINUATION {
            break;
        }
    }

    // Everything after the payload must be the single trailing bits byte
    let available = rest.len().saturating_sub(1);
    if size < IDENTIFIER_LEN || size != available {
        if size > available {
            return Err(SeiError::Truncated);
        }
        return Err(SeiError::SizeMismatch {
            declared: size,
            available,
        });
    }

    let (body, trailing) = rest.split_at(size);
    if trailing != [RBSP_TRAILING_BITS] {
        return Err(SeiError::MissingTrailingBits);
    }

    let (identifier, payload) = body.split_at(IDENTIFIER_LEN);
    let identifier = identifier.try_into().map_err(|_| SeiError::Truncated)?;

    Ok(UserDataUnregistered {
        identifier,
        payload,
    })
}
