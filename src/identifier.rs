// Copyright (C) 2025 Erwan Le Blond <erwanleblond@gmail.com>
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at
// <https://mozilla.org/MPL/2.0/>.
//
// SPDX-License-Identifier: MPL-2.0

//! Version 4 UUIDs used to tag the injected SEI payloads.
//!
//! Random bytes come from the operating system. If that fails, a pseudo-random generator seeded
//! once per process from the current time and the process id is used instead.

use std::sync::{LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use uuid::Uuid;

use crate::lvcompositor::CAT;
use crate::sei::IDENTIFIER_LEN;

#[derive(thiserror::Error, Debug)]
pub enum IdentifierError {
    #[error("Entropy source unavailable: {0}")]
    EntropySourceUnavailable(#[from] rand::Error),

    #[error("Fallback random generator unavailable")]
    FallbackUnavailable,
}

static FALLBACK_RNG: LazyLock<Mutex<StdRng>> = LazyLock::new(|| {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Mutex::new(fallback_rng(fallback_seed(now, std::process::id())))
});

pub fn fallback_seed(unix_time_secs: u64, pid: u32) -> u64 {
    unix_time_secs ^ u64::from(pid)
}

pub fn fallback_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Sets the RFC 4122 version and variant bits on 16 random bytes.
pub fn uuid_from_random_bytes(bytes: [u8; 16]) -> Uuid {
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

pub fn uuid_from_rng<R: RngCore + ?Sized>(rng: &mut R) -> Uuid {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid_from_random_bytes(bytes)
}

fn os_uuid() -> Result<Uuid, IdentifierError> {
    let mut bytes = [0u8; 16];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(uuid_from_random_bytes(bytes))
}

fn fallback_uuid() -> Result<Uuid, IdentifierError> {
    let mut rng = FALLBACK_RNG
        .lock()
        .map_err(|_| IdentifierError::FallbackUnavailable)?;
    Ok(uuid_from_rng(&mut *rng))
}

/// Returns `None` only if neither random source could be used.
pub fn generate() -> Option<Uuid> {
    os_uuid()
        .or_else(|err| {
            gst::debug!(CAT, "{err}, using fallback generator");
            fallback_uuid()
        })
        .inspect_err(|err| gst::warning!(CAT, "{err}"))
        .ok()
}

/// SEI identifier field for `uuid`.
///
/// These are the first 16 characters of the lowercase hex representation without dashes, not
/// the binary UUID. Without a UUID the field is all zeroes.
pub fn sei_identifier(uuid: Option<&Uuid>) -> [u8; IDENTIFIER_LEN] {
    let mut identifier = [0u8; IDENTIFIER_LEN];

    if let Some(uuid) = uuid {
        let mut buf = Uuid::encode_buffer();
        let hex = uuid.simple().encode_lower(&mut buf);
        identifier.copy_from_slice(&hex.as_bytes()[..IDENTIFIER_LEN]);
    }

    identifier
}
