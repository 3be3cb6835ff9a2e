//! Zero-run compression for packet payloads.
//!
//! A run of zero bytes becomes a `0x00` marker followed by count bytes. Each
//! count byte covers up to 254 zeros; a count of exactly 254 chains into a
//! following count byte (possibly zero). Expansion is the exact inverse and
//! reproduces the input byte-for-byte.

use tracing::warn;

use super::{Error, Result};

/// Largest run a single count byte expresses before chaining.
const RUN_CHAIN_THRESHOLD: u8 = 254;

/// Compress `payload`, returning `None` when the encoded form would not be
/// strictly smaller than the input.
#[must_use]
pub fn compress(payload: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;
    while i < payload.len() {
        let byte = payload[i];
        if byte != 0 {
            out.push(byte);
            i += 1;
            continue;
        }

        let mut run = 0usize;
        while i < payload.len() && payload[i] == 0 {
            run += 1;
            i += 1;
        }

        out.push(0);
        loop {
            let chunk = run.min(RUN_CHAIN_THRESHOLD as usize);
            out.push(chunk as u8);
            run -= chunk;
            if chunk < RUN_CHAIN_THRESHOLD as usize {
                break;
            }
        }

        if out.len() >= payload.len() {
            // Already as long as the whole input; later bytes only add.
            return None;
        }
    }

    if out.len() < payload.len() { Some(out) } else { None }
}

/// Expand a zero-run compressed `payload`.
///
/// `max_size` bounds the expanded output; input claiming a longer expansion
/// is rejected rather than written, since the run lengths originate on the
/// network.
pub fn expand(payload: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;
    while i < payload.len() {
        let byte = payload[i];
        i += 1;
        if byte != 0 {
            if out.len() >= max_size {
                warn!(max_size, "zero-run expansion exceeded output capacity");
                return Err(Error::RunawayZeroRun { max: max_size });
            }
            out.push(byte);
            continue;
        }

        let mut run = 0usize;
        loop {
            if i >= payload.len() {
                warn!("zero-run marker at end of buffer with no count byte");
                return Err(Error::MalformedPacket {
                    reason: "zero-run count missing",
                });
            }
            let count = payload[i];
            i += 1;
            run += count as usize;
            if count < RUN_CHAIN_THRESHOLD {
                break;
            }
        }

        if out.len() + run > max_size {
            warn!(run, max_size, "zero run claims to extend past capacity");
            return Err(Error::RunawayZeroRun { max: max_size });
        }
        out.resize(out.len() + run, 0);
    }
    Ok(out)
}
