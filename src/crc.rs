// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CRC32 checksum utilities for record integrity verification.
//!
//! Uses CRC-32 (IEEE polynomial) via crc32fast. The checksum covers the
//! entire frame body (kind byte through payload), so a flipped length field,
//! a flipped kind byte, and a truncated write are all detectable.

use crc32fast::Hasher;

/// Calculates the CRC32 checksum of a frame body.
#[inline]
pub(crate) fn frame_crc(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

/// Verifies a frame body against its stored checksum.
#[inline]
pub(crate) fn verify_frame_crc(body: &[u8], expected: u32) -> bool {
    frame_crc(body) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_crc_is_deterministic() {
        let body = b"record body";
        assert_eq!(frame_crc(body), frame_crc(body));
        assert_ne!(frame_crc(body), frame_crc(b"record bodz"));
    }

    #[test]
    fn test_verify_frame_crc() {
        let body = b"frame to verify";
        let crc = frame_crc(body);

        assert!(verify_frame_crc(body, crc));
        assert!(!verify_frame_crc(body, crc.wrapping_add(1)));
        assert!(!verify_frame_crc(b"other", crc));
    }
}
