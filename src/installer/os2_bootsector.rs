// Copyright 2019 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! OS/2 boot-sector lift and patch. `SYSINSTX.COM` on
//! the installer ISO embeds a FAT-EBPB-bearing 512-byte boot sector
//! template; we scan for it, graft the destination floppy's own BPB
//! geometry into the match, and patch the embedded OS2LDR IDIV timing
//! loop so it doesn't stall under virtualization.

use anyhow::{ensure, Context, Result};

use crate::errors::ParseError;

const WINDOW_SIZE: usize = 8 * 1024;
const OVERLAP: usize = 512;
const SECTOR: usize = 512;
const EBPB_OFFSET: usize = 0x00B;
const EBPB_SIGNATURE_OFFSET: usize = 0x026;
const EBPB_SIGNATURE: u8 = 0x29;
const EBPB_TYPE_OFFSET: usize = 0x036;

/// Scan `sysinstx` (the full contents of `SYSINSTX.COM`) for a candidate
/// boot sector, returning the 512-byte block as found (before any
/// geometry graft).
pub fn find_candidate(sysinstx: &[u8]) -> Result<[u8; SECTOR]> {
    let mut offset = 0usize;
    while offset < sysinstx.len() {
        let window_end = (offset + WINDOW_SIZE).min(sysinstx.len());
        let window = &sysinstx[offset..window_end];

        let mut pos = 0usize;
        while pos + SECTOR <= window.len() {
            let candidate = &window[pos..pos + SECTOR];
            if is_valid_candidate(candidate) {
                let mut out = [0u8; SECTOR];
                out.copy_from_slice(candidate);
                return Ok(out);
            }
            pos += 1;
        }

        if window_end == sysinstx.len() {
            break;
        }
        offset += WINDOW_SIZE - OVERLAP;
    }

    Err(ParseError::new(
            "could not locate a FAT boot sector signature inside SYSINSTX.COM",
        )
        .into())
}

fn is_valid_candidate(block: &[u8]) -> bool {
    if block.len() != SECTOR {
        return false;
    }
    if block[0x1FE] != 0x55 || block[0x1FF] != 0xAA {
        return false;
    }
    if block[0x000] != 0xEB {
        return false;
    }
    let min_jump = 3 + 8 + (EBPB_TYPE_OFFSET + 8 - EBPB_OFFSET) - 2;
    if (block[0x001] as usize) < min_jump {
        return false;
    }
    if !block[0x003].is_ascii_alphanumeric() || !block[0x004].is_ascii_alphanumeric() {
        return false;
    }
    if block[EBPB_SIGNATURE_OFFSET] != EBPB_SIGNATURE {
        return false;
    }
    let fat_type = &block[EBPB_TYPE_OFFSET..EBPB_TYPE_OFFSET + 8];
    fat_type == b"FAT     " || fat_type == b"FAT12   "
}

/// Graft `destination_first_sector`'s own BPB geometry (bytes
/// `0x00B..0x03E`, covering the BPB and EBPB fields) into `candidate`,
/// preserving the candidate's boot code and only replacing the
/// geometry fields that must match the floppy actually being written.
pub fn graft_geometry(candidate: &mut [u8; SECTOR], destination_first_sector: &[u8; SECTOR]) {
    const GEOMETRY_START: usize = EBPB_OFFSET;
    const GEOMETRY_END: usize = EBPB_TYPE_OFFSET + 8;
    candidate[GEOMETRY_START..GEOMETRY_END]
    .copy_from_slice(&destination_first_sector[GEOMETRY_START..GEOMETRY_END]);
}

/// Patch OS2LDR's IDIV timing-calibration loop: find the 3-byte IDIV
/// instruction sequence this loop is keyed on and overwrite it with
/// `mov ax, 0x1000` plus a near jump that skips the loop body, so it
/// doesn't stall under virtualization. `os2ldr` is the file's full
/// bytes, mutated in place.
pub fn patch_os2ldr(os2ldr: &mut [u8]) -> Result<()> {
    const IDIV_SIGNATURE: &[u8] = &[0xF7, 0xF9]; // idiv ecx (32-bit form used by the calibration loop)
    let offset = os2ldr
    .windows(IDIV_SIGNATURE.len())
    .position(|w| w == IDIV_SIGNATURE)
    .ok_or_else(|| {
            ParseError::new("could not locate the OS2LDR IDIV calibration loop signature")
        })?;

    ensure!(
        offset + 5 <= os2ldr.len(),
        ParseError::new("OS2LDR is truncated at the IDIV patch site")
    );

    // mov ax, 0x1000
    os2ldr[offset] = 0xB8;
    os2ldr[offset + 1] = 0x00;
    os2ldr[offset + 2] = 0x10;
    // jmp short +2 (skip the two bytes that would otherwise resume the loop)
    os2ldr[offset + 3] = 0xEB;
    os2ldr[offset + 4] = 0x02;

    Ok(())
}

/// Full lift: read `SYSINSTX.COM`, find the candidate, graft the
/// destination's geometry, and return the ready-to-write boot sector.
pub fn lift(sysinstx: &[u8], destination_first_sector: &[u8; SECTOR]) -> Result<[u8; SECTOR]> {
    let mut candidate = find_candidate(sysinstx).context("lifting SYSINSTX.COM boot sector")?;
    graft_geometry(&mut candidate, destination_first_sector);
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_candidate() -> [u8; SECTOR] {
        let mut b = [0u8; SECTOR];
        b[0x000] = 0xEB;
        b[0x001] = 0x40;
        b[0x002] = 0x90;
        b[0x003] = b'O';
        b[0x004] = b'S';
        b[EBPB_SIGNATURE_OFFSET] = EBPB_SIGNATURE;
        b[EBPB_TYPE_OFFSET..EBPB_TYPE_OFFSET + 8].copy_from_slice(b"FAT12   ");
        b[0x1FE] = 0x55;
        b[0x1FF] = 0xAA;
        b
    }

    #[test]
    fn finds_candidate_embedded_in_larger_blob() {
        let mut blob = vec![0u8; 4096];
        let candidate = synthetic_candidate();
        blob[1000..1000 + SECTOR].copy_from_slice(&candidate);
        let found = find_candidate(&blob).unwrap();
        assert_eq!(found, candidate);
    }

    #[test]
    fn missing_signature_is_an_error() {
        let blob = vec![0u8; 4096];
        assert!(find_candidate(&blob).is_err());
    }

    #[test]
    fn graft_preserves_boot_code_outside_geometry_window() {
        let mut candidate = synthetic_candidate();
        candidate[0x1F0] = 0xAB;
        let mut dest = [0u8; SECTOR];
        dest[EBPB_OFFSET] = 0x77;
        graft_geometry(&mut candidate, &dest);
        assert_eq!(candidate[EBPB_OFFSET], 0x77);
        assert_eq!(candidate[0x1F0], 0xAB);
    }

    #[test]
    fn patches_idiv_signature_with_mov_and_jump() {
        let mut os2ldr = vec![0x90u8; 64];
        os2ldr[20] = 0xF7;
        os2ldr[21] = 0xF9;
        patch_os2ldr(&mut os2ldr).unwrap();
        assert_eq!(&os2ldr[20..25], &[0xB8, 0x00, 0x10, 0xEB, 0x02]);
    }

    #[test]
    fn missing_idiv_signature_is_an_error() {
        let mut os2ldr = vec![0x90u8; 64];
        assert!(patch_os2ldr(&mut os2ldr).is_err());
    }
}
