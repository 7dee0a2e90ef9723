/* Copyright 2014 Google Inc. All Rights Reserved.

   Distributed under MIT license.
   See file LICENSE for detail or copy at https://opensource.org/licenses/MIT
*/

//! sfnt table checksums and directory search-range fields

use crate::error::{Woff2Error, bail_if};

/// Value that the checksum of a whole sfnt file, including
/// `checkSumAdjustment`, must come out to.
pub(crate) const CHECKSUM_MAGIC: u32 = 0xb1b0_afba;

/// Offset of `checkSumAdjustment` within the `head` table.
pub(crate) const HEAD_CHECKSUM_ADJUSTMENT_OFFSET: usize = 8;

/// Compute the sfnt checksum of `buf`: the wrapping sum of its
/// big-endian u32 words.
pub(crate) fn compute_checksum(buf: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    let mut iter = buf.chunks_exact(4);
    for chunk in &mut iter {
        let bytes: [u8; 4] = chunk.try_into().unwrap();
        checksum = checksum.wrapping_add(u32::from_be_bytes(bytes));
    }

    // Treat sizes not aligned on 4 as if they were padded to 4 with 0's.
    checksum = checksum.wrapping_add(match iter.remainder() {
        &[a, b, c] => u32::from_be_bytes([a, b, c, 0]),
        &[a, b] => u32::from_be_bytes([a, b, 0, 0]),
        &[a] => u32::from_be_bytes([a, 0, 0, 0]),
        [] => 0,
        _ => unreachable!("chunk size was 4 so remainder will be a slice of length 3 or smaller"),
    });

    checksum
}

/// Compute the checksum of a `head` table with the `checkSumAdjustment`
/// field (bytes 8..12) treated as zero.
pub(crate) fn compute_head_checksum(head: &[u8]) -> Result<u32, Woff2Error> {
    bail_if!(
        head.len() < HEAD_CHECKSUM_ADJUSTMENT_OFFSET + 4,
        "'head' table is too short"
    );
    // Both halves start 4-aligned, so their checksums sum cleanly.
    let before = compute_checksum(&head[..HEAD_CHECKSUM_ADJUSTMENT_OFFSET]);
    let after = compute_checksum(&head[HEAD_CHECKSUM_ADJUSTMENT_OFFSET + 4..]);
    Ok(before.wrapping_add(after))
}

/// The `searchRange`/`entrySelector`/`rangeShift` triple of an sfnt
/// table directory with `num_tables` 16-byte entries.
pub(crate) fn search_range_fields(num_tables: u16) -> (u16, u16, u16) {
    debug_assert!(num_tables > 0);
    let entry_selector = num_tables.ilog2() as u16;
    let search_range = (1u16 << entry_selector) * 16;
    let range_shift = num_tables * 16 - search_range;
    (search_range, entry_selector, range_shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_checksum_sums_words() {
        let buf = [0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(compute_checksum(&buf), 3);
    }

    #[test]
    fn trailing_bytes_are_zero_padded() {
        assert_eq!(compute_checksum(&[0x80]), 0x8000_0000);
        assert_eq!(compute_checksum(&[0x12, 0x34]), 0x1234_0000);
        assert_eq!(compute_checksum(&[0x12, 0x34, 0x56]), 0x1234_5600);
    }

    #[test]
    fn checksum_wraps() {
        let buf = [0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(compute_checksum(&buf), 1);
    }

    #[test]
    fn head_checksum_masks_adjustment() {
        let mut head = vec![0u8; 54];
        head[0] = 0x11;
        head[20] = 0x22;
        let baseline = compute_head_checksum(&head).unwrap();
        head[8..12].copy_from_slice(&0xdead_beefu32.to_be_bytes());
        assert_eq!(compute_head_checksum(&head).unwrap(), baseline);
    }

    #[test]
    fn search_range_matches_spec_formula() {
        // entrySelector = floor(log2(n)), searchRange = 2^entrySelector * 16
        assert_eq!(search_range_fields(1), (16, 0, 0));
        assert_eq!(search_range_fields(8), (128, 3, 0));
        assert_eq!(search_range_fields(9), (128, 3, 16));
        assert_eq!(search_range_fields(15), (128, 3, 112));
        assert_eq!(search_range_fields(16), (256, 4, 0));
    }
}
