//! Part partitioning.

use crate::TransferError;
use crate::types::Part;

/// Highest part number a plan can use.
pub const MAX_PARTS: u64 = u32::MAX as u64;

/// Number of parts needed for `[start_offset, total_size)`.
pub fn part_count(total_size: u64, part_size: u64, start_offset: u64) -> u64 {
    if part_size == 0 {
        return 0;
    }
    total_size.saturating_sub(start_offset).div_ceil(part_size)
}

/// Like [`plan`], but fails instead of planning more than [`MAX_PARTS`]
/// parts.
pub fn checked_plan(
    total_size: u64,
    part_size: u64,
    start_offset: u64,
) -> Result<Vec<Part>, TransferError> {
    let parts = part_count(total_size, part_size, start_offset);
    if parts > MAX_PARTS {
        return Err(TransferError::TooManyParts {
            parts,
            max: MAX_PARTS,
        });
    }
    Ok(plan(total_size, part_size, start_offset))
}

/// Splits `[start_offset, total_size)` into consecutive parts.
///
/// Parts are numbered from 1. Every part is `part_size` bytes long except
/// the last, which holds the remainder. An empty vector means there is
/// nothing left to transfer.
///
/// `part_size` must be non-zero; [`TransferConfig::validate`] enforces it.
/// Planning stops at part number [`MAX_PARTS`]; use [`checked_plan`] to
/// reject larger inputs.
///
/// [`TransferConfig::validate`]: crate::TransferConfig::validate
pub fn plan(total_size: u64, part_size: u64, start_offset: u64) -> Vec<Part> {
    debug_assert!(part_size > 0, "part size must be non-zero");
    if part_size == 0 || start_offset >= total_size {
        return Vec::new();
    }

    let count = part_count(total_size, part_size, start_offset);
    (0..count)
        .map_while(|i| {
            let number = u32::try_from(i + 1).ok()?;
            let offset = start_offset + i * part_size;
            let length = part_size.min(total_size - offset);
            Some(Part::new(number, offset, length))
        })
        .collect()
}
