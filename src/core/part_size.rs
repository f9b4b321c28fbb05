/*!
 * Part-size planning for multipart transfers
 */

/// Smallest part the storage service accepts (except for the last part)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Hard cap on parts per multipart upload
pub const MAX_PARTS: u64 = 10_000;

/// One planned part of a known-length upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartDescriptor {
    /// 1-based part number
    pub part_number: i32,
    pub offset: u64,
    pub length: u64,
}

/// Smallest part size that keeps `total_size` within [`MAX_PARTS`]
///
/// Unknown sizes get [`MIN_PART_SIZE`].
pub fn plan_part_size(total_size: Option<u64>) -> u64 {
    match total_size {
        None => MIN_PART_SIZE,
        Some(total) => total.div_ceil(MAX_PARTS).max(MIN_PART_SIZE),
    }
}

/// Part size actually used for a transfer
///
/// A caller-requested size is honoured only where it does not produce
/// undersized parts or exceed the part cap.
pub fn effective_part_size(requested: Option<u64>, total_size: Option<u64>) -> u64 {
    let planned = plan_part_size(total_size);
    match requested {
        Some(size) => size.max(planned),
        None => planned,
    }
}

/// Split `total_size` bytes into consecutive parts of `part_size`
///
/// An empty object still yields one empty part, since a multipart upload
/// cannot complete with zero parts.
pub fn plan_parts(total_size: u64, part_size: u64) -> Vec<PartDescriptor> {
    let part_size = part_size.max(1);
    let mut parts = Vec::new();
    let mut offset = 0u64;
    let mut part_number = 1i32;

    loop {
        let length = part_size.min(total_size - offset);
        parts.push(PartDescriptor {
            part_number,
            offset,
            length,
        });
        offset += length;
        part_number += 1;

        if offset >= total_size {
            break;
        }
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_unknown_size_uses_minimum() {
        assert_eq!(plan_part_size(None), MIN_PART_SIZE);
    }

    #[test]
    fn test_small_sizes_floor_at_minimum() {
        assert_eq!(plan_part_size(Some(0)), MIN_PART_SIZE);
        assert_eq!(plan_part_size(Some(100 * MIB)), MIN_PART_SIZE);
        assert_eq!(plan_part_size(Some(MIN_PART_SIZE * MAX_PARTS)), MIN_PART_SIZE);
    }

    #[test]
    fn test_huge_sizes_stay_under_part_cap() {
        let total = MIN_PART_SIZE * MAX_PARTS + 1;
        let size = plan_part_size(Some(total));
        assert_eq!(size, MIN_PART_SIZE + 1);
        assert!(total.div_ceil(size) <= MAX_PARTS);

        let five_tib = 5 * 1024 * 1024 * MIB;
        let size = plan_part_size(Some(five_tib));
        assert!(five_tib.div_ceil(size) <= MAX_PARTS);
    }

    #[test]
    fn test_requested_part_size_raised_to_floor() {
        assert_eq!(effective_part_size(Some(MIB), Some(50 * MIB)), MIN_PART_SIZE);
        assert_eq!(effective_part_size(Some(8 * MIB), Some(50 * MIB)), 8 * MIB);
        assert_eq!(effective_part_size(None, None), MIN_PART_SIZE);
    }

    #[test]
    fn test_plan_parts_covers_every_byte() {
        let total = 3 * MIN_PART_SIZE + 1;
        let parts = plan_parts(total, MIN_PART_SIZE);

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[3].part_number, 4);
        assert_eq!(parts[3].offset, 3 * MIN_PART_SIZE);
        assert_eq!(parts[3].length, 1);
        assert_eq!(parts.iter().map(|p| p.length).sum::<u64>(), total);
    }

    #[test]
    fn test_plan_parts_part_count_is_ceiling() {
        for total in [1, MIN_PART_SIZE - 1, MIN_PART_SIZE, MIN_PART_SIZE + 1, 7 * MIN_PART_SIZE] {
            let parts = plan_parts(total, MIN_PART_SIZE);
            assert_eq!(parts.len() as u64, total.div_ceil(MIN_PART_SIZE));
        }
    }

    #[test]
    fn test_plan_parts_empty_object() {
        let parts = plan_parts(0, MIN_PART_SIZE);
        assert_eq!(
            parts,
            vec![PartDescriptor {
                part_number: 1,
                offset: 0,
                length: 0
            }]
        );
    }
}
