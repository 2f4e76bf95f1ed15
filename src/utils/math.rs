const TAB64: [u32; 64] = [
    63, 0, 58, 1, 59, 47, 53, 2, 60, 39, 48, 27, 54, 33, 42, 3, 61, 51, 37, 40, 49, 18, 28, 20, 55,
    30, 34, 11, 43, 14, 22, 4, 62, 57, 46, 52, 38, 26, 32, 41, 50, 36, 17, 19, 29, 10, 13, 21, 56,
    45, 25, 31, 35, 16, 9, 12, 44, 24, 15, 8, 23, 7, 6, 5,
];

/// Floor of log2 via a de Bruijn lookup. `value` must be non-zero.
pub fn fast_log2(value: usize) -> u32 {
    debug_assert_ne!(value, 0);

    let mut value = value as u64;
    value |= value >> 1;
    value |= value >> 2;
    value |= value >> 4;
    value |= value >> 8;
    value |= value >> 16;
    value |= value >> 32;

    TAB64[((value - (value >> 1)).wrapping_mul(0x07EDD5E59A4E28C2) >> 58) as usize]
}

/// Rounds `value` up to the nearest multiple of `mult`, which has to be a power of two.
/// Returns `None` on overflow.
#[inline]
pub fn round_up(value: usize, mult: usize) -> Option<usize> {
    debug_assert!(mult.is_power_of_two());

    value.checked_add(mult - 1).map(|it| it & !(mult - 1))
}

#[inline]
pub fn div_ceil(value: usize, by: usize) -> usize {
    value / by + usize::from(value % by > 0)
}

#[cfg(test)]
mod tests {
    use crate::utils::math::{div_ceil, fast_log2, round_up};

    #[test]
    fn log2_matches_std() {
        for value in (1..5000usize).chain([usize::MAX, 1 << 40, (1 << 40) + 1]) {
            assert_eq!(fast_log2(value), value.ilog2(), "at {}", value);
        }
    }

    #[test]
    fn rounding_works_fine() {
        assert_eq!(round_up(0, 8), Some(0));
        assert_eq!(round_up(1, 8), Some(8));
        assert_eq!(round_up(16, 8), Some(16));
        assert_eq!(round_up(17, 8), Some(24));
        assert_eq!(round_up(usize::MAX - 3, 8), None);

        assert_eq!(div_ceil(0, 4), 0);
        assert_eq!(div_ceil(1, 4), 1);
        assert_eq!(div_ceil(8, 4), 2);
        assert_eq!(div_ceil(9, 4), 3);
    }
}
