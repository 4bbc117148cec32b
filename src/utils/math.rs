//! Integer helpers shared by the passes.

/// Returns `log2(value)` when `value` is a power of two.
#[must_use]
pub fn exact_log2(value: u32) -> Option<u8> {
    if value.is_power_of_two() {
        u8::try_from(value.trailing_zeros()).ok()
    } else {
        None
    }
}
