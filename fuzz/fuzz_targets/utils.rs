pub const MAX_INPUT_SIZE: usize = 256 * 1024;

/// Returns `data` truncated to `MAX_INPUT_SIZE`.
///
/// The fuzzer input is capped to avoid OOM and quadratic behavior on
/// pathological inputs.
#[inline]
pub fn truncate(data: &[u8]) -> &[u8] {
    &data[..data.len().min(MAX_INPUT_SIZE)]
}
