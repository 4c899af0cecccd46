#[cfg(feature = "io_ext")]
pub mod io_ext;

/// Converts a 4-byte string into a 32-bit little endian integer.
/// Byte strings longer than 4 bytes are truncated.
#[macro_export]
macro_rules! rtag4 {
	($b4: literal) => {
		u32::from_le_bytes([$b4[0], $b4[1], $b4[2], $b4[3]])
	}
}

/// Rounds `x` up to the next multiple of `align`, which must be a power of two
pub const fn align_up(x: usize, align: usize) -> usize {
	(x + align - 1) & !(align - 1)
}
