pub mod d3d8;
pub mod d3d9;
pub mod xbox;

use ultraviolet::vec::Vec3;

/// Generic colors are RGBA, D3DCOLOR is BGRA. The swap is its own inverse.
pub(crate) fn swap_red_blue(c: [u8; 4]) -> [u8; 4] {
	[c[2], c[1], c[0], c[3]]
}

pub(crate) fn has_alpha(colors: &[[u8; 4]]) -> bool {
	colors.iter().any(|c| c[3] != 0xFF)
}

fn quantize(x: f32, scale: f32, min: i32, max: i32) -> i32 {
	((x * scale).round() as i32).clamp(min, max)
}

/// Packs a normal into 11, 11 and 10 signed bits
pub(crate) fn pack_compnorm(n: Vec3) -> u32 {
	let x = quantize(n.x, 1023.0, -1024, 1023) as u32 & 0x7FF;
	let y = quantize(n.y, 1023.0, -1024, 1023) as u32 & 0x7FF;
	let z = quantize(n.z, 511.0, -512, 511) as u32 & 0x3FF;
	z << 22 | y << 11 | x
}

pub(crate) fn unpack_compnorm(v: u32) -> Vec3 {
	// shift each field to the top and back down to sign extend it
	let x = ((v << 21) as i32) >> 21;
	let y = ((v << 10) as i32) >> 21;
	let z = (v as i32) >> 22;
	Vec3::new(x as f32 / 1023.0, y as f32 / 1023.0, z as f32 / 511.0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_compnorm() {
		let n = pack_compnorm(Vec3::new(1.0, -1.0, 0.0));
		assert_eq!(0x3FF, n & 0x7FF);
		assert_eq!(0x401, (n >> 11) & 0x7FF);
		assert_eq!(0, n >> 22);
		assert_eq!(Vec3::new(1.0, -1.0, 0.0), unpack_compnorm(n));

		let packed = pack_compnorm(Vec3::new(0.3, 0.5, -0.8));
		assert_eq!(packed, pack_compnorm(unpack_compnorm(packed)));
	}

	#[test]
	fn test_color_swap() {
		assert_eq!([3, 2, 1, 4], swap_red_blue([1, 2, 3, 4]));
		assert!(has_alpha(&[[0, 0, 0, 255], [0, 0, 0, 254]]));
		assert!(!has_alpha(&[[9, 9, 9, 255]]));
	}
}
