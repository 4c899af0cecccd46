use rgk_core::rtag4;

/// Platform tag used by PS2 texture natives instead of the plain platform id
pub const FOURCC_PS2: u32 = rtag4!(b"PS2\0");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Platform {
	Null = 0,
	Ogl = 2,
	Ps2 = 4,
	Xbox = 5,
	D3D8 = 8,
	D3D9 = 9,
}

impl Platform {
	pub const ALL: [Platform; 5] = [
		Platform::Ogl,
		Platform::Ps2,
		Platform::Xbox,
		Platform::D3D8,
		Platform::D3D9,
	];

	pub fn from_u32(value: u32) -> Option<Platform> {
		match value {
			0 => Some(Platform::Null),
			2 => Some(Platform::Ogl),
			4 | FOURCC_PS2 => Some(Platform::Ps2),
			5 => Some(Platform::Xbox),
			8 => Some(Platform::D3D8),
			9 => Some(Platform::D3D9),
			_ => None,
		}
	}

	/// Looks up a platform by the names the conversion tool accepts
	pub fn from_name(name: &str) -> Option<Platform> {
		match name {
			"mobile" => Some(Platform::Ogl),
			"ps2" => Some(Platform::Ps2),
			"xbox" => Some(Platform::Xbox),
			"d3d8" => Some(Platform::D3D8),
			"d3d9" => Some(Platform::D3D9),
			_ => None,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Platform::Null => "null",
			Platform::Ogl => "mobile",
			Platform::Ps2 => "ps2",
			Platform::Xbox => "xbox",
			Platform::D3D8 => "d3d8",
			Platform::D3D9 => "d3d9",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_platform_ids() {
		for p in Platform::ALL {
			assert_eq!(Some(p), Platform::from_u32(p as u32));
			assert_eq!(Some(p), Platform::from_name(p.name()));
		}
		assert_eq!(Some(Platform::Ps2), Platform::from_u32(FOURCC_PS2));
		assert_eq!(None, Platform::from_u32(3));
		assert_eq!(None, Platform::from_name("dreamcast"));
	}
}
