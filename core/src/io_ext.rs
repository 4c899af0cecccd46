use std::io::{
	Read,
	Result,
	Write
};

use ultraviolet::vec::{
	Vec2,
	Vec3,
	Vec4
};

pub trait ReadBinExt: Read {
	/// Reads `length` bytes and returns the text before the first null byte
	#[inline]
	fn read_fixed_str(&mut self, length: usize) -> Result<String> {
		let mut raw = vec![0; length];
		self.read_exact(&mut raw)?;

		let end = raw.iter().position(|&b| b == 0).unwrap_or(length);
		Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
	}

	/// Reads a little endian 2D vector
	#[inline]
	fn read_vec2_le(&mut self) -> Result<Vec2> {
		let mut x = [0; 4];
		let mut y = x;

		self.read_exact(&mut x)?;
		self.read_exact(&mut y)?;

		Ok(Vec2::new(f32::from_le_bytes(x), f32::from_le_bytes(y)))
	}

	/// Reads a little endian 3D vector
	#[inline]
	fn read_vec3_le(&mut self) -> Result<Vec3> {
		let mut x = [0; 4];
		let mut y = x;
		let mut z = y;

		self.read_exact(&mut x)?;
		self.read_exact(&mut y)?;
		self.read_exact(&mut z)?;

		Ok(Vec3::new(f32::from_le_bytes(x), f32::from_le_bytes(y), f32::from_le_bytes(z)))
	}

	/// Reads a little endian 4D vector
	#[inline]
	fn read_vec4_le(&mut self) -> Result<Vec4> {
		let mut x = [0; 4];
		let mut y = x;
		let mut z = y;
		let mut w = z;

		self.read_exact(&mut x)?;
		self.read_exact(&mut y)?;
		self.read_exact(&mut z)?;
		self.read_exact(&mut w)?;

		Ok(Vec4::new(f32::from_le_bytes(x), f32::from_le_bytes(y), f32::from_le_bytes(z),
			f32::from_le_bytes(w)))
	}
}

impl<R> ReadBinExt for R
where
	R: Read + ?Sized,
{
}

pub trait WriteBinExt: Write {
	/// Writes `s` followed by null bytes up to `length` bytes.
	/// Text longer than `length` is truncated.
	#[inline]
	fn write_fixed_str(&mut self, s: &str, length: usize) -> Result<()> {
		let mut raw = s.as_bytes().to_vec();
		raw.resize(length, 0);
		self.write_all(&raw)
	}

	/// Writes a little endian 2D vector
	#[inline]
	fn write_vec2_le(&mut self, v: Vec2) -> Result<()> {
		self.write_all(&v.x.to_le_bytes())?;
		self.write_all(&v.y.to_le_bytes())
	}

	/// Writes a little endian 3D vector
	#[inline]
	fn write_vec3_le(&mut self, v: Vec3) -> Result<()> {
		self.write_all(&v.x.to_le_bytes())?;
		self.write_all(&v.y.to_le_bytes())?;
		self.write_all(&v.z.to_le_bytes())
	}

	/// Writes a little endian 4D vector
	#[inline]
	fn write_vec4_le(&mut self, v: Vec4) -> Result<()> {
		self.write_all(&v.x.to_le_bytes())?;
		self.write_all(&v.y.to_le_bytes())?;
		self.write_all(&v.z.to_le_bytes())?;
		self.write_all(&v.w.to_le_bytes())
	}
}

impl<W> WriteBinExt for W
where
	W: Write + ?Sized,
{
}

#[cfg(test)]
mod tests {
	use ultraviolet::vec::{
		Vec2,
		Vec3,
		Vec4
	};

	use super::*;

	#[test]
	fn test_read_fixed_str() {
		let mut data = &b"test\x00\x00\x00\x00rest"[..];
		assert_eq!("test".to_string(), data.read_fixed_str(8).unwrap());
		assert_eq!(b"rest", data);

		let mut full = &b"abcd"[..];
		assert_eq!("abcd".to_string(), full.read_fixed_str(4).unwrap());
	}

	#[test]
	fn test_write_fixed_str() {
		let mut out = vec![];
		out.write_fixed_str("tex", 8).unwrap();
		assert_eq!(b"tex\x00\x00\x00\x00\x00", out.as_slice());
	}

	#[test]
	fn test_read_vecs() {
		let mut vec2: &[u8] = &[0x5c, 0x1f, 0x7f, 0x3c, 0xa4, 0xfb, 0xf0, 0x3d][..];
		let mut vec3: &[u8] = &[0x5c, 0x1f, 0x7f, 0x3c, 0xa4, 0xfb, 0xf0, 0x3d, 0xd4, 0xf1, 0xb6, 0x3d][..];
		let mut vec4: &[u8] = &[0x5c, 0x1f, 0x7f, 0x3c, 0xa4, 0xfb, 0xf0, 0x3d, 0xd4, 0xf1, 0xb6, 0x3d,
			0, 0xa0, 0xd9, 0xbd][..];
		assert_eq!(Vec2::new(0.0155714415, 0.117667466), vec2.read_vec2_le().unwrap());
		assert_eq!(Vec3::new(0.0155714415, 0.117667466, 0.089328438), vec3.read_vec3_le().unwrap());
		assert_eq!(Vec4::new(0.0155714415, 0.117667466, 0.089328438, -0.106262207), vec4.read_vec4_le().unwrap());
	}

	#[test]
	fn test_write_vecs() {
		let mut out = vec![];
		out.write_vec3_le(Vec3::new(0.0155714415, 0.117667466, 0.089328438)).unwrap();
		assert_eq!(&[0x5c, 0x1f, 0x7f, 0x3c, 0xa4, 0xfb, 0xf0, 0x3d, 0xd4, 0xf1, 0xb6, 0x3d][..], out.as_slice());
	}
}
