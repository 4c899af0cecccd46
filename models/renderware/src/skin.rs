use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::Read;

use ultraviolet::{
	mat::Mat4,
	vec::Vec4
};

use rgk_core::io_ext::{
	ReadBinExt,
	WriteBinExt
};

use crate::{
	atomic::Atomic,
	chunk::{
		check_remaining,
		ChunkHeader,
		Source,
		ID_SKIN
	},
	d3d::xbox,
	engine::{
		Engine,
		EngineConfig
	},
	error::RwError,
	geometry::Geometry,
	pipeline::PipelineKey,
	platform::Platform,
	plugin::{
		PluginHandle,
		PluginList,
		PluginStream
	},
	ps2,
	wdgl
};

const OLD_BONE_MARKER: u32 = 0xDEADDEAD;

/// Mesh split tables used by hardware with a limited bone palette. Kept
/// verbatim.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkinSplit {
	pub bone_limit: i32,
	pub num_meshes: i32,
	pub rle_size: i32,
	/// Remap indices, RLE counts and RLE entries
	pub data: Vec<u8>,
}

impl SkinSplit {
	pub(crate) fn read(buf: &mut dyn Source, num_bones: usize) -> Result<SkinSplit, RwError> {
		let bone_limit = buf.read_i32::<LE>()?;
		let num_meshes = buf.read_i32::<LE>()?;
		let rle_size = buf.read_i32::<LE>()?;
		if num_meshes < 0 || rle_size < 0 {
			return Err(RwError::malformed(format!("bad skin split counts {} {}", num_meshes, rle_size)));
		}

		let mut data = vec![];
		if num_meshes != 0 {
			let size = num_bones as u64 + 2 * (num_meshes as u64 + rle_size as u64);
			check_remaining(buf, size, 1, "skin split bytes")?;
			data = vec![0; size as usize];
			buf.read_exact(&mut data)?;
		}

		Ok(SkinSplit {
			bone_limit: bone_limit,
			num_meshes: num_meshes,
			rle_size: rle_size,
			data: data,
		})
	}

	pub(crate) fn write<W>(&self, buf: &mut W) -> Result<(), RwError>
	where
		W: WriteBytesExt + ?Sized,
	{
		buf.write_i32::<LE>(self.bone_limit)?;
		buf.write_i32::<LE>(self.num_meshes)?;
		buf.write_i32::<LE>(self.rle_size)?;
		buf.write_all(&self.data)?;
		Ok(())
	}

	pub fn size(&self) -> u32 {
		12 + self.data.len() as u32
	}
}

pub(crate) fn read_matrix<R>(buf: &mut R) -> std::io::Result<Mat4>
where
	R: Read + ?Sized,
{
	Ok(Mat4::new(buf.read_vec4_le()?, buf.read_vec4_le()?, buf.read_vec4_le()?, buf.read_vec4_le()?))
}

pub(crate) fn write_matrix<W>(buf: &mut W, m: &Mat4) -> std::io::Result<()>
where
	W: WriteBytesExt + ?Sized,
{
	for &col in m.cols.iter() {
		buf.write_vec4_le(col)?;
	}
	Ok(())
}

/// Per-vertex bone influences of a geometry
#[derive(Clone, Debug, PartialEq)]
pub struct Skin {
	pub num_bones: usize,
	pub used_bones: Vec<u8>,
	/// Influences per vertex actually in use, 1 to 4
	pub num_weights: usize,
	pub indices: Vec<[u8; 4]>,
	pub weights: Vec<[f32; 4]>,
	pub inverse_matrices: Vec<Mat4>,
	pub split: SkinSplit,
	/// Bone tables and vertex buffer of Xbox native skins
	pub xbox: Option<xbox::NativeSkin>,
}

impl Skin {
	pub fn new(num_bones: usize, num_vertices: usize) -> Skin {
		Skin {
			num_bones: num_bones,
			used_bones: vec![],
			num_weights: 0,
			indices: vec![[0; 4]; num_vertices],
			weights: vec![[0.0; 4]; num_vertices],
			inverse_matrices: vec![Mat4::identity(); num_bones],
			split: SkinSplit::default(),
			xbox: None,
		}
	}

	/// Counts the weight slots in use, stopping at the first zero slot of each vertex
	pub fn find_num_weights(&mut self) {
		self.num_weights = 1;
		for w in self.weights.iter() {
			while w[self.num_weights] != 0.0 {
				self.num_weights += 1;
				if self.num_weights == 4 {
					return;
				}
			}
		}
	}

	/// Collects the bones with a non-zero influence, in ascending order
	pub fn find_used_bones(&mut self) {
		let mut used = [false; 256];
		for (idx, w) in self.indices.iter().zip(self.weights.iter()) {
			for k in 0..self.num_weights.min(4) {
				if w[k] != 0.0 {
					used[idx[k] as usize] = true;
				}
			}
		}
		self.used_bones = (0..=255u8).filter(|&b| used[b as usize]).collect();
	}

	/// Reads the platform independent skin of a generic geometry
	pub fn read_generic(buf: &mut dyn Source, header: &ChunkHeader, num_vertices: usize) -> Result<Skin, RwError> {
		let mut counts = [0; 4];
		buf.read_exact(&mut counts)?;
		let num_bones = counts[0] as usize;
		// streams before 3.4 have neither used bones nor a weight count
		let old_format = counts[1] == 0;

		if 4 + num_vertices as u64 * 20 + num_bones as u64 * 64 > header.length as u64 {
			return Err(RwError::malformed(format!("skin of {} vertices does not fit its chunk", num_vertices)));
		}

		let mut used_bones = vec![];
		if !old_format {
			used_bones = vec![0; counts[1] as usize];
			buf.read_exact(&mut used_bones)?;
		}

		let mut indices = Vec::with_capacity(num_vertices);
		for _ in 0..num_vertices {
			let mut idx = [0; 4];
			buf.read_exact(&mut idx)?;
			indices.push(idx);
		}
		let mut weights = Vec::with_capacity(num_vertices);
		for _ in 0..num_vertices {
			let w = buf.read_vec4_le()?;
			weights.push([w.x, w.y, w.z, w.w]);
		}

		let mut inverse_matrices = Vec::with_capacity(num_bones);
		for _ in 0..num_bones {
			if old_format {
				buf.read_u32::<LE>()?;
			}
			inverse_matrices.push(read_matrix(buf)?);
		}

		let split = match old_format {
			true => SkinSplit::default(),
			false => SkinSplit::read(buf, num_bones)?,
		};

		let mut skin = Skin {
			num_bones: num_bones,
			used_bones: used_bones,
			num_weights: counts[2] as usize,
			indices: indices,
			weights: weights,
			inverse_matrices: inverse_matrices,
			split: split,
			xbox: None,
		};
		if old_format {
			skin.find_num_weights();
			skin.find_used_bones();
		}
		Ok(skin)
	}

	pub fn write_generic<W>(&self, buf: &mut W, config: &EngineConfig) -> Result<(), RwError>
	where
		W: WriteBytesExt + ?Sized,
	{
		let old_format = config.version < 0x34000;
		match old_format {
			true => buf.write_all(&[self.num_bones as u8, 0, 0, 0])?,
			false => {
				buf.write_all(&[self.num_bones as u8, self.used_bones.len() as u8, self.num_weights as u8, 0])?;
				buf.write_all(&self.used_bones)?;
			},
		}

		for idx in self.indices.iter() {
			buf.write_all(idx)?;
		}
		for w in self.weights.iter() {
			buf.write_vec4_le(Vec4::new(w[0], w[1], w[2], w[3]))?;
		}
		for m in self.inverse_matrices.iter() {
			if old_format {
				buf.write_u32::<LE>(OLD_BONE_MARKER)?;
			}
			write_matrix(buf, m)?;
		}

		if !old_format {
			self.split.write(buf)?;
		}
		Ok(())
	}

	pub fn generic_size(&self, config: &EngineConfig) -> u32 {
		let mut size = 4 + self.indices.len() as u32 * 4 + self.weights.len() as u32 * 16
			+ self.inverse_matrices.len() as u32 * 64;
		if config.version < 0x34000 {
			size += self.inverse_matrices.len() as u32 * 4;
		} else {
			size += self.used_bones.len() as u32 + self.split.size();
		}
		size
	}
}

/// Platforms whose native geometry streams its own skin layout. The D3D
/// platforms keep the generic one.
fn native_skin_platform(geo: &Geometry) -> Option<Platform> {
	match geo.native_platform() {
		Some(Platform::D3D8) | Some(Platform::D3D9) | None => None,
		p => p,
	}
}

struct SkinStream {
	handle: PluginHandle<Option<Skin>>,
}

impl PluginStream<Geometry> for SkinStream {
	fn read(&self, buf: &mut dyn Source, header: &ChunkHeader, geo: &mut Geometry, _: &Engine) -> Result<(), RwError> {
		let skin = match native_skin_platform(geo) {
			Some(Platform::Ps2) => ps2::skin::read_native_skin(buf)?,
			Some(Platform::Ogl) => wdgl::read_native_skin(buf)?,
			Some(Platform::Xbox) => xbox::read_native_skin(buf, geo.num_vertices)?,
			Some(p) => return Err(RwError::UnsupportedPlatform(p)),
			None => Skin::read_generic(buf, header, geo.num_vertices)?,
		};
		if let Some(slot) = geo.ext.get_mut(self.handle) {
			*slot = Some(skin);
		}
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, geo: &Geometry, engine: &Engine) -> Result<(), RwError> {
		let skin = match geo.ext.get(self.handle).and_then(Option::as_ref) {
			Some(skin) => skin,
			None => return Ok(()),
		};
		let config = &engine.config;
		match native_skin_platform(geo) {
			Some(Platform::Ps2) => ps2::skin::write_native_skin(buf, skin, config),
			Some(Platform::Ogl) => wdgl::write_native_skin(buf, skin, config),
			Some(Platform::Xbox) => xbox::write_native_skin(buf, skin, config),
			Some(p) => Err(RwError::UnsupportedPlatform(p)),
			None => skin.write_generic(buf, config),
		}
	}

	fn size(&self, geo: &Geometry, engine: &Engine) -> Option<u32> {
		let skin = geo.ext.get(self.handle)?.as_ref()?;
		let config = &engine.config;
		match native_skin_platform(geo) {
			Some(Platform::Ps2) => Some(ps2::skin::native_skin_size(skin, config)),
			Some(Platform::Ogl) => Some(wdgl::native_skin_size(skin)),
			Some(Platform::Xbox) => Some(xbox::native_skin_size(skin)),
			Some(_) => None,
			None => Some(skin.generic_size(config)),
		}
	}
}

/// Selects the skin pipeline of the current platform for atomics that
/// stream a Right To Render record of the skin plugin
fn skin_rights(atomic: &mut Atomic, _: u32, engine: &Engine) {
	atomic.pipeline = Some(PipelineKey::skin_for(engine.config.platform));
}

pub fn register_skin(geometries: &mut PluginList<Geometry>, atomics: &mut PluginList<Atomic>)
	-> PluginHandle<Option<Skin>>
{
	let handle = geometries.register::<Option<Skin>>(ID_SKIN);
	geometries.register_stream(ID_SKIN, Box::new(SkinStream { handle: handle }));
	atomics.set_rights_callback(ID_SKIN, skin_rights);
	handle
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use crate::chunk::find_chunk;

	use super::*;

	fn sample_skin() -> Skin {
		let mut skin = Skin::new(3, 3);
		skin.indices = vec![[0, 1, 0, 0], [2, 0, 0, 0], [1, 2, 0, 0]];
		skin.weights = vec![[0.75, 0.25, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0], [0.5, 0.5, 0.0, 0.0]];
		skin.num_weights = 2;
		skin.used_bones = vec![0, 1, 2];
		skin.inverse_matrices[1] = Mat4::from_translation(ultraviolet::vec::Vec3::new(0.0, -1.0, 0.0));
		skin
	}

	fn skin_chunk(skin: &Skin, config: &EngineConfig) -> Vec<u8> {
		let mut body = vec![];
		skin.write_generic(&mut body, config).unwrap();
		assert_eq!(skin.generic_size(config) as usize, body.len());

		let mut data = vec![];
		ChunkHeader::new(ID_SKIN, body.len() as u32, config).write(&mut data).unwrap();
		data.extend_from_slice(&body);
		data
	}

	#[test]
	fn test_generic_skin() {
		let config = EngineConfig::default();
		let skin = sample_skin();
		let mut cursor = Cursor::new(skin_chunk(&skin, &config));
		let header = find_chunk(&mut cursor, ID_SKIN).unwrap();
		assert_eq!(skin, Skin::read_generic(&mut cursor, &header, 3).unwrap());
	}

	#[test]
	fn test_old_format_recovers_counts() {
		let mut config = EngineConfig::default();
		config.version = 0x33002;
		let skin = sample_skin();
		let data = skin_chunk(&skin, &config);
		// bone markers instead of used bones and split data
		assert_eq!(12 + 4 + 3 * 20 + 3 * 68, data.len());

		let mut cursor = Cursor::new(data);
		let header = find_chunk(&mut cursor, ID_SKIN).unwrap();
		let read = Skin::read_generic(&mut cursor, &header, 3).unwrap();
		assert_eq!(2, read.num_weights);
		assert_eq!(vec![0, 1, 2], read.used_bones);
		assert_eq!(skin.inverse_matrices, read.inverse_matrices);
	}

	#[test]
	fn test_find_used_bones_ignores_zero_weights() {
		let mut skin = Skin::new(8, 2);
		skin.indices = vec![[7, 3, 5, 0], [3, 6, 0, 0]];
		skin.weights = vec![[0.5, 0.5, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]];
		skin.find_num_weights();
		skin.find_used_bones();
		assert_eq!(2, skin.num_weights);
		assert_eq!(vec![3, 7], skin.used_bones);
	}

	#[test]
	fn test_split_data() {
		let mut split = SkinSplit {
			bone_limit: 20,
			num_meshes: 1,
			rle_size: 2,
			data: vec![],
		};
		split.data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9];
		let mut data = vec![];
		split.write(&mut data).unwrap();
		assert_eq!(split.size() as usize, data.len());
		assert_eq!(split, SkinSplit::read(&mut Cursor::new(data), 3).unwrap());
	}

	#[test]
	fn test_split_beyond_stream() {
		let mut data = vec![];
		for &v in [20, 1, 0x7FFF_FFFF].iter() {
			data.write_i32::<LE>(v).unwrap();
		}
		data.extend_from_slice(&[0; 16]);
		let result = SkinSplit::read(&mut Cursor::new(data), 3);
		assert!(matches!(result, Err(RwError::Malformed(_))));
	}

	#[test]
	fn test_skin_rights_select_platform_pipeline() {
		let mut engine = Engine::default();
		engine.config.platform = Platform::Ps2;
		let mut atomic = Atomic::new(&engine, 0, 0);
		engine.atomic_plugins.assert_rights(&mut atomic, ID_SKIN, 1, &engine);
		assert_eq!(Some(PipelineKey::skin_for(Platform::Ps2)), atomic.pipeline);
	}
}
