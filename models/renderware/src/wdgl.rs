use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::Write;

use ultraviolet::{
	mat::Mat4,
	vec::{
		Vec2,
		Vec3
	}
};

use crate::{
	chunk::{
		check_remaining,
		find_chunk,
		ChunkHeader,
		Source,
		ID_SKIN,
		ID_STRUCT
	},
	engine::{
		Engine,
		EngineConfig
	},
	error::RwError,
	geometry::Geometry,
	native::{
		check_generic,
		commit_native,
		release_native,
		InstanceData
	},
	pipeline::{
		ObjPipeline,
		PipelineKey
	},
	platform::Platform,
	skin::{
		read_matrix,
		write_matrix,
		Skin,
		SkinSplit
	}
};

const ATTRIB_POSITION: u32 = 0;
const ATTRIB_TEXCOORD: u32 = 1;
const ATTRIB_NORMAL: u32 = 2;
const ATTRIB_COLOR: u32 = 3;
const ATTRIB_WEIGHTS: u32 = 4;
const ATTRIB_INDICES: u32 = 5;

/// Fixed point scale of texture coordinates stored as shorts
const TEXCOORD_SCALE: f32 = 512.0;
const MAX_ATTRIBS: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum AttribType {
	Float = 0,
	Byte = 1,
	UByte = 2,
	Short = 3,
	UShort = 4,
}

impl AttribType {
	pub fn from_u32(v: u32) -> Option<AttribType> {
		match v {
			0 => Some(AttribType::Float),
			1 => Some(AttribType::Byte),
			2 => Some(AttribType::UByte),
			3 => Some(AttribType::Short),
			4 => Some(AttribType::UShort),
			_ => None,
		}
	}

	pub fn size(self) -> u32 {
		match self {
			AttribType::Float => 4,
			AttribType::Byte | AttribType::UByte => 1,
			AttribType::Short | AttribType::UShort => 2,
		}
	}

	/// Range normalized values are mapped onto
	fn unit(self) -> f32 {
		match self {
			AttribType::Float => 1.0,
			AttribType::Byte => 127.0,
			AttribType::UByte => 255.0,
			AttribType::Short => 32767.0,
			AttribType::UShort => 65535.0,
		}
	}

	fn bounds(self) -> (f32, f32) {
		match self {
			AttribType::Float => (f32::MIN, f32::MAX),
			AttribType::Byte => (-128.0, 127.0),
			AttribType::UByte => (0.0, 255.0),
			AttribType::Short => (-32768.0, 32767.0),
			AttribType::UShort => (0.0, 65535.0),
		}
	}
}

/// Arguments of one vertex attribute pointer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttribDesc {
	pub index: u32,
	pub kind: AttribType,
	pub normalized: bool,
	pub size: u32,
	pub stride: u32,
	pub offset: u32,
}

impl AttribDesc {
	pub const SIZE: u32 = 24;

	fn new(index: u32, kind: AttribType, normalized: bool, size: u32) -> AttribDesc {
		AttribDesc {
			index: index,
			kind: kind,
			normalized: normalized,
			size: size,
			stride: 0,
			offset: 0,
		}
	}

	/// Bytes taken by the attribute inside a vertex
	pub fn byte_size(&self) -> u32 {
		self.size * self.kind.size()
	}

	pub fn read<R>(buf: &mut R) -> Result<AttribDesc, RwError>
	where
		R: ReadBytesExt + ?Sized,
	{
		let index = buf.read_u32::<LE>()?;
		let kind = buf.read_u32::<LE>()?;
		let kind = AttribType::from_u32(kind)
			.ok_or_else(|| RwError::malformed(format!("unknown attribute type {}", kind)))?;

		Ok(AttribDesc {
			index: index,
			kind: kind,
			normalized: buf.read_u32::<LE>()? != 0,
			size: buf.read_u32::<LE>()?,
			stride: buf.read_u32::<LE>()?,
			offset: buf.read_u32::<LE>()?,
		})
	}

	pub fn write<W>(&self, buf: &mut W) -> Result<(), RwError>
	where
		W: WriteBytesExt + ?Sized,
	{
		buf.write_u32::<LE>(self.index)?;
		buf.write_u32::<LE>(self.kind as u32)?;
		buf.write_u32::<LE>(self.normalized as u32)?;
		buf.write_u32::<LE>(self.size)?;
		buf.write_u32::<LE>(self.stride)?;
		buf.write_u32::<LE>(self.offset)?;
		Ok(())
	}

	fn pack(&self, dst: &mut [u8], src: &[f32], scale: f32) {
		let mut dst = dst;
		let (min, max) = self.kind.bounds();
		for &x in src.iter().take(self.size as usize) {
			let v = match (self.kind, self.normalized) {
				(AttribType::Float, _) => x,
				(kind, true) => (x * kind.unit()).round().clamp(min, max),
				(_, false) => (x * scale).round().clamp(min, max),
			};
			// writes into a slice sized by byte_size can't fail
			let _ = match self.kind {
				AttribType::Float => dst.write_f32::<LE>(v),
				AttribType::Byte => dst.write_i8(v as i8),
				AttribType::UByte => dst.write_u8(v as u8),
				AttribType::Short => dst.write_i16::<LE>(v as i16),
				AttribType::UShort => dst.write_u16::<LE>(v as u16),
			};
		}
	}

	fn unpack(&self, src: &[u8], scale: f32) -> Result<[f32; 4], RwError> {
		let mut src = src;
		let mut out = [0.0; 4];
		for o in out.iter_mut().take(self.size as usize) {
			let v = match self.kind {
				AttribType::Float => src.read_f32::<LE>()?,
				AttribType::Byte => src.read_i8()? as f32,
				AttribType::UByte => src.read_u8()? as f32,
				AttribType::Short => src.read_i16::<LE>()? as f32,
				AttribType::UShort => src.read_u16::<LE>()? as f32,
			};
			*o = match (self.kind, self.normalized) {
				(AttribType::Float, _) => v,
				(kind, true) => v / kind.unit(),
				(_, false) => v / scale,
			};
		}
		Ok(out)
	}
}

/// Attribute layout and interleaved vertex data ready for upload
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceHeader {
	pub attribs: Vec<AttribDesc>,
	pub data: Vec<u8>,
}

impl InstanceHeader {
	/// Reads a Native Data body. The chunk length can't be trusted, so the
	/// data size comes from the stride and the vertex count.
	pub fn read(buf: &mut dyn Source, geo: &Geometry) -> Result<InstanceHeader, RwError> {
		let num_attribs = buf.read_u32::<LE>()?;
		if num_attribs == 0 || num_attribs > MAX_ATTRIBS {
			return Err(RwError::malformed(format!("bad attribute count {}", num_attribs)));
		}
		let attribs = (0..num_attribs).map(|_| AttribDesc::read(buf))
			.collect::<Result<Vec<_>, _>>()?;

		check_remaining(buf, geo.num_vertices as u64, attribs[0].stride as u64, "vertices")?;
		let mut data = vec![0; attribs[0].stride as usize * geo.num_vertices];
		buf.read_exact(&mut data)?;

		Ok(InstanceHeader {
			attribs: attribs,
			data: data,
		})
	}

	pub fn write(&self, buf: &mut Vec<u8>) -> Result<(), RwError> {
		buf.write_u32::<LE>(self.attribs.len() as u32)?;
		for a in self.attribs.iter() {
			a.write(buf)?;
		}
		buf.write_all(&self.data)?;
		Ok(())
	}

	pub fn stream_size(&self) -> u32 {
		4 + self.attribs.len() as u32 * AttribDesc::SIZE + self.data.len() as u32
	}

	pub fn stride(&self) -> u32 {
		self.attribs.first().map_or(0, |a| a.stride)
	}
}

/// Attribute list for a geometry, with offsets and the shared stride filled in
fn build_attribs(geo: &Geometry, skinned: bool) -> Vec<AttribDesc> {
	let mut attribs = vec![AttribDesc::new(ATTRIB_POSITION, AttribType::Float, false, 3)];
	// only the first set
	if geo.num_tex_coords > 0 {
		attribs.push(AttribDesc::new(ATTRIB_TEXCOORD, AttribType::Short, false, 2));
	}
	if geo.has_normals() {
		attribs.push(AttribDesc::new(ATTRIB_NORMAL, AttribType::Byte, true, 3));
	}
	if geo.is_prelit() {
		attribs.push(AttribDesc::new(ATTRIB_COLOR, AttribType::UByte, true, 4));
	}
	if skinned {
		attribs.push(AttribDesc::new(ATTRIB_WEIGHTS, AttribType::UByte, true, 4));
		attribs.push(AttribDesc::new(ATTRIB_INDICES, AttribType::UByte, false, 4));
	}

	let mut offset = 0;
	for a in attribs.iter_mut() {
		a.offset = offset;
		// keep every attribute 4 byte aligned
		offset += (a.byte_size() + 3) & !3;
	}
	for a in attribs.iter_mut() {
		a.stride = offset;
	}
	attribs
}

fn instance_geometry(geo: &mut Geometry, engine: &Engine, skinned: bool) -> Result<(), RwError> {
	check_generic(geo)?;
	let handle = engine.handles.skin;
	let n = geo.num_vertices;

	let skin = match geo.ext.get(handle).and_then(Option::as_ref) {
		Some(skin) if skinned => {
			if skin.indices.len() < n || skin.weights.len() < n {
				return Err(RwError::malformed(format!("skin arrays shorter than {} vertices", n)));
			}
			Some(skin)
		},
		_ => None,
	};

	let attribs = build_attribs(geo, skin.is_some());
	let stride = attribs[0].stride as usize;
	let mut data = vec![0; stride * n];
	let mt = &geo.morph_targets[0];
	for (v, vertex) in data.chunks_exact_mut(stride).enumerate() {
		for a in attribs.iter() {
			let dst = &mut vertex[a.offset as usize..(a.offset + a.byte_size()) as usize];
			match a.index {
				ATTRIB_POSITION => {
					let p = mt.vertices[v];
					a.pack(dst, &[p.x, p.y, p.z], 1.0);
				},
				ATTRIB_TEXCOORD => {
					let t = geo.tex_coords[0][v];
					a.pack(dst, &[t.x, t.y], TEXCOORD_SCALE);
				},
				ATTRIB_NORMAL => {
					let nrm = mt.normals[v];
					a.pack(dst, &[nrm.x, nrm.y, nrm.z], 1.0);
				},
				ATTRIB_COLOR => {
					let c = geo.colors[v].map(|x| x as f32 / 255.0);
					a.pack(dst, &c, 1.0);
				},
				ATTRIB_WEIGHTS => {
					if let Some(skin) = skin {
						a.pack(dst, &skin.weights[v], 1.0);
					}
				},
				ATTRIB_INDICES => {
					if let Some(skin) = skin {
						dst.copy_from_slice(&skin.indices[v]);
					}
				},
				_ => {},
			}
		}
	}

	let has_skin = skin.is_some();
	commit_native(geo, InstanceData::Ogl(InstanceHeader {
		attribs: attribs,
		data: data,
	}));

	// the native skin only streams the bind matrices
	if has_skin {
		if let Some(skin) = geo.ext.get_mut(handle).and_then(Option::as_mut) {
			skin.used_bones.clear();
			skin.num_weights = 0;
			skin.indices.clear();
			skin.weights.clear();
			skin.split = SkinSplit::default();
		}
	}
	Ok(())
}

fn uninstance_geometry(geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
	let inst = match geo.inst_data.as_ref() {
		Some(InstanceData::Ogl(inst)) => inst.clone(),
		_ => return Err(RwError::malformed("geometry holds no OpenGL data")),
	};

	let n = geo.num_vertices;
	let stride = inst.stride();
	if inst.data.len() < stride as usize * n
		|| inst.attribs.iter().any(|a| a.size > 4 || a.offset + a.byte_size() > stride)
	{
		return Err(RwError::malformed("attribute layout does not fit the vertex data"));
	}

	release_native(geo);
	let handle = engine.handles.skin;
	let mut indices = vec![[0; 4]; n];
	let mut weights = vec![[0.0; 4]; n];
	let normals = geo.has_normals();
	let prelit = geo.is_prelit();
	let textured = !geo.tex_coords.is_empty();

	for (v, vertex) in inst.data.chunks_exact(stride as usize).take(n).enumerate() {
		for a in inst.attribs.iter() {
			let src = &vertex[a.offset as usize..];
			match a.index {
				ATTRIB_POSITION => {
					let [x, y, z, _] = a.unpack(src, 1.0)?;
					geo.morph_targets[0].vertices[v] = Vec3::new(x, y, z);
				},
				ATTRIB_TEXCOORD if textured => {
					let [x, y, _, _] = a.unpack(src, TEXCOORD_SCALE)?;
					geo.tex_coords[0][v] = Vec2::new(x, y);
				},
				ATTRIB_NORMAL if normals => {
					let [x, y, z, _] = a.unpack(src, 1.0)?;
					geo.morph_targets[0].normals[v] = Vec3::new(x, y, z);
				},
				ATTRIB_COLOR if prelit => {
					let c = a.unpack(src, 1.0)?;
					geo.colors[v] = c.map(|x| (x * 255.0).round().clamp(0.0, 255.0) as u8);
				},
				ATTRIB_WEIGHTS => weights[v] = a.unpack(src, 1.0)?,
				ATTRIB_INDICES => {
					let idx = a.unpack(src, 1.0)?;
					indices[v] = idx.map(|x| x as u8);
				},
				_ => {},
			}
		}
	}

	if let Some(skin) = geo.ext.get_mut(handle).and_then(Option::as_mut) {
		skin.indices = indices;
		skin.weights = weights;
		skin.find_num_weights();
		skin.find_used_bones();
	}
	geo.generate_triangles(None);
	Ok(())
}

pub fn read_native_skin(buf: &mut dyn Source) -> Result<Skin, RwError> {
	find_chunk(buf, ID_STRUCT)?;
	let platform = buf.read_u32::<LE>()?;
	if platform != Platform::Ogl as u32 {
		return Err(RwError::malformed(format!("native skin platform {} is not OpenGL", platform)));
	}
	let num_bones = buf.read_i32::<LE>()?;
	if !(0..=256).contains(&num_bones) {
		return Err(RwError::malformed(format!("bad skin bone count {}", num_bones)));
	}

	let mut skin = Skin::new(num_bones as usize, 0);
	skin.inverse_matrices = (0..num_bones).map(|_| read_matrix(buf))
		.collect::<Result<Vec<Mat4>, _>>()?;
	Ok(skin)
}

pub fn write_native_skin(buf: &mut Vec<u8>, skin: &Skin, config: &EngineConfig) -> Result<(), RwError> {
	ChunkHeader::new(ID_STRUCT, native_skin_size(skin) - ChunkHeader::SIZE, config).write(buf)?;
	buf.write_u32::<LE>(Platform::Ogl as u32)?;
	buf.write_i32::<LE>(skin.inverse_matrices.len() as i32)?;
	for m in skin.inverse_matrices.iter() {
		write_matrix(buf, m)?;
	}
	Ok(())
}

pub fn native_skin_size(skin: &Skin) -> u32 {
	ChunkHeader::SIZE + 4 + 4 + skin.inverse_matrices.len() as u32 * 64
}

struct WdglPipeline {
	key: PipelineKey,
}

impl ObjPipeline for WdglPipeline {
	fn key(&self) -> PipelineKey {
		self.key
	}

	fn instance(&self, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
		instance_geometry(geo, engine, self.key.plugin_id == ID_SKIN)
	}

	fn uninstance(&self, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
		uninstance_geometry(geo, engine)
	}
}

pub fn pipelines() -> Vec<Box<dyn ObjPipeline>> {
	[
		PipelineKey::default_for(Platform::Ogl),
		PipelineKey::skin_for(Platform::Ogl),
		PipelineKey::matfx_for(Platform::Ogl),
	].into_iter().map(|key| Box::new(WdglPipeline { key: key }) as Box<dyn ObjPipeline>).collect()
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use crate::{
		geometry::{
			GeometryFlags,
			Mesh,
			MeshHeader,
			MeshHeaderFlags
		},
		material::Material,
		pipeline
	};

	use super::*;

	fn geometry(engine: &Engine) -> Geometry {
		let mut geo = Geometry::new(engine, 4, 0,
			GeometryFlags::POSITIONS | GeometryFlags::NORMALS | GeometryFlags::PRELIT | GeometryFlags::TEXTURED);
		geo.materials.push(Material::new(engine));
		for v in 0..4 {
			geo.morph_targets[0].vertices[v] = Vec3::new(v as f32 * 0.25, -1.5, 3.0);
			geo.tex_coords[0][v] = Vec2::new(v as f32 / 512.0, 1.5);
			geo.colors[v] = [v as u8 * 60, 128, 7, 255];
		}
		geo.morph_targets[0].normals = vec![Vec3::unit_z(), -Vec3::unit_z(), Vec3::unit_y(), Vec3::unit_x()];
		geo.mesh_header = Some(MeshHeader {
			flags: MeshHeaderFlags::TRISTRIP,
			meshes: vec![Mesh {
				material: 0,
				num_indices: 4,
				indices: vec![0, 1, 2, 3],
			}],
		});
		geo.flags.insert(GeometryFlags::TRISTRIP);
		geo.generate_triangles(None);
		geo
	}

	fn skinned(engine: &Engine) -> Geometry {
		let mut geo = geometry(engine);
		let mut skin = Skin::new(3, 4);
		skin.indices = vec![[0, 2, 0, 0], [1, 0, 0, 0], [2, 1, 0, 0], [0, 0, 0, 0]];
		skin.weights = vec![[0.6, 0.4, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0], [0.2, 0.8, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]];
		skin.num_weights = 2;
		skin.used_bones = vec![0, 1, 2];
		*geo.ext.get_mut(engine.handles.skin).unwrap() = Some(skin);
		geo
	}

	#[test]
	fn test_attribute_layout() {
		let engine = Engine::default();
		let geo = geometry(&engine);
		let attribs = build_attribs(&geo, false);
		let offsets: Vec<u32> = attribs.iter().map(|a| a.offset).collect();
		assert_eq!(vec![0, 12, 16, 20], offsets);
		assert!(attribs.iter().all(|a| a.stride == 24));
		assert_eq!(32, build_attribs(&geo, true)[0].stride);
	}

	#[test]
	fn test_instance_packing() {
		let engine = Engine::default();
		let mut geo = geometry(&engine);
		pipeline::instance(PipelineKey::default_for(Platform::Ogl), &mut geo, &engine).unwrap();
		// mesh indices stay with the geometry on this platform
		assert_eq!(4, geo.mesh_header.as_ref().unwrap().meshes[0].indices.len());

		let inst = match geo.inst_data.as_ref() {
			Some(InstanceData::Ogl(inst)) => inst.clone(),
			other => panic!("unexpected native data {:?}", other),
		};
		let v1 = &inst.data[24..48];
		// u = 1/512 as a fixed point short, v = 1.5 * 512
		assert_eq!(&[1, 0, 0, 3], &v1[12..16]);
		assert_eq!(&[0, 0, 0x81, 0], &v1[16..20]);
		assert_eq!(&[60, 128, 7, 255], &v1[20..24]);
	}

	#[test]
	fn test_native_data_stream() {
		let engine = Engine::default();
		let mut geo = geometry(&engine);
		pipeline::instance(PipelineKey::default_for(Platform::Ogl), &mut geo, &engine).unwrap();

		let mut file = vec![];
		geo.write(&mut file, &engine).unwrap();
		let read = Geometry::read_chunk(&mut Cursor::new(file), &engine).unwrap();
		assert_eq!(geo, read);
	}

	#[test]
	fn test_vertex_data_beyond_stream() {
		let engine = Engine::default();
		let mut geo = geometry(&engine);
		pipeline::instance(PipelineKey::default_for(Platform::Ogl), &mut geo, &engine).unwrap();
		let inst = match geo.inst_data.as_ref() {
			Some(InstanceData::Ogl(inst)) => inst.clone(),
			other => panic!("unexpected native data {:?}", other),
		};
		let mut data = vec![];
		inst.write(&mut data).unwrap();

		let read = InstanceHeader::read(&mut Cursor::new(data.clone()), &geo).unwrap();
		assert_eq!(inst, read);

		geo.num_vertices = 0x7FFF_FFFF;
		let result = InstanceHeader::read(&mut Cursor::new(data), &geo);
		assert!(matches!(result, Err(RwError::Malformed(_))));
	}

	#[test]
	fn test_uninstance() {
		let engine = Engine::default();
		let original = geometry(&engine);
		let mut geo = original.clone();
		let key = PipelineKey::default_for(Platform::Ogl);
		pipeline::instance(key, &mut geo, &engine).unwrap();
		pipeline::uninstance(key, &mut geo, &engine).unwrap();
		assert_eq!(original, geo);
	}

	#[test]
	fn test_skin() {
		let engine = Engine::default();
		let mut geo = skinned(&engine);
		let key = PipelineKey::skin_for(Platform::Ogl);
		pipeline::instance(key, &mut geo, &engine).unwrap();
		let skin = geo.ext.get(engine.handles.skin).unwrap().as_ref().unwrap();
		assert!(skin.used_bones.is_empty());
		assert_eq!(20 + 3 * 64, native_skin_size(skin));

		let mut file = vec![];
		geo.write(&mut file, &engine).unwrap();
		assert_eq!(geo, Geometry::read_chunk(&mut Cursor::new(file), &engine).unwrap());

		let once = geo.clone();
		pipeline::uninstance(key, &mut geo, &engine).unwrap();
		let skin = geo.ext.get(engine.handles.skin).unwrap().as_ref().unwrap();
		assert_eq!(vec![0, 1, 2], skin.used_bones);
		assert_eq!(2, skin.num_weights);
		assert_eq!([2, 1, 0, 0], skin.indices[2]);
		assert_eq!(153.0 / 255.0, skin.weights[0][0]);

		pipeline::instance(key, &mut geo, &engine).unwrap();
		assert_eq!(once, geo);
	}

	#[test]
	fn test_bad_attribute_type() {
		let mut data = vec![];
		data.extend_from_slice(&1u32.to_le_bytes());
		for v in [0u32, 7, 0, 3, 12, 0] {
			data.extend_from_slice(&v.to_le_bytes());
		}
		assert!(AttribDesc::read(&mut Cursor::new(&data[4..])).is_err());
	}
}
