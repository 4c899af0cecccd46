use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::{
	Read,
	Write
};

use ultraviolet::mat::Mat4;

use rgk_core::{
	align_up,
	io_ext::{
		ReadBinExt,
		WriteBinExt
	}
};

use crate::{
	chunk::{
		find_chunk,
		ChunkHeader,
		Source,
		ID_SKIN,
		ID_STRUCT,
		ID_VERTEXFMT
	},
	d3d::{
		has_alpha,
		pack_compnorm,
		swap_red_blue,
		unpack_compnorm
	},
	engine::{
		Engine,
		EngineConfig
	},
	error::RwError,
	geometry::{
		find_min_vert,
		Geometry,
		GeometryFlags
	},
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
	plugin::{
		PluginHandle,
		PluginList,
		PluginStream
	},
	skin::{
		read_matrix,
		write_matrix,
		Skin,
		SkinSplit
	}
};

pub const PRIM_TRIANGLELIST: u32 = 5;
pub const PRIM_TRIANGLESTRIP: u32 = 6;

/// Xbox native data can't be streamed by older libraries
const MIN_VERSION: u32 = 0x35000;
/// Size of the resource header the index buffer offsets count from
const RESOURCE_HEADER: u32 = 0x18;
const BLOCK_HEADER: u32 = 0x24;
const MESH_RECORD_SIZE: u32 = 0x18;
const VERTEX_BUFFER_MARKER: u32 = 0xBADEAFFE;

const FMT_FLOAT3: u32 = 0x5;
const FMT_COMPNORM: u32 = 0x4;
const FMT_NORMALS: u32 = 0x40;
const FMT_TEX_FLOAT2: u32 = 0x500;
const FMT_COLOR: u32 = 0x1000000;
const FMT_TANGENTS: u32 = 0xE000000;
const MAX_TEX_SETS: usize = 4;

/// Vertex format code for the generic layout of a geometry
pub fn make_vertex_format(flags: GeometryFlags, num_tex_coords: usize) -> u32 {
	let mut fmt = FMT_FLOAT3;
	if flags.contains(GeometryFlags::NORMALS) {
		fmt |= FMT_NORMALS;
	}
	for i in 0..num_tex_coords.min(MAX_TEX_SETS) {
		fmt |= FMT_TEX_FLOAT2 << (i * 4);
	}
	if flags.contains(GeometryFlags::PRELIT) {
		fmt |= FMT_COLOR;
	}
	fmt
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Encoding {
	Float,
	CompNorm,
}

impl Encoding {
	fn from_selector(sel: u32) -> Result<Encoding, RwError> {
		match sel {
			FMT_FLOAT3 => Ok(Encoding::Float),
			FMT_COMPNORM => Ok(Encoding::CompNorm),
			_ => Err(RwError::malformed(format!("unsupported Xbox vertex element format {}", sel))),
		}
	}

	fn size(self, components: u32) -> u32 {
		match self {
			Encoding::Float => 4 * components,
			Encoding::CompNorm => 4,
		}
	}
}

/// Decoded vertex format code
#[derive(Clone, Copy, Debug, PartialEq)]
struct VertexFormat {
	position: Encoding,
	normal: Option<Encoding>,
	color: bool,
	num_tex: usize,
}

impl VertexFormat {
	fn parse(fmt: u32) -> Result<VertexFormat, RwError> {
		if fmt & FMT_TANGENTS != 0 {
			return Err(RwError::malformed(format!("Xbox vertex format {:#X} has tangents", fmt)));
		}
		let normal = match (fmt >> 4) & 0xF {
			0 => None,
			sel => Some(Encoding::from_selector(sel)?),
		};

		let mut num_tex = 0;
		while num_tex < MAX_TEX_SETS {
			match (fmt >> (num_tex * 4 + 8)) & 0xF {
				0 => break,
				FMT_FLOAT3 => num_tex += 1,
				sel => return Err(RwError::malformed(format!("unsupported Xbox texture coordinate format {}", sel))),
			}
		}

		Ok(VertexFormat {
			position: Encoding::from_selector(fmt & 0xF)?,
			normal: normal,
			color: fmt & FMT_COLOR != 0,
			num_tex: num_tex,
		})
	}

	fn stride(&self) -> u32 {
		self.position.size(3) + self.normal.map_or(0, |n| n.size(3)) + self.color as u32 * 4
			+ self.num_tex as u32 * 8
	}

	/// Whether the generic arrays hold everything the format stores
	fn fits(&self, geo: &Geometry) -> bool {
		(self.normal.is_none() || geo.has_normals())
			&& (!self.color || geo.is_prelit())
			&& self.num_tex <= geo.num_tex_coords
	}

	fn write_vertex(&self, out: &mut Vec<u8>, geo: &Geometry, v: usize) -> Result<(), RwError> {
		let mt = &geo.morph_targets[0];
		match self.position {
			Encoding::Float => out.write_vec3_le(mt.vertices[v])?,
			Encoding::CompNorm => out.write_u32::<LE>(pack_compnorm(mt.vertices[v]))?,
		}
		match self.normal {
			Some(Encoding::Float) => out.write_vec3_le(mt.normals[v])?,
			Some(Encoding::CompNorm) => out.write_u32::<LE>(pack_compnorm(mt.normals[v]))?,
			None => {},
		}
		if self.color {
			out.write_all(&swap_red_blue(geo.colors[v]))?;
		}
		for set in geo.tex_coords.iter().take(self.num_tex) {
			out.write_vec2_le(set[v])?;
		}
		Ok(())
	}

	fn read_vertex(&self, mut src: &[u8], geo: &mut Geometry, v: usize) -> Result<(), RwError> {
		let normals = geo.has_normals();
		let prelit = geo.is_prelit();
		let mt = &mut geo.morph_targets[0];
		mt.vertices[v] = match self.position {
			Encoding::Float => src.read_vec3_le()?,
			Encoding::CompNorm => unpack_compnorm(src.read_u32::<LE>()?),
		};
		let normal = match self.normal {
			Some(Encoding::Float) => Some(src.read_vec3_le()?),
			Some(Encoding::CompNorm) => Some(unpack_compnorm(src.read_u32::<LE>()?)),
			None => None,
		};
		if let (Some(n), true) = (normal, normals) {
			mt.normals[v] = n;
		}
		if self.color {
			let mut c = [0; 4];
			src.read_exact(&mut c)?;
			if prelit {
				geo.colors[v] = swap_red_blue(c);
			}
		}
		for set in geo.tex_coords.iter_mut().take(self.num_tex) {
			set[v] = src.read_vec2_le()?;
		}
		Ok(())
	}
}

struct VertexFormatStream {
	handle: PluginHandle<u32>,
}

impl PluginStream<Geometry> for VertexFormatStream {
	fn read(&self, buf: &mut dyn Source, _: &ChunkHeader, geo: &mut Geometry, _: &Engine) -> Result<(), RwError> {
		let fmt = buf.read_u32::<LE>()?;
		if let Some(slot) = geo.ext.get_mut(self.handle) {
			*slot = fmt;
		}
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, geo: &Geometry, _: &Engine) -> Result<(), RwError> {
		buf.write_u32::<LE>(geo.ext.get(self.handle).copied().unwrap_or(0))?;
		Ok(())
	}

	fn size(&self, _: &Geometry, engine: &Engine) -> Option<u32> {
		match engine.config.platform {
			Platform::Xbox => Some(4),
			_ => None,
		}
	}
}

pub fn register_vertex_format(geometries: &mut PluginList<Geometry>) -> PluginHandle<u32> {
	let handle = geometries.register::<u32>(ID_VERTEXFMT);
	geometries.register_stream(ID_VERTEXFMT, Box::new(VertexFormatStream { handle: handle }));
	handle
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshInstance {
	pub min_vert: u32,
	pub num_vertices: u32,
	pub num_indices: u32,
	pub material: u32,
	/// Into the shared vertex buffer
	pub indices: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceHeader {
	pub serial: u16,
	pub prim_type: u32,
	pub num_vertices: u32,
	pub stride: u32,
	pub vertex_alpha: bool,
	pub meshes: Vec<MeshInstance>,
	pub vertex_buffer: Vec<u8>,
}

impl InstanceHeader {
	/// Header, mesh records and 16 byte aligned index buffers
	fn block_size(&self) -> u32 {
		BLOCK_HEADER + self.meshes.len() as u32 * MESH_RECORD_SIZE + 0x10
			+ self.meshes.iter().map(|m| align_up(m.indices.len() * 2, 16) as u32).sum::<u32>()
	}

	/// Index buffer offsets, counted from the start of the resource header
	fn index_offsets(&self) -> Vec<u32> {
		let mut offset = align_up((RESOURCE_HEADER + BLOCK_HEADER + self.meshes.len() as u32 * MESH_RECORD_SIZE) as usize, 16);
		self.meshes.iter().map(|m| {
			let at = offset as u32;
			offset += align_up(m.indices.len() * 2, 16);
			at
		}).collect()
	}

	/// Reads the Struct of a Native Data chunk
	pub fn read(buf: &mut dyn Source) -> Result<InstanceHeader, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		let platform = buf.read_u32::<LE>()?;
		if platform != Platform::Xbox as u32 {
			return Err(RwError::malformed(format!("native data platform {} is not Xbox", platform)));
		}
		if header.version < MIN_VERSION {
			return Err(RwError::malformed(format!("Xbox native data in version {:#X}", header.version)));
		}

		let size = buf.read_i32::<LE>()?;
		if size < BLOCK_HEADER as i32 || 4 + size as u64 > header.length as u64 {
			return Err(RwError::malformed(format!("bad Xbox mesh block size {}", size)));
		}
		let mut block = vec![0; size as usize];
		block[..4].copy_from_slice(&size.to_le_bytes());
		buf.read_exact(&mut block[4..])?;

		let mut p = &block[4..];
		let serial = p.read_u16::<LE>()?;
		let num_meshes = p.read_u16::<LE>()?;
		let prim_type = p.read_u32::<LE>()?;
		let num_vertices = p.read_u32::<LE>()?;
		let stride = p.read_u32::<LE>()?;
		// vertex buffer pointer
		p.read_u32::<LE>()?;
		let vertex_alpha = p.read_u32::<LE>()? != 0;
		// begin and end pointers
		p.read_u64::<LE>()?;

		if BLOCK_HEADER as u64 + num_meshes as u64 * MESH_RECORD_SIZE as u64 > size as u64 {
			return Err(RwError::malformed(format!("{} meshes do not fit the Xbox mesh block", num_meshes)));
		}
		let mut meshes = Vec::with_capacity(num_meshes as usize);
		for _ in 0..num_meshes {
			let min_vert = p.read_u32::<LE>()?;
			let mesh_vertices = p.read_u32::<LE>()?;
			let num_indices = p.read_u32::<LE>()?;
			let offset = p.read_u32::<LE>()?;
			let material = p.read_u32::<LE>()?;
			// vertex shader
			p.read_u32::<LE>()?;

			let start = offset.checked_sub(RESOURCE_HEADER).map(|o| o as usize);
			let range = start.and_then(|s| block.get(s..s + num_indices as usize * 2))
				.ok_or_else(|| RwError::malformed("Xbox index buffer outside the mesh block"))?;
			let mut src = range;
			let indices = (0..num_indices).map(|_| src.read_u16::<LE>())
				.collect::<Result<Vec<_>, _>>()?;

			meshes.push(MeshInstance {
				min_vert: min_vert,
				num_vertices: mesh_vertices,
				num_indices: num_indices,
				material: material,
				indices: indices,
			});
		}

		if 4 + size as u64 + stride as u64 * num_vertices as u64 > header.length as u64 {
			return Err(RwError::malformed("Xbox vertex buffer overruns the native data"));
		}
		let mut vertex_buffer = vec![0; (stride * num_vertices) as usize];
		buf.read_exact(&mut vertex_buffer)?;

		Ok(InstanceHeader {
			serial: serial,
			prim_type: prim_type,
			num_vertices: num_vertices,
			stride: stride,
			vertex_alpha: vertex_alpha,
			meshes: meshes,
			vertex_buffer: vertex_buffer,
		})
	}

	pub fn write(&self, buf: &mut Vec<u8>, config: &EngineConfig) -> Result<(), RwError> {
		if config.version < MIN_VERSION {
			return Err(RwError::malformed(format!("can't write Xbox native data for version {:#X}", config.version)));
		}
		ChunkHeader::new(ID_STRUCT, self.stream_size() - ChunkHeader::SIZE, config).write(buf)?;
		buf.write_u32::<LE>(Platform::Xbox as u32)?;

		let size = self.block_size();
		let offsets = self.index_offsets();
		let mut block = Vec::with_capacity(size as usize);
		block.write_i32::<LE>(size as i32)?;
		block.write_u16::<LE>(self.serial)?;
		block.write_u16::<LE>(self.meshes.len() as u16)?;
		block.write_u32::<LE>(self.prim_type)?;
		block.write_u32::<LE>(self.num_vertices)?;
		block.write_u32::<LE>(self.stride)?;
		block.write_u32::<LE>(0)?;
		block.write_u32::<LE>(self.vertex_alpha as u32)?;
		block.write_u64::<LE>(0)?;
		for (mesh, &offset) in self.meshes.iter().zip(offsets.iter()) {
			block.write_u32::<LE>(mesh.min_vert)?;
			block.write_u32::<LE>(mesh.num_vertices)?;
			block.write_u32::<LE>(mesh.num_indices)?;
			block.write_u32::<LE>(offset)?;
			block.write_u32::<LE>(mesh.material)?;
			block.write_u32::<LE>(0)?;
		}

		block.resize(size as usize, 0);
		for (mesh, &offset) in self.meshes.iter().zip(offsets.iter()) {
			let start = (offset - RESOURCE_HEADER) as usize;
			let mut dst = &mut block[start..start + mesh.indices.len() * 2];
			for &i in mesh.indices.iter() {
				dst.write_u16::<LE>(i)?;
			}
		}

		buf.write_all(&block)?;
		buf.write_all(&self.vertex_buffer)?;
		Ok(())
	}

	pub fn stream_size(&self) -> u32 {
		ChunkHeader::SIZE + 4 + self.block_size() + self.vertex_buffer.len() as u32
	}
}

/// Xbox skins keep the influences in a second vertex buffer next to a
/// bone palette
#[derive(Clone, Debug, PartialEq)]
pub struct NativeSkin {
	/// Bone of each palette slot
	pub table1: [i32; 256],
	/// Palette slot of each bone
	pub table2: [i32; 256],
	pub num_used_bones: i32,
	pub stride: i32,
	pub vertex_buffer: Vec<u8>,
}

impl NativeSkin {
	fn build(skin: &Skin, num_vertices: usize) -> Result<NativeSkin, RwError> {
		if skin.indices.len() < num_vertices || skin.weights.len() < num_vertices {
			return Err(RwError::malformed(format!("skin arrays shorter than {} vertices", num_vertices)));
		}
		let num_weights = skin.num_weights.clamp(1, 4);

		let mut table1 = [-1; 256];
		let mut table2 = [0; 256];
		for (i, &bone) in skin.used_bones.iter().enumerate().take(256) {
			table1[i] = bone as i32;
			table2[bone as usize] = i as i32;
		}

		let stride = 3 * num_weights;
		let mut vertex_buffer = Vec::with_capacity(stride * num_vertices);
		for (w, idx) in skin.weights.iter().zip(skin.indices.iter()).take(num_vertices) {
			let mut bytes = [0u8; 4];
			let mut sum = 0;
			for k in 1..num_weights {
				let q = ((w[k] * 255.0).round() as i32).clamp(0, 255);
				bytes[k] = q as u8;
				sum += q;
			}
			// the first weight takes up what the others leave
			bytes[0] = (255 - sum).max(0) as u8;
			vertex_buffer.extend_from_slice(&bytes[..num_weights]);
			for k in 0..num_weights {
				vertex_buffer.write_u16::<LE>(3 * table2[idx[k] as usize] as u16)?;
			}
		}

		Ok(NativeSkin {
			table1: table1,
			table2: table2,
			num_used_bones: skin.used_bones.len().min(256) as i32,
			stride: stride as i32,
			vertex_buffer: vertex_buffer,
		})
	}

	/// Unpacks the influences into the generic arrays of `skin`
	fn restore(&self, skin: &mut Skin, num_vertices: usize) -> Result<(), RwError> {
		let num_weights = skin.num_weights;
		let stride = self.stride.max(0) as usize;
		if num_weights == 0 || num_weights > 4 || stride < 3 * num_weights
			|| self.vertex_buffer.len() < stride * num_vertices
			|| !(0..=256).contains(&self.num_used_bones)
		{
			return Err(RwError::malformed("Xbox skin does not match its geometry"));
		}

		let mut indices = vec![[0; 4]; num_vertices];
		let mut weights = vec![[0.0; 4]; num_vertices];
		for v in 0..num_vertices {
			let mut p = &self.vertex_buffer[v * stride..];
			for k in 0..num_weights {
				weights[v][k] = p.read_u8()? as f32 / 255.0;
			}
			for k in 0..num_weights {
				let slot = (p.read_u16::<LE>()? / 3) as usize;
				let bone = self.table1.get(slot)
					.ok_or_else(|| RwError::malformed(format!("Xbox skin palette slot {} out of range", slot)))?;
				indices[v][k] = *bone as u8;
			}
		}

		skin.used_bones = self.table1[..self.num_used_bones as usize].iter().map(|&b| b as u8).collect();
		skin.indices = indices;
		skin.weights = weights;
		skin.xbox = None;
		Ok(())
	}
}

pub fn read_native_skin(buf: &mut dyn Source, num_vertices: usize) -> Result<Skin, RwError> {
	let header = find_chunk(buf, ID_STRUCT)?;
	let platform = buf.read_u32::<LE>()?;
	if platform != Platform::Xbox as u32 {
		return Err(RwError::malformed(format!("native skin platform {} is not Xbox", platform)));
	}
	if header.version < MIN_VERSION {
		return Err(RwError::malformed(format!("Xbox native skin in version {:#X}", header.version)));
	}

	let num_bones = buf.read_i32::<LE>()?;
	if !(0..=256).contains(&num_bones) {
		return Err(RwError::malformed(format!("bad Xbox skin bone count {}", num_bones)));
	}
	let mut table1 = [0; 256];
	for t in table1.iter_mut() {
		*t = buf.read_i32::<LE>()?;
	}
	let mut table2 = [0; 256];
	for t in table2.iter_mut() {
		*t = buf.read_i32::<LE>()?;
	}
	let num_used_bones = buf.read_i32::<LE>()?;
	let num_weights = buf.read_i32::<LE>()?;
	// vertex buffer pointer
	buf.read_u32::<LE>()?;
	let stride = buf.read_i32::<LE>()?;
	if !(0..=256).contains(&num_used_bones) || !(0..=4).contains(&num_weights) || stride < 0 {
		return Err(RwError::malformed("bad Xbox skin counts"));
	}
	if 2072 + stride as u64 * num_vertices as u64 + num_bones as u64 * 64 > header.length as u64 {
		return Err(RwError::malformed("Xbox skin vertex buffer overruns its chunk"));
	}

	let mut vertex_buffer = vec![0; stride as usize * num_vertices];
	buf.read_exact(&mut vertex_buffer)?;
	let inverse_matrices = (0..num_bones).map(|_| read_matrix(buf))
		.collect::<Result<Vec<Mat4>, _>>()?;
	let split = SkinSplit::read(buf, num_bones as usize)?;

	Ok(Skin {
		num_bones: num_bones as usize,
		used_bones: table1[..num_used_bones as usize].iter().map(|&b| b as u8).collect(),
		num_weights: num_weights as usize,
		indices: vec![],
		weights: vec![],
		inverse_matrices: inverse_matrices,
		split: split,
		xbox: Some(NativeSkin {
			table1: table1,
			table2: table2,
			num_used_bones: num_used_bones,
			stride: stride,
			vertex_buffer: vertex_buffer,
		}),
	})
}

pub fn write_native_skin(buf: &mut Vec<u8>, skin: &Skin, config: &EngineConfig) -> Result<(), RwError> {
	let native = skin.xbox.as_ref()
		.ok_or_else(|| RwError::malformed("skin of Xbox geometry holds no native skin"))?;
	if config.version < MIN_VERSION {
		return Err(RwError::malformed(format!("can't write Xbox native skin for version {:#X}", config.version)));
	}

	ChunkHeader::new(ID_STRUCT, native_skin_size(skin) - ChunkHeader::SIZE, config).write(buf)?;
	buf.write_u32::<LE>(Platform::Xbox as u32)?;
	buf.write_i32::<LE>(skin.num_bones as i32)?;
	for &t in native.table1.iter().chain(native.table2.iter()) {
		buf.write_i32::<LE>(t)?;
	}
	buf.write_i32::<LE>(native.num_used_bones)?;
	buf.write_i32::<LE>(skin.num_weights as i32)?;
	buf.write_u32::<LE>(VERTEX_BUFFER_MARKER)?;
	buf.write_i32::<LE>(native.stride)?;
	buf.write_all(&native.vertex_buffer)?;
	for m in skin.inverse_matrices.iter() {
		write_matrix(buf, m)?;
	}
	skin.split.write(buf)
}

pub fn native_skin_size(skin: &Skin) -> u32 {
	let buffer = skin.xbox.as_ref().map_or(0, |n| n.vertex_buffer.len() as u32);
	ChunkHeader::SIZE + 8 + 2 * 256 * 4 + 4 * 4 + buffer + skin.inverse_matrices.len() as u32 * 64 + skin.split.size()
}

fn build_instance(geo: &Geometry, fmt: u32) -> Result<InstanceHeader, RwError> {
	let header = check_generic(geo)?;
	let format = VertexFormat::parse(fmt)?;
	if !format.fits(geo) {
		return Err(RwError::malformed(format!("Xbox vertex format {:#X} needs arrays the geometry lacks", fmt)));
	}

	let n = geo.num_vertices;
	let mut vertex_buffer = Vec::with_capacity(format.stride() as usize * n);
	for v in 0..n {
		format.write_vertex(&mut vertex_buffer, geo, v)?;
	}

	let meshes = header.meshes.iter().map(|mesh| {
		let (min_vert, num_vertices) = find_min_vert(&mesh.indices);
		MeshInstance {
			min_vert: min_vert,
			num_vertices: num_vertices,
			num_indices: mesh.num_indices,
			material: mesh.material as u32,
			indices: mesh.indices.clone(),
		}
	}).collect();

	Ok(InstanceHeader {
		serial: 0,
		prim_type: if header.is_tristrip() { PRIM_TRIANGLESTRIP } else { PRIM_TRIANGLELIST },
		num_vertices: n as u32,
		stride: format.stride(),
		vertex_alpha: format.color && has_alpha(&geo.colors[..n]),
		meshes: meshes,
		vertex_buffer: vertex_buffer,
	})
}

fn instance_geometry(geo: &mut Geometry, engine: &Engine, skinned: bool) -> Result<(), RwError> {
	let fmt_handle = engine.handles.vertex_format;
	let skin_handle = engine.handles.skin;

	let stored = geo.ext.get(fmt_handle).copied().unwrap_or(0);
	let fmt = match stored {
		0 => make_vertex_format(geo.flags, geo.num_tex_coords),
		fmt => fmt,
	};
	let inst = build_instance(geo, fmt)?;
	let native_skin = match geo.ext.get(skin_handle).and_then(Option::as_ref) {
		Some(skin) if skinned => Some(NativeSkin::build(skin, geo.num_vertices)?),
		_ => None,
	};

	if let Some(slot) = geo.ext.get_mut(fmt_handle) {
		*slot = fmt;
	}
	if let Some(native) = native_skin {
		if let Some(skin) = geo.ext.get_mut(skin_handle).and_then(Option::as_mut) {
			skin.num_weights = skin.num_weights.clamp(1, 4);
			skin.indices.clear();
			skin.weights.clear();
			skin.xbox = Some(native);
		}
	}
	commit_native(geo, InstanceData::Xbox(inst));
	Ok(())
}

fn uninstance_geometry(geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
	let inst = match geo.inst_data.as_ref() {
		Some(InstanceData::Xbox(inst)) => inst.clone(),
		_ => return Err(RwError::malformed("geometry holds no Xbox data")),
	};
	let fmt = geo.ext.get(engine.handles.vertex_format).copied().unwrap_or(0);
	if fmt == 0 {
		return Err(RwError::malformed("Xbox geometry without a vertex format"));
	}
	let format = VertexFormat::parse(fmt)?;

	let n = inst.num_vertices as usize;
	let num_meshes = geo.mesh_header.as_ref().map_or(0, |h| h.meshes.len());
	if num_meshes != inst.meshes.len()
		|| n > geo.num_vertices
		|| inst.stride < format.stride()
		|| inst.vertex_buffer.len() < inst.stride as usize * n
		|| inst.meshes.iter().any(|m| m.indices.iter().any(|&i| i as usize >= n))
	{
		return Err(RwError::malformed("Xbox native data does not match its geometry"));
	}

	// restore the skin first so a bad skin leaves the geometry native
	let skin_handle = engine.handles.skin;
	let num_vertices = geo.num_vertices;
	if let Some(skin) = geo.ext.get_mut(skin_handle).and_then(Option::as_mut) {
		if let Some(native) = skin.xbox.clone() {
			native.restore(skin, num_vertices)?;
		}
	}

	release_native(geo);
	for v in 0..n {
		let at = v * inst.stride as usize;
		format.read_vertex(&inst.vertex_buffer[at..], geo, v)?;
	}
	if let Some(header) = geo.mesh_header.as_mut() {
		for (mesh, m) in header.meshes.iter_mut().zip(inst.meshes.iter()) {
			mesh.indices = m.indices.clone();
			mesh.num_indices = m.indices.len() as u32;
		}
	}
	geo.generate_triangles(None);
	Ok(())
}

struct XboxPipeline {
	key: PipelineKey,
}

impl ObjPipeline for XboxPipeline {
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
		PipelineKey::default_for(Platform::Xbox),
		PipelineKey::skin_for(Platform::Xbox),
		PipelineKey::matfx_for(Platform::Xbox),
	].into_iter().map(|key| Box::new(XboxPipeline { key: key }) as Box<dyn ObjPipeline>).collect()
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use ultraviolet::vec::{
		Vec2,
		Vec3
	};

	use crate::{
		geometry::{
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
			geo.morph_targets[0].vertices[v] = Vec3::new(v as f32, 2.0, 0.5);
			geo.tex_coords[0][v] = Vec2::new(0.5, v as f32);
			geo.colors[v] = [1, 2, 3, 255];
		}
		// normals that survive packing unchanged
		geo.morph_targets[0].normals = vec![Vec3::unit_x(), -Vec3::unit_x(), Vec3::unit_y(), Vec3::zero()];
		geo.mesh_header = Some(MeshHeader {
			flags: MeshHeaderFlags::empty(),
			meshes: vec![Mesh {
				material: 0,
				num_indices: 6,
				indices: vec![0, 1, 2, 2, 1, 3],
			}],
		});
		geo.generate_triangles(None);
		geo
	}

	fn skinned(engine: &Engine) -> Geometry {
		let mut geo = geometry(engine);
		let mut skin = Skin::new(6, 4);
		skin.used_bones = vec![1, 4, 5];
		skin.num_weights = 2;
		skin.indices = vec![[1, 4, 0, 0], [4, 5, 0, 0], [5, 1, 0, 0], [1, 1, 0, 0]];
		skin.weights = vec![[0.6, 0.4, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0], [0.5, 0.5, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]];
		*geo.ext.get_mut(engine.handles.skin).unwrap() = Some(skin);
		geo
	}

	fn xbox_engine() -> Engine {
		let mut engine = Engine::default();
		engine.config.platform = Platform::Xbox;
		engine
	}

	#[test]
	fn test_vertex_format() {
		let fmt = make_vertex_format(GeometryFlags::NORMALS | GeometryFlags::PRELIT, 2);
		assert_eq!(0x1005545, fmt);
		let format = VertexFormat::parse(fmt).unwrap();
		assert_eq!(12 + 12 + 4 + 16, format.stride());
		assert!(VertexFormat::parse(0x5 | 0x200).is_err());
	}

	#[test]
	fn test_instance_and_stream() {
		let engine = xbox_engine();
		let mut geo = geometry(&engine);
		pipeline::instance(PipelineKey::default_for(Platform::Xbox), &mut geo, &engine).unwrap();
		assert_eq!(Some(&0x1000545), geo.ext.get(engine.handles.vertex_format));

		let inst = match geo.inst_data.as_ref() {
			Some(InstanceData::Xbox(inst)) => inst.clone(),
			other => panic!("unexpected native data {:?}", other),
		};
		assert_eq!(36, inst.stride);
		assert_eq!(PRIM_TRIANGLELIST, inst.prim_type);
		assert_eq!(0x24 + 0x18 + 0x10 + 16, inst.block_size());
		assert_eq!(vec![0x60], inst.index_offsets());

		let mut data = vec![];
		inst.write(&mut data, &engine.config).unwrap();
		assert_eq!(inst.stream_size() as usize, data.len());
		assert_eq!(inst, InstanceHeader::read(&mut Cursor::new(data)).unwrap());

		let mut file = vec![];
		geo.write(&mut file, &engine).unwrap();
		assert_eq!(geo, Geometry::read_chunk(&mut Cursor::new(file), &engine).unwrap());
	}

	#[test]
	fn test_old_version_rejected() {
		let mut engine = xbox_engine();
		let mut geo = geometry(&engine);
		pipeline::instance(PipelineKey::default_for(Platform::Xbox), &mut geo, &engine).unwrap();
		engine.config.version = 0x34003;
		let mut file = vec![];
		assert!(matches!(geo.write(&mut file, &engine), Err(RwError::Malformed(_))));
	}

	#[test]
	fn test_uninstance() {
		let engine = xbox_engine();
		let original = geometry(&engine);
		let mut geo = original.clone();
		let key = PipelineKey::default_for(Platform::Xbox);
		pipeline::instance(key, &mut geo, &engine).unwrap();
		pipeline::uninstance(key, &mut geo, &engine).unwrap();
		assert_eq!(original.morph_targets, geo.morph_targets);
		assert_eq!(original.colors, geo.colors);
		assert_eq!(original.triangles, geo.triangles);
	}

	#[test]
	fn test_native_skin() {
		let engine = xbox_engine();
		let mut geo = skinned(&engine);
		let key = PipelineKey::skin_for(Platform::Xbox);
		pipeline::instance(key, &mut geo, &engine).unwrap();

		let skin = geo.ext.get(engine.handles.skin).unwrap().as_ref().unwrap();
		assert!(skin.weights.is_empty());
		let native = skin.xbox.as_ref().unwrap();
		assert_eq!(6, native.stride);
		assert_eq!(2, native.table2[5]);
		// 0.4 quantizes to 102, leaving 153 for the first weight; bones 1 and 4 sit in slots 0 and 1
		assert_eq!(&[153, 102, 0, 0, 3, 0], &native.vertex_buffer[..6]);

		let mut file = vec![];
		geo.write(&mut file, &engine).unwrap();
		let read = Geometry::read_chunk(&mut Cursor::new(file), &engine).unwrap();
		assert_eq!(geo, read);

		let once = geo.clone();
		pipeline::uninstance(key, &mut geo, &engine).unwrap();
		let skin = geo.ext.get(engine.handles.skin).unwrap().as_ref().unwrap();
		assert_eq!(vec![1, 4, 5], skin.used_bones);
		assert_eq!([4, 5, 0, 0], skin.indices[1]);
		assert_eq!(102.0 / 255.0, skin.weights[0][1]);

		pipeline::instance(key, &mut geo, &engine).unwrap();
		assert_eq!(once, geo);
	}
}
