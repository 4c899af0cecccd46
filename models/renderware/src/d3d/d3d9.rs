use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::{
	Read,
	Write
};

use ultraviolet::vec::Vec4;

use rgk_core::io_ext::{
	ReadBinExt,
	WriteBinExt
};

use crate::{
	chunk::{
		find_chunk,
		ChunkHeader,
		Source,
		ID_SKIN,
		ID_STRUCT
	},
	d3d::{
		d3d8::{
			PRIM_TRIANGLELIST,
			PRIM_TRIANGLESTRIP
		},
		has_alpha,
		swap_red_blue
	},
	engine::{
		Engine,
		EngineConfig
	},
	error::RwError,
	geometry::{
		find_min_vert,
		Geometry
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
	skin::Skin
};

pub const DECL_FLOAT2: u8 = 1;
pub const DECL_FLOAT3: u8 = 2;
pub const DECL_FLOAT4: u8 = 3;
pub const DECL_D3DCOLOR: u8 = 4;
pub const DECL_UBYTE4: u8 = 5;
pub const DECL_UNUSED: u8 = 17;

pub const USAGE_POSITION: u8 = 0;
pub const USAGE_BLENDWEIGHT: u8 = 1;
pub const USAGE_BLENDINDICES: u8 = 2;
pub const USAGE_NORMAL: u8 = 3;
pub const USAGE_TEXCOORD: u8 = 5;
pub const USAGE_COLOR: u8 = 10;

const STREAM_POSITIONS: u16 = 0x2;
const STREAM_NORMALS: u16 = 0x4;
const STREAM_PRELIT: u16 = 0x8;
const STREAM_TEXTURED: u16 = 0x10;

const MAX_TEX_SETS: usize = 8;
const MESH_RECORD_SIZE: u32 = 36;
/// Marks a stream that is followed by its vertex data
const BUFFER_MARKER: u32 = 0xBADEAFFE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexElement {
	pub stream: u16,
	pub offset: u16,
	pub kind: u8,
	pub method: u8,
	pub usage: u8,
	pub usage_index: u8,
}

impl VertexElement {
	pub const END: VertexElement = VertexElement {
		stream: 0xFF,
		offset: 0,
		kind: DECL_UNUSED,
		method: 0,
		usage: 0,
		usage_index: 0,
	};

	fn new(offset: u16, kind: u8, usage: u8, usage_index: u8) -> VertexElement {
		VertexElement {
			stream: 0,
			offset: offset,
			kind: kind,
			method: 0,
			usage: usage,
			usage_index: usage_index,
		}
	}

	fn size(&self) -> u16 {
		match self.kind {
			DECL_FLOAT2 => 8,
			DECL_FLOAT3 => 12,
			DECL_FLOAT4 => 16,
			DECL_D3DCOLOR | DECL_UBYTE4 => 4,
			_ => 0,
		}
	}

	fn read<R>(buf: &mut R) -> Result<VertexElement, RwError>
	where
		R: ReadBytesExt + ?Sized,
	{
		Ok(VertexElement {
			stream: buf.read_u16::<LE>()?,
			offset: buf.read_u16::<LE>()?,
			kind: buf.read_u8()?,
			method: buf.read_u8()?,
			usage: buf.read_u8()?,
			usage_index: buf.read_u8()?,
		})
	}

	fn write<W>(&self, buf: &mut W) -> std::io::Result<()>
	where
		W: WriteBytesExt + ?Sized,
	{
		buf.write_u16::<LE>(self.stream)?;
		buf.write_u16::<LE>(self.offset)?;
		buf.write_u8(self.kind)?;
		buf.write_u8(self.method)?;
		buf.write_u8(self.usage)?;
		buf.write_u8(self.usage_index)
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexStream {
	pub offset: u32,
	pub stride: u32,
	pub geometry_flags: u16,
	pub managed: bool,
	pub dynamic_lock: bool,
	/// `None` for an unused stream
	pub data: Option<Vec<u8>>,
}

impl VertexStream {
	fn read_header<R>(buf: &mut R) -> Result<(bool, VertexStream), RwError>
	where
		R: ReadBytesExt + ?Sized,
	{
		let has_buffer = buf.read_u32::<LE>()? != 0;
		// the offset is not kept in the stream
		buf.read_u32::<LE>()?;
		let stream = VertexStream {
			offset: 0,
			stride: buf.read_u32::<LE>()?,
			geometry_flags: buf.read_u16::<LE>()?,
			managed: buf.read_u8()? != 0,
			dynamic_lock: buf.read_u8()? != 0,
			data: None,
		};
		Ok((has_buffer, stream))
	}

	fn write<W>(&self, buf: &mut W) -> std::io::Result<()>
	where
		W: WriteBytesExt + ?Sized,
	{
		buf.write_u32::<LE>(if self.data.is_some() { BUFFER_MARKER } else { 0 })?;
		buf.write_u32::<LE>(self.offset)?;
		buf.write_u32::<LE>(self.stride)?;
		buf.write_u16::<LE>(self.geometry_flags)?;
		buf.write_u8(self.managed as u8)?;
		buf.write_u8(self.dynamic_lock as u8)?;
		if let Some(data) = self.data.as_ref() {
			buf.write_all(data)?;
		}
		Ok(())
	}

	fn size(&self) -> u32 {
		16 + self.data.as_ref().map_or(0, |d| d.len() as u32)
	}
}

/// One mesh drawn from a range of the shared index buffer
#[derive(Clone, Debug, PartialEq)]
pub struct MeshInstance {
	pub num_index: u32,
	pub min_vert: u32,
	pub material: u32,
	pub vertex_alpha: bool,
	pub base_index: u32,
	pub num_vertices: u32,
	pub start_index: u32,
	pub num_primitives: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceHeader {
	pub serial: u32,
	pub prim_type: u32,
	pub use_offsets: bool,
	pub total_num_vertex: u32,
	pub meshes: Vec<MeshInstance>,
	/// Including the terminating element
	pub declaration: Vec<VertexElement>,
	/// Each mesh's indices are relative to its `min_vert`
	pub indices: Vec<u16>,
	pub streams: [VertexStream; 2],
}

impl InstanceHeader {
	/// Reads the Struct of a Native Data chunk
	pub fn read(buf: &mut dyn Source) -> Result<InstanceHeader, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		let platform = buf.read_u32::<LE>()?;
		if platform != Platform::D3D9 as u32 {
			return Err(RwError::malformed(format!("native data platform {} is not D3D9", platform)));
		}

		let size = buf.read_i32::<LE>()?;
		if size < 64 || 8 + size as u64 > header.length as u64 {
			return Err(RwError::malformed(format!("bad D3D9 mesh block size {}", size)));
		}
		let mut block = vec![0; size as usize];
		buf.read_exact(&mut block)?;

		let mut p = &block[..];
		let serial = p.read_u32::<LE>()?;
		let num_meshes = p.read_u32::<LE>()?;
		// index buffer pointer
		p.read_u32::<LE>()?;
		let prim_type = p.read_u32::<LE>()?;
		// vertex streams, repeated in full after the indices
		let mut skipped = [0; 32];
		p.read_exact(&mut skipped)?;
		let use_offsets = p.read_u32::<LE>()? != 0;
		// vertex declaration pointer
		p.read_u32::<LE>()?;
		let total_num_index = p.read_u32::<LE>()?;
		let total_num_vertex = p.read_u32::<LE>()?;

		if 64 + num_meshes as u64 * MESH_RECORD_SIZE as u64 > size as u64 {
			return Err(RwError::malformed(format!("{} meshes do not fit the D3D9 mesh block", num_meshes)));
		}
		let mut meshes = Vec::with_capacity(num_meshes as usize);
		for _ in 0..num_meshes {
			let num_index = p.read_u32::<LE>()?;
			let min_vert = p.read_u32::<LE>()?;
			let material = p.read_u32::<LE>()?;
			let vertex_alpha = p.read_u32::<LE>()? != 0;
			// vertex shader pointer
			p.read_u32::<LE>()?;
			meshes.push(MeshInstance {
				num_index: num_index,
				min_vert: min_vert,
				material: material,
				vertex_alpha: vertex_alpha,
				base_index: p.read_u32::<LE>()?,
				num_vertices: p.read_u32::<LE>()?,
				start_index: p.read_u32::<LE>()?,
				num_primitives: p.read_u32::<LE>()?,
			});
		}

		let mut used = 8 + size as u64 + 4;
		let num_elements = buf.read_u32::<LE>()?;
		used += num_elements as u64 * 8 + total_num_index as u64 * 2;
		if used > header.length as u64 {
			return Err(RwError::malformed("D3D9 declaration and indices overrun the native data"));
		}
		let declaration = (0..num_elements).map(|_| VertexElement::read(buf))
			.collect::<Result<Vec<_>, _>>()?;
		let indices = (0..total_num_index).map(|_| buf.read_u16::<LE>())
			.collect::<Result<Vec<_>, _>>()?;

		let mut streams = [VertexStream::default(), VertexStream::default()];
		for s in streams.iter_mut() {
			let (has_buffer, mut stream) = VertexStream::read_header(buf)?;
			used += 16;
			if has_buffer {
				used += stream.stride as u64 * total_num_vertex as u64;
				if used > header.length as u64 {
					return Err(RwError::malformed("D3D9 vertex stream overruns the native data"));
				}
				let mut data = vec![0; (stream.stride * total_num_vertex) as usize];
				buf.read_exact(&mut data)?;
				stream.data = Some(data);
			}
			*s = stream;
		}

		Ok(InstanceHeader {
			serial: serial,
			prim_type: prim_type,
			use_offsets: use_offsets,
			total_num_vertex: total_num_vertex,
			meshes: meshes,
			declaration: declaration,
			indices: indices,
			streams: streams,
		})
	}

	pub fn write(&self, buf: &mut Vec<u8>, config: &EngineConfig) -> Result<(), RwError> {
		ChunkHeader::new(ID_STRUCT, self.stream_size() - ChunkHeader::SIZE, config).write(buf)?;
		buf.write_u32::<LE>(Platform::D3D9 as u32)?;
		buf.write_i32::<LE>((64 + self.meshes.len() as u32 * MESH_RECORD_SIZE) as i32)?;

		buf.write_u32::<LE>(self.serial)?;
		buf.write_u32::<LE>(self.meshes.len() as u32)?;
		buf.write_u32::<LE>(0)?;
		buf.write_u32::<LE>(self.prim_type)?;
		buf.write_all(&[0; 32])?;
		buf.write_u32::<LE>(self.use_offsets as u32)?;
		buf.write_u32::<LE>(0)?;
		buf.write_u32::<LE>(self.indices.len() as u32)?;
		buf.write_u32::<LE>(self.total_num_vertex)?;
		for mesh in self.meshes.iter() {
			buf.write_u32::<LE>(mesh.num_index)?;
			buf.write_u32::<LE>(mesh.min_vert)?;
			buf.write_u32::<LE>(mesh.material)?;
			buf.write_u32::<LE>(mesh.vertex_alpha as u32)?;
			buf.write_u32::<LE>(0)?;
			buf.write_u32::<LE>(mesh.base_index)?;
			buf.write_u32::<LE>(mesh.num_vertices)?;
			buf.write_u32::<LE>(mesh.start_index)?;
			buf.write_u32::<LE>(mesh.num_primitives)?;
		}

		buf.write_u32::<LE>(self.declaration.len() as u32)?;
		for e in self.declaration.iter() {
			e.write(buf)?;
		}
		for &i in self.indices.iter() {
			buf.write_u16::<LE>(i)?;
		}
		for s in self.streams.iter() {
			s.write(buf)?;
		}
		Ok(())
	}

	pub fn stream_size(&self) -> u32 {
		ChunkHeader::SIZE + 4 + 4 + 64 + self.meshes.len() as u32 * MESH_RECORD_SIZE
			+ 4 + self.declaration.len() as u32 * 8
			+ self.indices.len() as u32 * 2
			+ self.streams.iter().map(VertexStream::size).sum::<u32>()
	}
}

fn find_skin<'a>(geo: &'a Geometry, engine: &Engine, skinned: bool) -> Option<&'a Skin> {
	if !skinned {
		return None;
	}
	geo.ext.get(engine.handles.skin).and_then(Option::as_ref)
}

/// Declaration of the single vertex stream and the geometry flags it
/// covers
fn build_declaration(geo: &Geometry, skinned: bool) -> (Vec<VertexElement>, u16, u16) {
	let mut decl = vec![VertexElement::new(0, DECL_FLOAT3, USAGE_POSITION, 0)];
	let mut flags = STREAM_POSITIONS;
	let mut offset = 12;

	if geo.is_prelit() {
		decl.push(VertexElement::new(offset, DECL_D3DCOLOR, USAGE_COLOR, 0));
		flags |= STREAM_PRELIT;
		offset += 4;
	}
	for n in 0..geo.num_tex_coords.min(MAX_TEX_SETS) {
		decl.push(VertexElement::new(offset, DECL_FLOAT2, USAGE_TEXCOORD, n as u8));
		flags |= STREAM_TEXTURED << n;
		offset += 8;
	}
	if geo.has_normals() {
		decl.push(VertexElement::new(offset, DECL_FLOAT3, USAGE_NORMAL, 0));
		flags |= STREAM_NORMALS;
		offset += 12;
	}
	if skinned {
		decl.push(VertexElement::new(offset, DECL_FLOAT4, USAGE_BLENDWEIGHT, 0));
		offset += 16;
		decl.push(VertexElement::new(offset, DECL_UBYTE4, USAGE_BLENDINDICES, 0));
		offset += 4;
	}
	decl.push(VertexElement::END);
	(decl, offset, flags)
}

fn write_vertex(out: &mut Vec<u8>, decl: &[VertexElement], geo: &Geometry, skin: Option<&Skin>, v: usize)
	-> Result<(), RwError>
{
	let mt = &geo.morph_targets[0];
	for e in decl.iter().filter(|e| e.stream == 0) {
		match e.usage {
			USAGE_POSITION => out.write_vec3_le(mt.vertices[v])?,
			USAGE_COLOR => out.write_all(&swap_red_blue(geo.colors[v]))?,
			USAGE_TEXCOORD => out.write_vec2_le(geo.tex_coords[e.usage_index as usize][v])?,
			USAGE_NORMAL => out.write_vec3_le(mt.normals[v])?,
			USAGE_BLENDWEIGHT => if let Some(skin) = skin {
				let w = skin.weights[v];
				out.write_vec4_le(Vec4::new(w[0], w[1], w[2], w[3]))?;
			},
			USAGE_BLENDINDICES => if let Some(skin) = skin {
				out.write_all(&skin.indices[v])?;
			},
			_ => {},
		}
	}
	Ok(())
}

fn read_vertex(src: &[u8], decl: &[VertexElement], geo: &mut Geometry, mut skin: Option<&mut Skin>, v: usize)
	-> Result<(), RwError>
{
	let num_tex = geo.num_tex_coords;
	for e in decl.iter().filter(|e| e.stream == 0) {
		let mut p = &src[e.offset as usize..];
		match (e.usage, e.kind) {
			(USAGE_POSITION, DECL_FLOAT3) => geo.morph_targets[0].vertices[v] = p.read_vec3_le()?,
			(USAGE_NORMAL, DECL_FLOAT3) if geo.has_normals() => geo.morph_targets[0].normals[v] = p.read_vec3_le()?,
			(USAGE_COLOR, DECL_D3DCOLOR) if geo.is_prelit() => {
				let mut c = [0; 4];
				p.read_exact(&mut c)?;
				geo.colors[v] = swap_red_blue(c);
			},
			(USAGE_TEXCOORD, DECL_FLOAT2) if (e.usage_index as usize) < num_tex => {
				geo.tex_coords[e.usage_index as usize][v] = p.read_vec2_le()?;
			},
			(USAGE_BLENDWEIGHT, DECL_FLOAT4) => if let Some(skin) = skin.as_deref_mut() {
				let w = p.read_vec4_le()?;
				skin.weights[v] = [w.x, w.y, w.z, w.w];
			},
			(USAGE_BLENDINDICES, DECL_UBYTE4) => if let Some(skin) = skin.as_deref_mut() {
				p.read_exact(&mut skin.indices[v])?;
			},
			_ => {},
		}
	}
	Ok(())
}

fn instance_geometry(geo: &mut Geometry, engine: &Engine, skinned: bool) -> Result<(), RwError> {
	let header = check_generic(geo)?;
	let n = geo.num_vertices;
	let skin = find_skin(geo, engine, skinned);
	if let Some(skin) = skin {
		if skin.weights.len() < n || skin.indices.len() < n {
			return Err(RwError::malformed(format!("skin arrays shorter than {} vertices", n)));
		}
	}

	let (declaration, stride, geometry_flags) = build_declaration(geo, skin.is_some());
	let mut vertices = Vec::with_capacity(stride as usize * n);
	for v in 0..n {
		write_vertex(&mut vertices, &declaration, geo, skin, v)?;
	}

	let strip = header.is_tristrip();
	let mut meshes = Vec::with_capacity(header.meshes.len());
	let mut indices = Vec::with_capacity(header.total_indices() as usize);
	for mesh in header.meshes.iter() {
		let (min_vert, num_vertices) = find_min_vert(&mesh.indices);
		let range = min_vert as usize..(min_vert + num_vertices) as usize;
		meshes.push(MeshInstance {
			num_index: mesh.num_indices,
			min_vert: min_vert,
			material: mesh.material as u32,
			vertex_alpha: geo.is_prelit() && has_alpha(&geo.colors[range]),
			base_index: min_vert,
			num_vertices: num_vertices,
			start_index: indices.len() as u32,
			num_primitives: match strip {
				true => mesh.num_indices.saturating_sub(2),
				false => mesh.num_indices / 3,
			},
		});
		indices.extend(mesh.indices.iter().map(|&i| i - min_vert as u16));
	}

	let data = InstanceHeader {
		serial: 0,
		prim_type: if strip { PRIM_TRIANGLESTRIP } else { PRIM_TRIANGLELIST },
		use_offsets: false,
		total_num_vertex: n as u32,
		meshes: meshes,
		declaration: declaration,
		indices: indices,
		streams: [
			VertexStream {
				offset: 0,
				stride: stride as u32,
				geometry_flags: geometry_flags,
				managed: true,
				dynamic_lock: false,
				data: Some(vertices),
			},
			VertexStream::default(),
		],
	};
	commit_native(geo, InstanceData::D3D9(data));
	Ok(())
}

fn validate(geo: &Geometry, inst: &InstanceHeader) -> Result<(), RwError> {
	let num_meshes = geo.mesh_header.as_ref().map_or(0, |h| h.meshes.len());
	if num_meshes != inst.meshes.len() {
		return Err(RwError::malformed(format!("{} D3D9 meshes for {} mesh records", inst.meshes.len(), num_meshes)));
	}

	let stream = &inst.streams[0];
	let total = inst.total_num_vertex as usize;
	let data_len = stream.data.as_ref().map_or(0, Vec::len);
	if total > geo.num_vertices || data_len < stream.stride as usize * total {
		return Err(RwError::malformed("D3D9 vertex stream does not match its geometry"));
	}
	if inst.declaration.iter()
		.filter(|e| e.stream == 0)
		.any(|e| e.offset as u32 + e.size() as u32 > stream.stride)
	{
		return Err(RwError::malformed("D3D9 vertex element outside the vertex stride"));
	}

	for mesh in inst.meshes.iter() {
		let start = mesh.start_index as usize;
		let run = inst.indices.get(start..start + mesh.num_index as usize)
			.ok_or_else(|| RwError::malformed("D3D9 mesh indices outside the index buffer"))?;
		if run.iter().any(|&i| mesh.min_vert as u64 + i as u64 >= total.min(0x10000) as u64) {
			return Err(RwError::malformed("D3D9 index outside the vertex stream"));
		}
	}
	Ok(())
}

fn uninstance_geometry(geo: &mut Geometry, engine: &Engine, skinned: bool) -> Result<(), RwError> {
	let inst = match geo.inst_data.as_ref() {
		Some(InstanceData::D3D9(inst)) => inst.clone(),
		_ => return Err(RwError::malformed("geometry holds no D3D9 data")),
	};
	validate(geo, &inst)?;

	let n = inst.total_num_vertex as usize;
	let handle = engine.handles.skin;
	let has_skin = skinned && geo.ext.get(handle).map_or(false, Option::is_some);

	release_native(geo);
	let mut skin = match has_skin {
		true => geo.ext.get_mut(handle).and_then(Option::take),
		false => None,
	};
	if let Some(skin) = skin.as_mut() {
		skin.indices.resize(geo.num_vertices, [0; 4]);
		skin.weights.resize(geo.num_vertices, [0.0; 4]);
	}

	let stream = &inst.streams[0];
	if let Some(data) = stream.data.as_ref() {
		for v in 0..n {
			let at = v * stream.stride as usize;
			read_vertex(&data[at..], &inst.declaration, geo, skin.as_mut(), v)?;
		}
	}
	if let Some(skin) = skin {
		if let Some(slot) = geo.ext.get_mut(handle) {
			*slot = Some(skin);
		}
	}

	if let Some(header) = geo.mesh_header.as_mut() {
		for (mesh, m) in header.meshes.iter_mut().zip(inst.meshes.iter()) {
			let start = m.start_index as usize;
			mesh.indices = inst.indices[start..start + m.num_index as usize].iter()
				.map(|&i| i + m.min_vert as u16)
				.collect();
			mesh.num_indices = m.num_index;
		}
	}
	geo.generate_triangles(None);
	Ok(())
}

struct D3D9Pipeline {
	key: PipelineKey,
}

impl D3D9Pipeline {
	fn skinned(&self) -> bool {
		self.key.plugin_id == ID_SKIN
	}
}

impl ObjPipeline for D3D9Pipeline {
	fn key(&self) -> PipelineKey {
		self.key
	}

	fn instance(&self, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
		instance_geometry(geo, engine, self.skinned())
	}

	fn uninstance(&self, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
		uninstance_geometry(geo, engine, self.skinned())
	}
}

/// The skin pipeline adds blend weights and indices to the vertex stream.
/// Material effects use the default layout.
pub fn pipelines() -> Vec<Box<dyn ObjPipeline>> {
	[
		PipelineKey::default_for(Platform::D3D9),
		PipelineKey::skin_for(Platform::D3D9),
		PipelineKey::matfx_for(Platform::D3D9),
	].into_iter().map(|key| Box::new(D3D9Pipeline { key: key }) as Box<dyn ObjPipeline>).collect()
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
			GeometryFlags,
			Mesh,
			MeshHeader,
			MeshHeaderFlags
		},
		material::Material,
		pipeline
	};

	use super::*;

	fn strip_geometry(engine: &Engine) -> Geometry {
		let mut geo = Geometry::new(engine, 5, 0,
			GeometryFlags::POSITIONS | GeometryFlags::TRISTRIP | GeometryFlags::PRELIT | GeometryFlags::TEXTURED);
		geo.materials.push(Material::new(engine));
		geo.materials.push(Material::new(engine));
		for v in 0..5 {
			geo.morph_targets[0].vertices[v] = Vec3::new(v as f32, 0.5 * v as f32, 0.0);
			geo.colors[v] = [255, 128, v as u8, 255];
			geo.tex_coords[0][v] = Vec2::new(0.0, v as f32);
		}
		geo.mesh_header = Some(MeshHeader {
			flags: MeshHeaderFlags::TRISTRIP,
			meshes: vec![
				Mesh {
					material: 0,
					num_indices: 4,
					indices: vec![0, 1, 2, 3],
				},
				Mesh {
					material: 1,
					num_indices: 3,
					indices: vec![2, 3, 4],
				},
			],
		});
		geo.generate_triangles(None);
		geo
	}

	fn native_data(geo: &Geometry) -> &InstanceHeader {
		match geo.inst_data.as_ref() {
			Some(InstanceData::D3D9(inst)) => inst,
			other => panic!("unexpected native data {:?}", other),
		}
	}

	#[test]
	fn test_shared_stream_layout() {
		let engine = Engine::default();
		let mut geo = strip_geometry(&engine);
		pipeline::instance(PipelineKey::default_for(Platform::D3D9), &mut geo, &engine).unwrap();

		let inst = native_data(&geo);
		assert_eq!(PRIM_TRIANGLESTRIP, inst.prim_type);
		assert_eq!(vec![0, 1, 2, 3, 0, 1, 2], inst.indices);
		assert_eq!(4, inst.meshes[1].start_index);
		assert_eq!(2, inst.meshes[1].min_vert);
		assert_eq!(1, inst.meshes[1].num_primitives);
		assert_eq!(2, inst.meshes[0].num_primitives);

		let usages: Vec<u8> = inst.declaration.iter().map(|e| e.usage).collect();
		assert_eq!(vec![USAGE_POSITION, USAGE_COLOR, USAGE_TEXCOORD, 0], usages);
		assert_eq!(Some(&VertexElement::END), inst.declaration.last());
		assert_eq!(24, inst.streams[0].stride);
		assert_eq!(STREAM_POSITIONS | STREAM_PRELIT | STREAM_TEXTURED, inst.streams[0].geometry_flags);
		assert_eq!(Some(5 * 24), inst.streams[0].data.as_ref().map(Vec::len));
		assert_eq!(None, inst.streams[1].data);
	}

	#[test]
	fn test_native_data_stream() {
		let engine = Engine::default();
		let mut geo = strip_geometry(&engine);
		pipeline::instance(PipelineKey::default_for(Platform::D3D9), &mut geo, &engine).unwrap();
		let inst = native_data(&geo);

		let mut data = vec![];
		inst.write(&mut data, &engine.config).unwrap();
		assert_eq!(inst.stream_size() as usize, data.len());
		assert_eq!(inst, &InstanceHeader::read(&mut Cursor::new(data)).unwrap());
	}

	#[test]
	fn test_uninstance_strip() {
		let engine = Engine::default();
		let original = strip_geometry(&engine);
		let mut geo = original.clone();
		let key = PipelineKey::default_for(Platform::D3D9);
		pipeline::instance(key, &mut geo, &engine).unwrap();
		pipeline::uninstance(key, &mut geo, &engine).unwrap();

		assert_eq!(original.morph_targets, geo.morph_targets);
		assert_eq!(original.colors, geo.colors);
		assert_eq!(original.tex_coords, geo.tex_coords);
		assert_eq!(original.mesh_header, geo.mesh_header);
		assert_eq!(original.triangles, geo.triangles);
	}

	#[test]
	fn test_truncated_stream() {
		let engine = Engine::default();
		let mut geo = strip_geometry(&engine);
		pipeline::instance(PipelineKey::default_for(Platform::D3D9), &mut geo, &engine).unwrap();
		let mut data = vec![];
		native_data(&geo).write(&mut data, &engine.config).unwrap();

		// keep the header but drop the end of the vertex data
		data.truncate(data.len() - 10);
		let result = InstanceHeader::read(&mut Cursor::new(data));
		assert!(matches!(result, Err(RwError::Truncated)));
	}
}
