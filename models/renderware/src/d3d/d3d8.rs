use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::{
	Read,
	Write
};

use rgk_core::io_ext::{
	ReadBinExt,
	WriteBinExt
};

use crate::{
	chunk::{
		find_chunk,
		ChunkHeader,
		Source,
		ID_STRUCT
	},
	d3d::{
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
	platform::Platform
};

pub const PRIM_TRIANGLELIST: u32 = 4;
pub const PRIM_TRIANGLESTRIP: u32 = 5;

const FVF_XYZ: u32 = 0x002;
const FVF_NORMAL: u32 = 0x010;
const FVF_DIFFUSE: u32 = 0x040;
const FVF_MAX_TEX: usize = 8;

/// Space reserved per mesh record. Records are packed at 43 bytes and the
/// rest is left as padding at the end of the block.
const RECORD_SIZE: u32 = 0x2C;
const PACKED_RECORD_SIZE: u32 = 43;

/// Fixed function vertex layout: position, normal, BGRA color, UV sets
#[derive(Clone, Copy, Debug, PartialEq)]
struct VertexLayout {
	normals: bool,
	prelit: bool,
	num_tex: usize,
}

impl VertexLayout {
	fn of(geo: &Geometry) -> VertexLayout {
		VertexLayout {
			normals: geo.has_normals(),
			prelit: geo.is_prelit(),
			num_tex: geo.num_tex_coords.min(FVF_MAX_TEX),
		}
	}

	fn stride(&self) -> u32 {
		12 + self.normals as u32 * 12 + self.prelit as u32 * 4 + 8 * self.num_tex as u32
	}

	fn fvf(&self) -> u32 {
		let mut fvf = FVF_XYZ;
		if self.normals {
			fvf |= FVF_NORMAL;
		}
		if self.prelit {
			fvf |= FVF_DIFFUSE;
		}
		fvf | (self.num_tex as u32) << 8
	}

	fn write_vertex(&self, out: &mut Vec<u8>, geo: &Geometry, v: usize) -> Result<(), RwError> {
		let mt = &geo.morph_targets[0];
		out.write_vec3_le(mt.vertices[v])?;
		if self.normals {
			out.write_vec3_le(mt.normals[v])?;
		}
		if self.prelit {
			out.write_all(&swap_red_blue(geo.colors[v]))?;
		}
		for set in geo.tex_coords.iter().take(self.num_tex) {
			out.write_vec2_le(set[v])?;
		}
		Ok(())
	}

	fn read_vertex(&self, mut src: &[u8], geo: &mut Geometry, v: usize) -> Result<(), RwError> {
		let mt = &mut geo.morph_targets[0];
		mt.vertices[v] = src.read_vec3_le()?;
		if self.normals {
			mt.normals[v] = src.read_vec3_le()?;
		}
		if self.prelit {
			let mut c = [0; 4];
			src.read_exact(&mut c)?;
			geo.colors[v] = swap_red_blue(c);
		}
		for set in geo.tex_coords.iter_mut().take(self.num_tex) {
			set[v] = src.read_vec2_le()?;
		}
		Ok(())
	}
}

/// One mesh with its own slice of the vertices
#[derive(Clone, Debug, PartialEq)]
pub struct MeshInstance {
	pub min_vert: u32,
	pub stride: u32,
	pub num_vertices: u32,
	pub num_indices: u32,
	pub material: u32,
	/// FVF code of the vertices
	pub vertex_shader: u32,
	pub prim_type: u32,
	pub base_index: u32,
	pub vertex_alpha: bool,
	pub managed: bool,
	pub remapped: bool,
	/// Relative to `min_vert`
	pub indices: Vec<u16>,
	pub vertices: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceHeader {
	pub serial: u16,
	pub meshes: Vec<MeshInstance>,
}

impl InstanceHeader {
	/// Reads the Struct of a Native Data chunk
	pub fn read(buf: &mut dyn Source) -> Result<InstanceHeader, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		let platform = buf.read_u32::<LE>()?;
		if platform != Platform::D3D8 as u32 {
			return Err(RwError::malformed(format!("native data platform {} is not D3D8", platform)));
		}

		let size = buf.read_i32::<LE>()?;
		if size < 4 || 8 + size as u64 > header.length as u64 {
			return Err(RwError::malformed(format!("bad D3D8 mesh block size {}", size)));
		}
		let mut block = vec![0; size as usize];
		buf.read_exact(&mut block)?;

		let mut p = &block[..];
		let serial = p.read_u16::<LE>()?;
		let num_meshes = p.read_u16::<LE>()?;
		if 4 + num_meshes as u64 * PACKED_RECORD_SIZE as u64 > size as u64 {
			return Err(RwError::malformed(format!("{} meshes do not fit the D3D8 mesh block", num_meshes)));
		}

		let mut meshes = Vec::with_capacity(num_meshes as usize);
		let mut data_size = 8 + size as u64;
		for _ in 0..num_meshes {
			let min_vert = p.read_u32::<LE>()?;
			let stride = p.read_u32::<LE>()?;
			let num_vertices = p.read_u32::<LE>()?;
			let num_indices = p.read_u32::<LE>()?;
			let material = p.read_u32::<LE>()?;
			let vertex_shader = p.read_u32::<LE>()?;
			let prim_type = p.read_u32::<LE>()?;
			// index and vertex buffer pointers
			p.read_u32::<LE>()?;
			p.read_u32::<LE>()?;
			let base_index = p.read_u32::<LE>()?;
			let vertex_alpha = p.read_u8()? != 0;
			let managed = p.read_u8()? != 0;
			let remapped = p.read_u8()? != 0;

			data_size += num_indices as u64 * 2 + stride as u64 * num_vertices as u64;
			if data_size > header.length as u64 {
				return Err(RwError::malformed("D3D8 buffers overrun the native data"));
			}
			meshes.push(MeshInstance {
				min_vert: min_vert,
				stride: stride,
				num_vertices: num_vertices,
				num_indices: num_indices,
				material: material,
				vertex_shader: vertex_shader,
				prim_type: prim_type,
				base_index: base_index,
				vertex_alpha: vertex_alpha,
				managed: managed,
				remapped: remapped,
				indices: vec![],
				vertices: vec![],
			});
		}

		for mesh in meshes.iter_mut() {
			mesh.indices = (0..mesh.num_indices).map(|_| buf.read_u16::<LE>())
				.collect::<Result<Vec<_>, _>>()?;
			mesh.vertices = vec![0; (mesh.stride * mesh.num_vertices) as usize];
			buf.read_exact(&mut mesh.vertices)?;
		}

		Ok(InstanceHeader {
			serial: serial,
			meshes: meshes,
		})
	}

	pub fn write(&self, buf: &mut Vec<u8>, config: &EngineConfig) -> Result<(), RwError> {
		ChunkHeader::new(ID_STRUCT, self.stream_size() - ChunkHeader::SIZE, config).write(buf)?;
		buf.write_u32::<LE>(Platform::D3D8 as u32)?;

		let size = 4 + self.meshes.len() as u32 * RECORD_SIZE;
		buf.write_i32::<LE>(size as i32)?;
		let start = buf.len();
		buf.write_u16::<LE>(self.serial)?;
		buf.write_u16::<LE>(self.meshes.len() as u16)?;
		for mesh in self.meshes.iter() {
			buf.write_u32::<LE>(mesh.min_vert)?;
			buf.write_u32::<LE>(mesh.stride)?;
			buf.write_u32::<LE>(mesh.num_vertices)?;
			buf.write_u32::<LE>(mesh.num_indices)?;
			buf.write_u32::<LE>(mesh.material)?;
			buf.write_u32::<LE>(mesh.vertex_shader)?;
			buf.write_u32::<LE>(mesh.prim_type)?;
			buf.write_u32::<LE>(0)?;
			buf.write_u32::<LE>(0)?;
			buf.write_u32::<LE>(mesh.base_index)?;
			buf.write_u8(mesh.vertex_alpha as u8)?;
			buf.write_u8(mesh.managed as u8)?;
			buf.write_u8(mesh.remapped as u8)?;
		}
		buf.resize(start + size as usize, 0);

		for mesh in self.meshes.iter() {
			for &i in mesh.indices.iter() {
				buf.write_u16::<LE>(i)?;
			}
			buf.write_all(&mesh.vertices)?;
		}
		Ok(())
	}

	pub fn stream_size(&self) -> u32 {
		let buffers: u32 = self.meshes.iter()
			.map(|m| m.indices.len() as u32 * 2 + m.vertices.len() as u32)
			.sum();
		ChunkHeader::SIZE + 4 + 4 + 4 + self.meshes.len() as u32 * RECORD_SIZE + buffers
	}
}

fn instance_geometry(geo: &mut Geometry) -> Result<(), RwError> {
	let header = check_generic(geo)?;
	let layout = VertexLayout::of(geo);
	let prim_type = match header.is_tristrip() {
		true => PRIM_TRIANGLESTRIP,
		false => PRIM_TRIANGLELIST,
	};

	let mut meshes = Vec::with_capacity(header.meshes.len());
	for mesh in header.meshes.iter() {
		let (min_vert, num_vertices) = find_min_vert(&mesh.indices);
		let range = min_vert as usize..(min_vert + num_vertices) as usize;

		let mut vertices = Vec::with_capacity((layout.stride() * num_vertices) as usize);
		for v in range.clone() {
			layout.write_vertex(&mut vertices, geo, v)?;
		}

		meshes.push(MeshInstance {
			min_vert: min_vert,
			stride: layout.stride(),
			num_vertices: num_vertices,
			num_indices: mesh.num_indices,
			material: mesh.material as u32,
			vertex_shader: layout.fvf(),
			prim_type: prim_type,
			base_index: 0,
			vertex_alpha: layout.prelit && has_alpha(&geo.colors[range]),
			managed: true,
			remapped: false,
			indices: mesh.indices.iter().map(|&i| i - min_vert as u16).collect(),
			vertices: vertices,
		});
	}

	commit_native(geo, InstanceData::D3D8(InstanceHeader {
		serial: 0,
		meshes: meshes,
	}));
	Ok(())
}

fn uninstance_geometry(geo: &mut Geometry) -> Result<(), RwError> {
	let inst = match geo.inst_data.as_ref() {
		Some(InstanceData::D3D8(inst)) => inst.clone(),
		_ => return Err(RwError::malformed("geometry holds no D3D8 data")),
	};
	let layout = VertexLayout::of(geo);
	let num_meshes = geo.mesh_header.as_ref().map_or(0, |h| h.meshes.len());
	if num_meshes != inst.meshes.len() {
		return Err(RwError::malformed(format!("{} D3D8 meshes for {} mesh records", inst.meshes.len(), num_meshes)));
	}
	for mesh in inst.meshes.iter() {
		let end = mesh.min_vert as u64 + mesh.num_vertices as u64;
		if mesh.stride < layout.stride()
			|| end > geo.num_vertices as u64
			|| end > 0x10000
			|| (mesh.vertices.len() as u64) < mesh.stride as u64 * mesh.num_vertices as u64
			|| mesh.indices.iter().any(|&i| i as u32 >= mesh.num_vertices)
		{
			return Err(RwError::malformed("D3D8 mesh does not match its geometry"));
		}
	}

	release_native(geo);
	for (k, mesh) in inst.meshes.iter().enumerate() {
		for j in 0..mesh.num_vertices as usize {
			let at = j * mesh.stride as usize;
			layout.read_vertex(&mesh.vertices[at..], geo, mesh.min_vert as usize + j)?;
		}
		if let Some(target) = geo.mesh_header.as_mut().map(|h| &mut h.meshes[k]) {
			target.indices = mesh.indices.iter().map(|&i| i + mesh.min_vert as u16).collect();
			target.num_indices = target.indices.len() as u32;
		}
	}
	geo.generate_triangles(None);
	Ok(())
}

/// D3D8 renders skin and material effects in software, so every pipeline
/// shares one vertex layout
struct D3D8Pipeline {
	key: PipelineKey,
}

impl ObjPipeline for D3D8Pipeline {
	fn key(&self) -> PipelineKey {
		self.key
	}

	fn instance(&self, geo: &mut Geometry, _: &Engine) -> Result<(), RwError> {
		instance_geometry(geo)
	}

	fn uninstance(&self, geo: &mut Geometry, _: &Engine) -> Result<(), RwError> {
		uninstance_geometry(geo)
	}
}

pub fn pipelines() -> Vec<Box<dyn ObjPipeline>> {
	[
		PipelineKey::default_for(Platform::D3D8),
		PipelineKey::skin_for(Platform::D3D8),
		PipelineKey::matfx_for(Platform::D3D8),
	].into_iter().map(|key| Box::new(D3D8Pipeline { key: key }) as Box<dyn ObjPipeline>).collect()
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

	/// Two meshes over six vertices, the second one using vertices 3 to 5
	fn geometry(engine: &Engine) -> Geometry {
		let mut geo = Geometry::new(engine, 6, 2,
			GeometryFlags::POSITIONS | GeometryFlags::PRELIT | GeometryFlags::NORMALS | GeometryFlags::TEXTURED);
		geo.materials.push(Material::new(engine));
		geo.materials.push(Material::new(engine));
		for v in 0..6 {
			geo.morph_targets[0].vertices[v] = Vec3::new(v as f32, 1.0, -2.5);
			geo.morph_targets[0].normals[v] = Vec3::unit_y();
			geo.colors[v] = [10 * v as u8, 20, 40, 255];
			geo.tex_coords[0][v] = Vec2::new(0.25 * v as f32, 0.5);
		}
		geo.colors[4][3] = 100;
		geo.mesh_header = Some(MeshHeader {
			flags: MeshHeaderFlags::empty(),
			meshes: vec![
				Mesh {
					material: 0,
					num_indices: 3,
					indices: vec![0, 1, 2],
				},
				Mesh {
					material: 1,
					num_indices: 3,
					indices: vec![3, 5, 4],
				},
			],
		});
		geo.generate_triangles(None);
		geo
	}

	fn instanced(engine: &Engine) -> Geometry {
		let mut geo = geometry(engine);
		pipeline::instance(PipelineKey::default_for(Platform::D3D8), &mut geo, engine).unwrap();
		geo
	}

	#[test]
	fn test_instance_layout() {
		let engine = Engine::default();
		let geo = instanced(&engine);
		assert!(geo.is_native());
		assert!(geo.triangles.is_empty());
		assert!(geo.mesh_header.as_ref().unwrap().meshes[1].indices.is_empty());

		let inst = match geo.inst_data.as_ref() {
			Some(InstanceData::D3D8(inst)) => inst,
			other => panic!("unexpected native data {:?}", other),
		};
		let mesh = &inst.meshes[1];
		assert_eq!(3, mesh.min_vert);
		assert_eq!(vec![0, 2, 1], mesh.indices);
		assert_eq!(36, mesh.stride);
		assert_eq!(0x152, mesh.vertex_shader);
		assert_eq!(PRIM_TRIANGLELIST, mesh.prim_type);
		assert!(mesh.vertex_alpha);
		assert!(!inst.meshes[0].vertex_alpha);
		// color of vertex 3 in BGRA order
		assert_eq!(&[40, 20, 30, 255], &mesh.vertices[24..28]);
	}

	#[test]
	fn test_native_data_stream() {
		let engine = Engine::default();
		let geo = instanced(&engine);
		let inst = match geo.inst_data.as_ref() {
			Some(InstanceData::D3D8(inst)) => inst,
			_ => unreachable!(),
		};

		let mut data = vec![];
		inst.write(&mut data, &engine.config).unwrap();
		assert_eq!(inst.stream_size() as usize, data.len());
		assert_eq!(&inst.clone(), &InstanceHeader::read(&mut Cursor::new(data.clone())).unwrap());

		let mut file = vec![];
		geo.write(&mut file, &engine).unwrap();
		let read = Geometry::read_chunk(&mut Cursor::new(file), &engine).unwrap();
		assert_eq!(geo, read);
	}

	#[test]
	fn test_uninstance_restores_vertices() {
		let engine = Engine::default();
		let original = geometry(&engine);
		let mut geo = instanced(&engine);
		pipeline::uninstance(PipelineKey::default_for(Platform::D3D8), &mut geo, &engine).unwrap();
		assert!(!geo.is_native());
		assert_eq!(original.morph_targets, geo.morph_targets);
		assert_eq!(original.colors, geo.colors);
		assert_eq!(original.tex_coords, geo.tex_coords);
		assert_eq!(original.triangles, geo.triangles);
		assert_eq!(original.mesh_header, geo.mesh_header);
	}

	#[test]
	fn test_rejects_bad_index() {
		let engine = Engine::default();
		let mut geo = geometry(&engine);
		geo.mesh_header.as_mut().unwrap().meshes[0].indices[2] = 6;
		let before = geo.clone();
		let result = pipeline::instance(PipelineKey::default_for(Platform::D3D8), &mut geo, &engine);
		assert!(matches!(result, Err(RwError::Malformed(_))));
		assert_eq!(before, geo);
	}
}
