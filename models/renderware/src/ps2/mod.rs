pub mod skin;
pub mod vif;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::{
	collections::HashMap,
	io::Write
};

use ultraviolet::vec::{
	Vec2,
	Vec3
};

use crate::{
	chunk::{
		find_chunk,
		ChunkHeader,
		Source,
		ID_MATFX,
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
	platform::Platform
};

use self::vif::{
	position_unpack,
	unpack_weight,
	MatPipeline,
	MeshSource,
	RawVertex,
	UNPACK_V4_32
};

/// DMA packet of one mesh
#[derive(Clone, Debug, PartialEq)]
pub struct MeshInstance {
	pub data: Vec<u8>,
	/// Set when the chain holds no DMA references that would need relocating
	pub pointers_fixed: u32,
	pub material: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceHeader {
	pub meshes: Vec<MeshInstance>,
}

impl InstanceHeader {
	/// Reads the Struct of a Native Data chunk. There is one packet per mesh
	/// of the geometry's mesh header.
	pub fn read(buf: &mut dyn Source, geo: &Geometry) -> Result<InstanceHeader, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		let platform = buf.read_u32::<LE>()?;
		if platform != Platform::Ps2 as u32 {
			return Err(RwError::malformed(format!("native data platform {} is not PS2", platform)));
		}
		let mesh_header = geo.mesh_header.as_ref()
			.ok_or_else(|| RwError::malformed("PS2 native data without a mesh header"))?;

		let mut left = header.length.saturating_sub(4);
		let mut meshes = Vec::with_capacity(mesh_header.meshes.len());
		for mesh in mesh_header.meshes.iter() {
			let size = buf.read_u32::<LE>()?;
			let pointers_fixed = buf.read_u32::<LE>()?;
			if 8 + size as u64 > left as u64 {
				return Err(RwError::malformed(format!("PS2 mesh packet of {} bytes overruns the native data", size)));
			}
			left -= 8 + size;

			let mut data = vec![0; size as usize];
			buf.read_exact(&mut data)?;
			meshes.push(MeshInstance {
				data: data,
				pointers_fixed: pointers_fixed,
				material: mesh.material,
			});
		}

		Ok(InstanceHeader {
			meshes: meshes,
		})
	}

	pub fn write(&self, buf: &mut Vec<u8>, config: &EngineConfig) -> Result<(), RwError> {
		ChunkHeader::new(ID_STRUCT, self.stream_size() - ChunkHeader::SIZE, config).write(buf)?;
		buf.write_u32::<LE>(Platform::Ps2 as u32)?;
		for mesh in self.meshes.iter() {
			buf.write_u32::<LE>(mesh.data.len() as u32)?;
			buf.write_u32::<LE>(mesh.pointers_fixed)?;
			buf.write_all(&mesh.data)?;
		}
		Ok(())
	}

	pub fn stream_size(&self) -> u32 {
		ChunkHeader::SIZE + 4 + self.meshes.iter().map(|m| 8 + m.data.len() as u32).sum::<u32>()
	}
}

fn instance_geometry(geo: &mut Geometry, engine: &Engine, mat: MatPipeline) -> Result<(), RwError> {
	let header = check_generic(geo)?;
	let tristrip = header.is_tristrip();

	let adc = geo.ext.get(engine.handles.adc).filter(|adc| adc.formatted);
	let mat = match adc {
		Some(_) => mat.with_adc(),
		None => mat,
	};
	let skin = match geo.ext.get(engine.handles.skin).and_then(Option::as_ref) {
		Some(skin) if mat.has_weights() => {
			if skin.indices.len() < geo.num_vertices || skin.weights.len() < geo.num_vertices {
				return Err(RwError::malformed(format!("skin arrays shorter than {} vertices", geo.num_vertices)));
			}
			Some(skin)
		},
		_ => None,
	};

	let mut mark = 0;
	let mut meshes = Vec::with_capacity(header.meshes.len());
	for (i, mesh) in header.meshes.iter().enumerate() {
		let src = MeshSource {
			geo: geo,
			indices: &mesh.indices,
			adc_bits: adc.and_then(|adc| adc.bits_for_mesh(geo, i)),
			skin: skin,
			tristrip: tristrip,
		};
		meshes.push(MeshInstance {
			data: mat.instance_mesh(&src, engine.config.version, &mut mark)?,
			pointers_fixed: !mat.has_weights() as u32,
			material: mesh.material,
		});
	}

	let skinned = skin.is_some();
	commit_native(geo, InstanceData::Ps2(InstanceHeader {
		meshes: meshes,
	}));

	// native geometry streams no ADC bits
	if let Some(adc) = geo.ext.get_mut(engine.handles.adc) {
		adc.bits.clear();
	}
	if skinned {
		if let Some(skin) = geo.ext.get_mut(engine.handles.skin).and_then(Option::as_mut) {
			skin.indices.clear();
			skin.weights.clear();
		}
	}
	Ok(())
}

fn uninstance_geometry(geo: &mut Geometry, engine: &Engine, mat: MatPipeline) -> Result<(), RwError> {
	let inst = match geo.inst_data.as_ref() {
		Some(InstanceData::Ps2(inst)) => inst.clone(),
		_ => return Err(RwError::malformed("geometry holds no PS2 data")),
	};
	let header = geo.mesh_header.as_ref()
		.ok_or_else(|| RwError::malformed("PS2 geometry without a mesh header"))?;
	if header.meshes.len() != inst.meshes.len() {
		return Err(RwError::malformed("PS2 packets do not match the meshes"));
	}
	let tristrip = header.is_tristrip();

	let num_broken = if mat.has_weights() { 1 } else { 0 };
	let xyzw = match inst.meshes.first() {
		Some(m) => position_unpack(&m.data, num_broken)? == UNPACK_V4_32,
		None => false,
	};
	let mat = if xyzw { mat.with_adc() } else { mat };

	let normals = geo.has_normals();
	let prelit = geo.is_prelit();
	let textured = geo.num_tex_coords > 0;
	let skinned = mat.has_weights() && geo.ext.get(engine.handles.skin).map_or(false, Option::is_some);

	// vertices are shared again where every streamed attribute matches bit for bit
	let mut unique: Vec<RawVertex> = vec![];
	let mut lookup: HashMap<RawVertex, u16> = HashMap::new();
	let mut mesh_indices = Vec::with_capacity(inst.meshes.len());
	let mut bits = vec![];
	for (mesh, m) in header.meshes.iter().zip(inst.meshes.iter()) {
		let verts = mat.collect_mesh(&m.data, mesh.num_indices, tristrip)?;
		let mut indices = Vec::with_capacity(verts.len());
		for v in verts {
			if xyzw {
				bits.push(v.w != 0);
			}
			let key = RawVertex {
				pos: v.pos,
				w: 0,
				uv: if textured { v.uv } else { [0; 2] },
				color: if prelit { v.color } else { [0; 4] },
				normal: if normals { v.normal } else { [0; 3] },
				weights: if skinned { v.weights } else { [0; 4] },
			};
			let idx = match lookup.get(&key) {
				Some(&idx) => idx,
				None => {
					if unique.len() >= 0xFFFF {
						return Err(RwError::malformed("uninstanced geometry has more than 65535 vertices"));
					}
					let idx = unique.len() as u16;
					unique.push(key);
					lookup.insert(key, idx);
					idx
				},
			};
			indices.push(idx);
		}
		mesh_indices.push(indices);
	}

	geo.num_vertices = unique.len();
	release_native(geo);
	for (i, v) in unique.iter().enumerate() {
		let mt = &mut geo.morph_targets[0];
		mt.vertices[i] = Vec3::new(f32::from_bits(v.pos[0]), f32::from_bits(v.pos[1]), f32::from_bits(v.pos[2]));
		if normals {
			let n = v.normal.map(|c| c as f32 / 127.0);
			mt.normals[i] = Vec3::new(n[0], n[1], n[2]);
		}
		if prelit {
			geo.colors[i] = v.color;
		}
		if textured {
			geo.tex_coords[0][i] = Vec2::new(f32::from_bits(v.uv[0]), f32::from_bits(v.uv[1]));
		}
	}
	if let Some(header) = geo.mesh_header.as_mut() {
		for (mesh, indices) in header.meshes.iter_mut().zip(mesh_indices) {
			mesh.indices = indices;
		}
	}

	if skinned {
		if let Some(skin) = geo.ext.get_mut(engine.handles.skin).and_then(Option::as_mut) {
			skin.indices = vec![[0; 4]; unique.len()];
			skin.weights = vec![[0.0; 4]; unique.len()];
			for (i, v) in unique.iter().enumerate() {
				for k in 0..4 {
					let (w, idx) = unpack_weight(v.weights[k]);
					skin.weights[i][k] = w;
					skin.indices[i][k] = idx;
				}
			}
			skin.find_num_weights();
			skin.find_used_bones();
		}
	}

	let adc_bits = match xyzw {
		true => {
			if let Some(adc) = geo.ext.get_mut(engine.handles.adc) {
				adc.formatted = true;
				adc.bits = bits.clone();
			}
			Some(bits)
		},
		false => None,
	};
	geo.generate_triangles(adc_bits.as_deref());
	Ok(())
}

struct Ps2Pipeline {
	key: PipelineKey,
	mat: MatPipeline,
}

impl ObjPipeline for Ps2Pipeline {
	fn key(&self) -> PipelineKey {
		self.key
	}

	fn instance(&self, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
		instance_geometry(geo, engine, self.mat)
	}

	fn uninstance(&self, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
		uninstance_geometry(geo, engine, self.mat)
	}
}

pub fn pipelines() -> Vec<Box<dyn ObjPipeline>> {
	[
		PipelineKey::default_for(Platform::Ps2),
		PipelineKey::skin_for(Platform::Ps2),
		PipelineKey::matfx_for(Platform::Ps2),
	].into_iter().map(|key| {
		let mat = match key.plugin_id {
			ID_SKIN => MatPipeline::skin_pipe(),
			ID_MATFX => MatPipeline::matfx_pipe(),
			_ => MatPipeline::default_pipe(),
		};
		Box::new(Ps2Pipeline { key: key, mat: mat }) as Box<dyn ObjPipeline>
	}).collect()
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use crate::{
		adc::AdcData,
		geometry::{
			GeometryFlags,
			Mesh,
			MeshHeader,
			MeshHeaderFlags
		},
		material::Material,
		pipeline,
		skin::Skin
	};

	use super::{
		vif::*,
		*
	};

	fn word(data: &[u8], i: usize) -> u32 {
		u32::from_le_bytes([data[4 * i], data[4 * i + 1], data[4 * i + 2], data[4 * i + 3]])
	}

	fn geometry(engine: &Engine, num_vertices: usize, meshes: Vec<Mesh>, strip: bool) -> Geometry {
		let mut flags = GeometryFlags::POSITIONS | GeometryFlags::NORMALS | GeometryFlags::PRELIT | GeometryFlags::TEXTURED;
		if strip {
			flags |= GeometryFlags::TRISTRIP;
		}
		let mut geo = Geometry::new(engine, num_vertices, 0, flags);
		geo.materials.push(Material::new(engine));
		geo.materials.push(Material::new(engine));
		for v in 0..num_vertices {
			geo.morph_targets[0].vertices[v] = Vec3::new(v as f32, 1.0, -2.5);
			geo.morph_targets[0].normals[v] = Vec3::unit_y();
			geo.tex_coords[0][v] = Vec2::new(0.25 * v as f32, 0.5);
			geo.colors[v] = [v as u8, 10, 20, 255];
		}
		geo.mesh_header = Some(MeshHeader {
			flags: if strip { MeshHeaderFlags::TRISTRIP } else { MeshHeaderFlags::empty() },
			meshes: meshes,
		});
		geo.generate_triangles(None);
		geo
	}

	fn mesh(material: usize, indices: Vec<u16>) -> Mesh {
		Mesh {
			material: material,
			num_indices: indices.len() as u32,
			indices: indices,
		}
	}

	fn packet(geo: &Geometry, i: usize) -> Vec<u8> {
		match geo.inst_data.as_ref() {
			Some(InstanceData::Ps2(inst)) => inst.meshes[i].data.clone(),
			other => panic!("unexpected native data {:?}", other),
		}
	}

	#[test]
	fn test_list_chain() {
		let engine = Engine::default();
		let mut geo = geometry(&engine, 4, vec![mesh(0, vec![0, 1, 2, 2, 1, 3])], false);
		pipeline::instance(PipelineKey::default_for(Platform::Ps2), &mut geo, &engine).unwrap();

		let data = packet(&geo, 0);
		assert_eq!(18 * 16, data.len());
		assert_eq!(DMA_RET | 17, word(&data, 0));
		assert_eq!([VIF_FLUSH, VIF_FLUSH], [word(&data, 2), word(&data, 3)]);
		assert_eq!([VIF_NOP, VIF_STMOD, VIF_STCYCL | 4, 0x68068000], [word(&data, 4), word(&data, 5), word(&data, 6), word(&data, 7)]);
		assert_eq!([VIF_ITOP | 6, VIF_MSCALF], [word(&data, 68), word(&data, 69)]);
	}

	#[test]
	fn test_mark_codes() {
		let mut engine = Engine::default();
		engine.config.version = 0x34003;
		let mut geo = geometry(&engine, 4, vec![mesh(0, vec![0, 1, 2, 2, 1, 3])], false);
		pipeline::instance(PipelineKey::default_for(Platform::Ps2), &mut geo, &engine).unwrap();

		let data = packet(&geo, 0);
		assert_eq!(VIF_MSKPATH3, word(&data, 3));
		assert_eq!(VIF_MARK, word(&data, 4));
		// 72 bytes of positions take 5 quad words
		assert_eq!(VIF_MARK | 1, word(&data, 28));
	}

	#[test]
	fn test_uninstance_shares_vertices() {
		let engine = Engine::default();
		let mut geo = geometry(&engine, 5, vec![mesh(0, vec![0, 1, 2]), mesh(1, vec![2, 1, 3, 4, 3, 1])], false);
		// vertex 4 duplicates vertex 0
		geo.morph_targets[0].vertices[4] = geo.morph_targets[0].vertices[0];
		geo.tex_coords[0][4] = geo.tex_coords[0][0];
		geo.colors[4] = geo.colors[0];

		let key = PipelineKey::default_for(Platform::Ps2);
		pipeline::instance(key, &mut geo, &engine).unwrap();
		pipeline::uninstance(key, &mut geo, &engine).unwrap();

		assert_eq!(4, geo.num_vertices);
		let header = geo.mesh_header.as_ref().unwrap();
		assert_eq!(vec![0, 1, 2], header.meshes[0].indices);
		assert_eq!(vec![2, 1, 3, 0, 3, 1], header.meshes[1].indices);
		assert_eq!(Vec3::new(3.0, 1.0, -2.5), geo.morph_targets[0].vertices[3]);
		assert_eq!(Vec3::unit_y(), geo.morph_targets[0].normals[3]);
		assert_eq!([3, 10, 20, 255], geo.colors[3]);
		assert_eq!(3, geo.triangles.len());
	}

	#[test]
	fn test_fixed_point() {
		let engine = Engine::default();
		let mut geo = geometry(&engine, 4, vec![mesh(0, vec![0, 1, 2, 3])], true);
		geo.morph_targets[0].normals[2] = Vec3::new(0.3, -0.6, 0.74);

		let key = PipelineKey::default_for(Platform::Ps2);
		pipeline::instance(key, &mut geo, &engine).unwrap();
		let once = geo.inst_data.clone();
		pipeline::uninstance(key, &mut geo, &engine).unwrap();
		pipeline::instance(key, &mut geo, &engine).unwrap();
		assert_eq!(once, geo.inst_data);
	}

	#[test]
	fn test_adc_bits_in_w() {
		let engine = Engine::default();
		let mut geo = geometry(&engine, 4, vec![mesh(0, vec![0, 1, 2, 3])], true);
		*geo.ext.get_mut(engine.handles.adc).unwrap() = AdcData {
			formatted: true,
			bits: vec![false, false, false, true],
		};

		let key = PipelineKey::default_for(Platform::Ps2);
		pipeline::instance(key, &mut geo, &engine).unwrap();
		let data = packet(&geo, 0);
		assert_eq!(UNPACK_V4_32 | 0x8000 | 4 << 16, word(&data, 7));
		assert_eq!(0, word(&data, 8 + 2 * 4 + 3));
		assert_eq!(0x8000, word(&data, 8 + 3 * 4 + 3));
		assert!(geo.ext.get(engine.handles.adc).unwrap().bits.is_empty());

		pipeline::uninstance(key, &mut geo, &engine).unwrap();
		assert_eq!(vec![false, false, false, true], geo.ext.get(engine.handles.adc).unwrap().bits);
		// the flagged vertex skips the second triangle
		assert_eq!(1, geo.triangles.len());
	}

	#[test]
	fn test_skin_weights() {
		let engine = Engine::default();
		let mut geo = geometry(&engine, 4, vec![mesh(0, vec![0, 1, 2, 2, 1, 3])], false);
		let mut skin = Skin::new(4, 4);
		skin.indices = vec![[0, 3, 0, 0], [1, 0, 0, 0], [2, 3, 0, 0], [3, 0, 0, 0]];
		skin.weights = vec![[0.5, 0.5, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0], [0.75, 0.25, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]];
		skin.num_weights = 2;
		skin.used_bones = vec![0, 1, 2, 3];
		*geo.ext.get_mut(engine.handles.skin).unwrap() = Some(skin.clone());

		let key = PipelineKey::skin_for(Platform::Ps2);
		pipeline::instance(key, &mut geo, &engine).unwrap();
		let data = packet(&geo, 0);
		let l = MatPipeline::skin_pipe().layout(6, false).unwrap();
		let at = l.attrib_pos[4] as usize * 4;
		// bone 3 of the first vertex is stored as 4 << 2
		assert_eq!(0.5f32.to_bits() | 4 << 2, word(&data, at + 1));
		assert!(geo.ext.get(engine.handles.skin).unwrap().as_ref().unwrap().weights.is_empty());

		let mut file = vec![];
		geo.write(&mut file, &engine).unwrap();
		assert_eq!(geo, Geometry::read_chunk(&mut Cursor::new(file), &engine).unwrap());

		pipeline::uninstance(key, &mut geo, &engine).unwrap();
		let restored = geo.ext.get(engine.handles.skin).unwrap().as_ref().unwrap();
		assert_eq!(skin.indices, restored.indices);
		assert_eq!(skin.weights, restored.weights);
		assert_eq!(skin.used_bones, restored.used_bones);
	}

	#[test]
	fn test_native_data_stream() {
		let engine = Engine::default();
		let mut geo = geometry(&engine, 4, vec![mesh(0, vec![0, 1, 2]), mesh(1, vec![2, 1, 3])], false);
		pipeline::instance(PipelineKey::matfx_for(Platform::Ps2), &mut geo, &engine).unwrap();

		let mut file = vec![];
		geo.write(&mut file, &engine).unwrap();
		let read = Geometry::read_chunk(&mut Cursor::new(file), &engine).unwrap();
		assert_eq!(geo, read);
	}

	#[test]
	fn test_pipeline_mismatch() {
		let engine = Engine::default();
		let mut geo = geometry(&engine, 4, vec![mesh(0, vec![0, 1, 2, 2, 1, 3])], false);
		pipeline::instance(PipelineKey::default_for(Platform::Ps2), &mut geo, &engine).unwrap();
		let err = pipeline::uninstance(PipelineKey::skin_for(Platform::Ps2), &mut geo, &engine);
		assert!(matches!(err, Err(RwError::Malformed(_))));
		assert!(geo.is_native());
	}
}
