use bitflags::bitflags;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::{
	collections::BTreeMap,
	io::Write
};

use ultraviolet::vec::{
	Vec2,
	Vec3,
	Vec4
};

use rgk_core::io_ext::{
	ReadBinExt,
	WriteBinExt
};

use crate::{
	chunk::{
		expect_chunk,
		find_chunk,
		write_chunk,
		write_struct,
		Source,
		ID_GEOMETRY,
		ID_STRUCT
	},
	engine::Engine,
	error::RwError,
	material::{
		read_material_list,
		write_material_list,
		Material
	},
	native::InstanceData,
	platform::Platform,
	plugin::Extensions
};

bitflags! {
	pub struct GeometryFlags: u32 {
		const TRISTRIP = 0x01;
		const POSITIONS = 0x02;
		const TEXTURED = 0x04;
		const PRELIT = 0x08;
		const NORMALS = 0x10;
		const LIGHT = 0x20;
		const MODULATE = 0x40;
		const TEXTURED2 = 0x80;
		const NATIVE = 0x01000000;
		const NATIVEINSTANCE = 0x02000000;
	}

	pub struct MeshHeaderFlags: u32 {
		const TRISTRIP = 0x01;
	}
}

const TEX_COUNT_MASK: u32 = 0xFF0000;
pub const MAX_TEX_COORDS: usize = 8;
/// Mesh indices are 16 bit, so no instanced geometry addresses more vertices
pub const MAX_NATIVE_VERTICES: usize = 0x10000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Triangle {
	pub v: [u16; 3],
	pub mat_id: u16,
}

impl Triangle {
	// Streams store v1, v0, material, v2
	fn read<R>(buf: &mut R) -> Result<Triangle, RwError>
	where
		R: ReadBytesExt + ?Sized,
	{
		let v1 = buf.read_u16::<LE>()?;
		let v0 = buf.read_u16::<LE>()?;
		let mat_id = buf.read_u16::<LE>()?;
		let v2 = buf.read_u16::<LE>()?;

		Ok(Triangle {
			v: [v0, v1, v2],
			mat_id: mat_id,
		})
	}

	fn write<W>(&self, buf: &mut W) -> std::io::Result<()>
	where
		W: WriteBytesExt + ?Sized,
	{
		buf.write_u16::<LE>(self.v[1])?;
		buf.write_u16::<LE>(self.v[0])?;
		buf.write_u16::<LE>(self.mat_id)?;
		buf.write_u16::<LE>(self.v[2])
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct MorphTarget {
	/// Center in xyz, radius in w
	pub bounding_sphere: Vec4,
	pub vertices: Vec<Vec3>,
	pub normals: Vec<Vec3>,
}

impl Default for MorphTarget {
	fn default() -> Self {
		MorphTarget {
			bounding_sphere: Vec4::zero(),
			vertices: vec![],
			normals: vec![],
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
	/// Index into the geometry's material list
	pub material: usize,
	pub num_indices: u32,
	/// Empty for native geometry on platforms that keep indices in their own buffers
	pub indices: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshHeader {
	pub flags: MeshHeaderFlags,
	pub meshes: Vec<Mesh>,
}

impl MeshHeader {
	pub fn is_tristrip(&self) -> bool {
		self.flags.contains(MeshHeaderFlags::TRISTRIP)
	}

	pub fn total_indices(&self) -> u32 {
		self.meshes.iter().map(|m| m.num_indices).sum()
	}

	/// Triangle count implied by the index runs, degenerate strip triangles included
	pub fn guess_num_triangles(&self) -> usize {
		if self.is_tristrip() {
			self.meshes.iter().map(|m| (m.num_indices as usize).saturating_sub(2)).sum()
		} else {
			self.total_indices() as usize / 3
		}
	}
}

/// Smallest index and the length of the index range spanned by `indices`
pub fn find_min_vert(indices: &[u16]) -> (u32, u32) {
	match (indices.iter().min(), indices.iter().max()) {
		(Some(&min), Some(&max)) => (min as u32, (max - min) as u32 + 1),
		_ => (0, 0),
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
	pub flags: GeometryFlags,
	pub num_tex_coords: usize,
	pub num_vertices: usize,
	pub num_triangles: usize,
	pub triangles: Vec<Triangle>,
	pub colors: Vec<[u8; 4]>,
	pub tex_coords: Vec<Vec<Vec2>>,
	pub morph_targets: Vec<MorphTarget>,
	/// Ambient, specular and diffuse, only streamed before 3.4
	pub surface_props: [f32; 3],
	pub materials: Vec<Material>,
	pub mesh_header: Option<MeshHeader>,
	pub inst_data: Option<InstanceData>,
	pub ext: Extensions,
}

fn check_count(count: i32, elem_size: usize, limit: u32, what: &str) -> Result<usize, RwError> {
	if count < 0 || count as u64 * elem_size as u64 > limit as u64 {
		return Err(RwError::malformed(format!("{} count {} does not fit the geometry struct", what, count)));
	}
	Ok(count as usize)
}

impl Geometry {
	/// Creates a generic geometry with zeroed vertex arrays for one morph target
	pub fn new(engine: &Engine, num_vertices: usize, num_triangles: usize, flags: GeometryFlags) -> Geometry {
		let num_tex_coords = if flags.contains(GeometryFlags::TEXTURED2) {
			2
		} else if flags.contains(GeometryFlags::TEXTURED) {
			1
		} else {
			0
		};

		let mut geo = Geometry {
			flags: flags,
			num_tex_coords: num_tex_coords,
			num_vertices: num_vertices,
			num_triangles: num_triangles,
			triangles: vec![Triangle::default(); num_triangles],
			colors: vec![],
			tex_coords: vec![],
			morph_targets: vec![MorphTarget::default()],
			surface_props: [1.0; 3],
			materials: vec![],
			mesh_header: None,
			inst_data: None,
			ext: engine.geometry_plugins.construct(),
		};
		geo.allocate_data();
		geo
	}

	pub fn is_native(&self) -> bool {
		self.flags.contains(GeometryFlags::NATIVE)
	}

	pub fn native_platform(&self) -> Option<Platform> {
		self.inst_data.as_ref().map(InstanceData::platform)
	}

	pub fn has_normals(&self) -> bool {
		self.flags.contains(GeometryFlags::NORMALS)
	}

	pub fn is_prelit(&self) -> bool {
		self.flags.contains(GeometryFlags::PRELIT)
	}

	/// Sizes the generic vertex arrays after the flags and counts
	pub fn allocate_data(&mut self) {
		let n = self.num_vertices;
		self.colors = if self.is_prelit() { vec![[0; 4]; n] } else { vec![] };
		self.tex_coords = vec![vec![Vec2::zero(); n]; self.num_tex_coords];
		let normals = self.has_normals();
		for mt in self.morph_targets.iter_mut() {
			mt.vertices = vec![Vec3::zero(); n];
			mt.normals = if normals { vec![Vec3::zero(); n] } else { vec![] };
		}
	}

	/// Drops the generic vertex arrays once a native representation owns the data
	pub fn clear_data(&mut self) {
		self.colors.clear();
		self.tex_coords.iter_mut().for_each(Vec::clear);
		self.triangles.clear();
		for mt in self.morph_targets.iter_mut() {
			mt.vertices.clear();
			mt.normals.clear();
		}
	}

	pub fn read(buf: &mut dyn Source, engine: &Engine) -> Result<Geometry, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		let limit = header.length;

		let raw_flags = buf.read_u32::<LE>()?;
		let num_triangles = check_count(buf.read_i32::<LE>()?, 0, limit, "triangle")?;
		let num_vertices = check_count(buf.read_i32::<LE>()?, 0, limit, "vertex")?;
		let num_morph_targets = check_count(buf.read_i32::<LE>()?, 16, limit, "morph target")?;

		let flags = GeometryFlags::from_bits_truncate(raw_flags & !TEX_COUNT_MASK);
		let mut num_tex_coords = ((raw_flags & TEX_COUNT_MASK) >> 16) as usize;
		if num_tex_coords == 0 {
			if flags.contains(GeometryFlags::TEXTURED2) {
				num_tex_coords = 2;
			} else if flags.contains(GeometryFlags::TEXTURED) {
				num_tex_coords = 1;
			}
		}

		if num_tex_coords > MAX_TEX_COORDS {
			return Err(RwError::malformed(format!("{} texture coordinate sets", num_tex_coords)));
		}

		let mut surface_props = [1.0; 3];
		if header.version < 0x34000 {
			for p in surface_props.iter_mut() {
				*p = buf.read_f32::<LE>()?;
			}
		}

		let native = flags.contains(GeometryFlags::NATIVE);
		let mut colors = vec![];
		let mut tex_coords = vec![];
		let mut triangles = vec![];
		if !native {
			check_count(num_vertices as i32, 4, limit, "vertex")?;
			check_count(num_triangles as i32, 8, limit, "triangle")?;

			if flags.contains(GeometryFlags::PRELIT) {
				colors = (0..num_vertices).map(|_| -> Result<[u8; 4], RwError> {
					let mut c = [0; 4];
					buf.read_exact(&mut c)?;
					Ok(c)
				}).collect::<Result<Vec<_>, RwError>>()?;
			}
			for _ in 0..num_tex_coords {
				let set = (0..num_vertices).map(|_| buf.read_vec2_le())
					.collect::<Result<Vec<_>, _>>()?;
				tex_coords.push(set);
			}
			triangles = (0..num_triangles).map(|_| Triangle::read(buf))
				.collect::<Result<Vec<_>, _>>()?;
		} else {
			// native data is unpacked into one morph target of this many vertices
			if num_vertices > MAX_NATIVE_VERTICES || num_morph_targets > 1 {
				return Err(RwError::malformed(format!("native geometry with {} vertices in {} morph targets",
					num_vertices, num_morph_targets)));
			}
			tex_coords = vec![vec![]; num_tex_coords];
		}

		let mut morph_targets = Vec::with_capacity(num_morph_targets);
		for _ in 0..num_morph_targets {
			let bounding_sphere = buf.read_vec4_le()?;
			let has_vertices = buf.read_i32::<LE>()? != 0;
			let has_normals = buf.read_i32::<LE>()? != 0;

			let mut mt = MorphTarget {
				bounding_sphere: bounding_sphere,
				vertices: vec![],
				normals: vec![],
			};
			if has_vertices {
				check_count(num_vertices as i32, 12, limit, "vertex")?;
				mt.vertices = (0..num_vertices).map(|_| buf.read_vec3_le())
					.collect::<Result<Vec<_>, _>>()?;
			}
			if has_normals {
				check_count(num_vertices as i32, 12, limit, "normal")?;
				mt.normals = (0..num_vertices).map(|_| buf.read_vec3_le())
					.collect::<Result<Vec<_>, _>>()?;
			}
			morph_targets.push(mt);
		}

		let materials = read_material_list(buf, engine)?;

		let mut geo = Geometry {
			flags: flags,
			num_tex_coords: num_tex_coords,
			num_vertices: num_vertices,
			num_triangles: num_triangles,
			triangles: triangles,
			colors: colors,
			tex_coords: tex_coords,
			morph_targets: morph_targets,
			surface_props: surface_props,
			materials: materials,
			mesh_header: None,
			inst_data: None,
			ext: engine.geometry_plugins.construct(),
		};

		engine.geometry_plugins.read_extension(buf, &mut geo, engine)?;

		if geo.is_native() != geo.inst_data.is_some() {
			return Err(RwError::malformed("native flag without native data"));
		}

		Ok(geo)
	}

	/// Reads a Geometry chunk including its header
	pub fn read_chunk(buf: &mut dyn Source, engine: &Engine) -> Result<Geometry, RwError> {
		expect_chunk(buf, ID_GEOMETRY)?;
		Geometry::read(buf, engine)
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		let config = &engine.config;
		let native = self.is_native();

		write_chunk(buf, ID_GEOMETRY, config, |body| {
			write_struct(body, config, |s| {
				s.write_u32::<LE>(self.flags.bits() | (self.num_tex_coords as u32) << 16)?;
				s.write_i32::<LE>(self.num_triangles as i32)?;
				s.write_i32::<LE>(self.num_vertices as i32)?;
				s.write_i32::<LE>(self.morph_targets.len() as i32)?;
				if config.version < 0x34000 {
					for &p in self.surface_props.iter() {
						s.write_f32::<LE>(p)?;
					}
				}

				if !native {
					if self.is_prelit() {
						for c in self.colors.iter() {
							s.write_all(c)?;
						}
					}
					for set in self.tex_coords.iter() {
						for &uv in set.iter() {
							s.write_vec2_le(uv)?;
						}
					}
					for t in self.triangles.iter() {
						t.write(s)?;
					}
				}

				for mt in self.morph_targets.iter() {
					s.write_vec4_le(mt.bounding_sphere)?;
					if native {
						s.write_i32::<LE>(0)?;
						s.write_i32::<LE>(0)?;
						continue;
					}
					s.write_i32::<LE>(!mt.vertices.is_empty() as i32)?;
					s.write_i32::<LE>(!mt.normals.is_empty() as i32)?;
					for &v in mt.vertices.iter().chain(mt.normals.iter()) {
						s.write_vec3_le(v)?;
					}
				}
				Ok(())
			})?;

			write_material_list(body, &self.materials, engine)?;
			engine.geometry_plugins.write_extension(body, self, engine)
		})
	}

	/// Derives a triangle-list mesh per material from the triangles
	pub fn build_meshes(&mut self) {
		let mut by_material: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
		for t in self.triangles.iter() {
			by_material.entry(t.mat_id).or_default().extend_from_slice(&t.v);
		}

		self.mesh_header = Some(MeshHeader {
			flags: MeshHeaderFlags::empty(),
			meshes: by_material.into_iter().map(|(mat, indices)| Mesh {
				material: mat as usize,
				num_indices: indices.len() as u32,
				indices: indices,
			}).collect(),
		});
		self.flags.remove(GeometryFlags::TRISTRIP);
	}

	/// Rebuilds the triangles from the mesh index runs. Degenerate strip
	/// triangles are dropped, as are triangles whose last vertex has its bit
	/// set in `adc_bits` (one bit per index, in mesh order).
	pub fn generate_triangles(&mut self, adc_bits: Option<&[bool]>) {
		let header = match self.mesh_header.as_ref() {
			Some(header) => header,
			None => return,
		};

		let mut triangles = Vec::with_capacity(header.guess_num_triangles());
		let mut base = 0;
		for mesh in header.meshes.iter() {
			let idx = &mesh.indices;
			let mat_id = mesh.material as u16;
			if header.is_tristrip() {
				for j in 0..idx.len().saturating_sub(2) {
					let (a, b, c) = (idx[j], idx[j + 1], idx[j + 2]);
					if a == b || a == c || b == c {
						continue;
					}
					if adc_bits.map_or(false, |bits| bits.get(base + j + 2).copied().unwrap_or(false)) {
						continue;
					}
					let v = if j % 2 == 1 { [b, a, c] } else { [a, b, c] };
					triangles.push(Triangle {
						v: v,
						mat_id: mat_id,
					});
				}
			} else {
				for t in idx.chunks_exact(3) {
					triangles.push(Triangle {
						v: [t[0], t[1], t[2]],
						mat_id: mat_id,
					});
				}
			}
			base += idx.len();
		}

		self.num_triangles = triangles.len();
		self.triangles = triangles;
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	fn quad(engine: &Engine) -> Geometry {
		let mut geo = Geometry::new(engine, 4, 2,
			GeometryFlags::POSITIONS | GeometryFlags::TEXTURED | GeometryFlags::PRELIT | GeometryFlags::NORMALS);
		geo.materials.push(Material::new(engine));
		let mt = &mut geo.morph_targets[0];
		mt.vertices = vec![
			Vec3::new(0.0, 0.0, 0.0),
			Vec3::new(1.0, 0.0, 0.0),
			Vec3::new(1.0, 1.0, 0.0),
			Vec3::new(0.0, 1.0, 0.0),
		];
		mt.normals = vec![Vec3::unit_z(); 4];
		mt.bounding_sphere = Vec4::new(0.5, 0.5, 0.0, 0.75);
		geo.colors = vec![[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255], [255, 255, 255, 128]];
		geo.tex_coords[0] = vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];
		geo.triangles = vec![
			Triangle { v: [0, 1, 2], mat_id: 0 },
			Triangle { v: [0, 2, 3], mat_id: 0 },
		];
		geo
	}

	#[test]
	fn test_geometry_round_trip() {
		let engine = Engine::default();
		let mut geo = quad(&engine);
		geo.build_meshes();

		let mut data = vec![];
		geo.write(&mut data, &engine).unwrap();
		let read = Geometry::read_chunk(&mut Cursor::new(data), &engine).unwrap();
		assert_eq!(geo, read);
	}

	#[test]
	fn test_old_version_surface_props() {
		let mut engine = Engine::default();
		engine.config.version = 0x33002;
		let mut geo = quad(&engine);
		geo.surface_props = [0.5, 0.25, 1.0];

		let mut data = vec![];
		geo.write(&mut data, &engine).unwrap();
		let read = Geometry::read_chunk(&mut Cursor::new(data), &engine).unwrap();
		assert_eq!([0.5, 0.25, 1.0], read.surface_props);
	}

	#[test]
	fn test_bad_vertex_count() {
		let engine = Engine::default();
		let mut data = vec![];
		write_chunk(&mut data, ID_GEOMETRY, &engine.config, |body| {
			write_struct(body, &engine.config, |s| {
				s.write_u32::<LE>(GeometryFlags::POSITIONS.bits())?;
				s.write_i32::<LE>(0)?;
				s.write_i32::<LE>(-4)?;
				s.write_i32::<LE>(1)?;
				Ok(())
			})
		}).unwrap();
		let result = Geometry::read_chunk(&mut Cursor::new(data), &engine);
		assert!(matches!(result, Err(RwError::Malformed(_))));
	}

	fn struct_only(engine: &Engine, flags: u32, num_vertices: i32, num_morph_targets: i32) -> Vec<u8> {
		let mut data = vec![];
		write_chunk(&mut data, ID_GEOMETRY, &engine.config, |body| {
			write_struct(body, &engine.config, |s| {
				s.write_u32::<LE>(flags)?;
				s.write_i32::<LE>(0)?;
				s.write_i32::<LE>(num_vertices)?;
				s.write_i32::<LE>(num_morph_targets)?;
				Ok(s.write_all(&[0; 24])?)
			})
		}).unwrap();
		data
	}

	#[test]
	fn test_native_counts_are_bounded() {
		let engine = Engine::default();
		let native = (GeometryFlags::POSITIONS | GeometryFlags::NATIVE).bits();
		for &(flags, vertices, morphs) in [
			(native, 0x7FFF_FFFF, 1),
			(native, 3, 2),
			(GeometryFlags::POSITIONS.bits() | 0xFF0000, 3, 1),
		].iter() {
			let data = struct_only(&engine, flags, vertices, morphs);
			let result = Geometry::read_chunk(&mut Cursor::new(data), &engine);
			assert!(matches!(result, Err(RwError::Malformed(_))), "{:#X} {} {}", flags, vertices, morphs);
		}
	}

	#[test]
	fn test_build_meshes_groups_materials() {
		let engine = Engine::default();
		let mut geo = quad(&engine);
		geo.triangles[1].mat_id = 1;
		geo.build_meshes();

		let header = geo.mesh_header.as_ref().unwrap();
		assert!(!header.is_tristrip());
		assert_eq!(2, header.meshes.len());
		assert_eq!(vec![0, 2, 3], header.meshes[1].indices);
		assert_eq!(6, header.total_indices());
	}

	#[test]
	fn test_generate_strip_triangles() {
		let engine = Engine::default();
		let mut geo = quad(&engine);
		geo.mesh_header = Some(MeshHeader {
			flags: MeshHeaderFlags::TRISTRIP,
			meshes: vec![Mesh {
				material: 0,
				num_indices: 6,
				indices: vec![0, 1, 2, 2, 3, 0],
			}],
		});
		geo.generate_triangles(None);
		// the strip join at 2, 2 produces two degenerate triangles
		assert_eq!(vec![
			Triangle { v: [0, 1, 2], mat_id: 0 },
			Triangle { v: [3, 2, 0], mat_id: 0 },
		], geo.triangles);

		let bits = [false, false, false, false, false, true];
		geo.generate_triangles(Some(&bits));
		assert_eq!(1, geo.num_triangles);
	}

	#[test]
	fn test_find_min_vert() {
		assert_eq!((3, 5), find_min_vert(&[5, 3, 7, 4]));
		assert_eq!((0, 0), find_min_vert(&[]));
	}
}
