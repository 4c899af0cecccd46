use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use crate::{
	chunk::{
		ChunkHeader,
		Source,
		ID_MESH
	},
	engine::Engine,
	error::RwError,
	geometry::{
		Geometry,
		Mesh,
		MeshHeader,
		MeshHeaderFlags
	},
	platform::Platform,
	plugin::{
		PluginList,
		PluginStream
	}
};

/// Native geometry only keeps its indices here on the mobile platform,
/// and in 16 bits
fn stores_native_indices(geo: &Geometry) -> bool {
	geo.native_platform() == Some(Platform::Ogl)
}

struct BinMeshStream;

impl PluginStream<Geometry> for BinMeshStream {
	fn read(&self, buf: &mut dyn Source, header: &ChunkHeader, geo: &mut Geometry, _: &Engine) -> Result<(), RwError> {
		let flags = MeshHeaderFlags::from_bits_truncate(buf.read_u32::<LE>()?);
		let num_meshes = buf.read_u32::<LE>()?;
		let _total_indices = buf.read_u32::<LE>()?;

		let records_size = 12 + num_meshes as u64 * 8;
		if records_size > header.length as u64 {
			return Err(RwError::malformed(format!("{} meshes do not fit the mesh chunk", num_meshes)));
		}
		let native = geo.is_native();
		let has_data = !native || header.length as u64 > records_size;
		let index_size = if native { 2 } else { 4 };

		let mut meshes = Vec::with_capacity(num_meshes as usize);
		let mut data_size = records_size;
		for _ in 0..num_meshes {
			let num_indices = buf.read_u32::<LE>()?;
			let material = buf.read_u32::<LE>()? as usize;
			if material >= geo.materials.len() {
				return Err(RwError::malformed(format!("mesh material {} out of range", material)));
			}

			let mut indices = vec![];
			if has_data {
				data_size += num_indices as u64 * index_size;
				if data_size > header.length as u64 {
					return Err(RwError::malformed("mesh indices overrun the mesh chunk"));
				}
				indices.reserve(num_indices as usize);
				for _ in 0..num_indices {
					let index = match native {
						true => buf.read_u16::<LE>()? as u32,
						false => buf.read_u32::<LE>()?,
					};
					if index > u16::MAX as u32 {
						return Err(RwError::malformed(format!("mesh index {} exceeds 16 bits", index)));
					}
					indices.push(index as u16);
				}
			}

			meshes.push(Mesh {
				material: material,
				num_indices: num_indices,
				indices: indices,
			});
		}

		geo.mesh_header = Some(MeshHeader {
			flags: flags,
			meshes: meshes,
		});
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, geo: &Geometry, _: &Engine) -> Result<(), RwError> {
		let header = match geo.mesh_header.as_ref() {
			Some(header) => header,
			None => return Ok(()),
		};
		let native = geo.is_native();
		let native_indices = stores_native_indices(geo);

		buf.write_u32::<LE>(header.flags.bits())?;
		buf.write_u32::<LE>(header.meshes.len() as u32)?;
		buf.write_u32::<LE>(header.total_indices())?;
		for mesh in header.meshes.iter() {
			buf.write_u32::<LE>(mesh.num_indices)?;
			buf.write_u32::<LE>(mesh.material as u32)?;
			if !native {
				for &i in mesh.indices.iter() {
					buf.write_u32::<LE>(i as u32)?;
				}
			} else if native_indices {
				for &i in mesh.indices.iter() {
					buf.write_u16::<LE>(i)?;
				}
			}
		}
		Ok(())
	}

	fn size(&self, geo: &Geometry, _: &Engine) -> Option<u32> {
		let header = geo.mesh_header.as_ref()?;
		let index_size = match (geo.is_native(), stores_native_indices(geo)) {
			(false, _) => 4,
			(true, true) => 2,
			(true, false) => 0,
		};
		Some(12 + header.meshes.len() as u32 * 8 + header.total_indices() * index_size)
	}
}

pub fn register_bin_mesh(geometries: &mut PluginList<Geometry>) {
	geometries.register_stream(ID_MESH, Box::new(BinMeshStream));
}
