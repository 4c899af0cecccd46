use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use rgk_core::align_up;

use crate::{
	chunk::{
		find_chunk,
		ChunkHeader,
		Source,
		ID_ADC
	},
	engine::Engine,
	error::RwError,
	geometry::{
		Geometry,
		Mesh
	},
	plugin::{
		PluginHandle,
		PluginList,
		PluginStream
	}
};

/// Strip vertices flagged to not close a triangle, one bit per mesh index.
/// Used by PS2 geometry instead of degenerate strip joins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdcData {
	pub formatted: bool,
	pub bits: Vec<bool>,
}

impl AdcData {
	/// Bits of the mesh at `index`, or `None` if the geometry is not ADC formatted
	pub fn bits_for_mesh<'a>(&'a self, geo: &Geometry, index: usize) -> Option<&'a [bool]> {
		if !self.formatted || self.bits.is_empty() {
			return None;
		}
		let header = geo.mesh_header.as_ref()?;
		let start: usize = header.meshes.iter().take(index).map(|m| m.num_indices as usize).sum();
		let len = header.meshes.get(index)?.num_indices as usize;
		self.bits.get(start..start + len)
	}

	/// Clears every bit, one per index of the current mesh header
	pub fn allocate(&mut self, geo: &Geometry) {
		let total = geo.mesh_header.as_ref().map_or(0, |h| h.total_indices());
		self.formatted = true;
		self.bits = vec![false; total as usize];
	}
}

/// Turns ADC strips back into plain strips. Every flagged index is preceded
/// by two copies of the index before it, producing the degenerate triangles
/// that skip the flagged one.
pub fn unconvert_adc(geo: &mut Geometry, engine: &Engine) {
	let handle = engine.handles.adc;
	let adc = match geo.ext.get_mut(handle) {
		Some(adc) if adc.formatted => std::mem::take(adc),
		_ => return,
	};

	if let Some(header) = geo.mesh_header.as_mut() {
		let mut bits = adc.bits.iter().copied();
		for mesh in header.meshes.iter_mut() {
			let mut indices = Vec::with_capacity(mesh.indices.len());
			for (j, &i) in mesh.indices.iter().enumerate() {
				let flagged = bits.next().unwrap_or(false);
				if flagged && j > 0 {
					let prev = mesh.indices[j - 1];
					indices.push(prev);
					indices.push(prev);
				}
				indices.push(i);
			}
			*mesh = Mesh {
				material: mesh.material,
				num_indices: indices.len() as u32,
				indices: indices,
			};
		}
	}
	log::debug!("Removed ADC formatting ({} bits)", adc.bits.len());
}

struct AdcStream {
	handle: PluginHandle<AdcData>,
}

impl PluginStream<Geometry> for AdcStream {
	fn read(&self, buf: &mut dyn Source, _: &ChunkHeader, geo: &mut Geometry, _: &Engine) -> Result<(), RwError> {
		let header = find_chunk(buf, ID_ADC)?;
		let num_bits = buf.read_i32::<LE>()?;
		if num_bits < 0 || 4 + align_up(num_bits as usize, 4) as u64 > header.length as u64 {
			return Err(RwError::malformed(format!("bad ADC bit count {}", num_bits)));
		}

		let mut raw = vec![0; align_up(num_bits as usize, 4)];
		buf.read_exact(&mut raw)?;
		let bits = raw[..num_bits as usize].iter().map(|&b| b != 0).collect();

		if let Some(adc) = geo.ext.get_mut(self.handle) {
			*adc = AdcData {
				formatted: true,
				bits: bits,
			};
		}
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, geo: &Geometry, engine: &Engine) -> Result<(), RwError> {
		let adc = match geo.ext.get(self.handle) {
			Some(adc) => adc,
			None => return Ok(()),
		};
		let config = &engine.config;

		if geo.is_native() {
			ChunkHeader::new(ID_ADC, 4, config).write(buf)?;
			buf.write_i32::<LE>(0)?;
			return Ok(());
		}

		let padded = align_up(adc.bits.len(), 4);
		ChunkHeader::new(ID_ADC, 4 + padded as u32, config).write(buf)?;
		buf.write_i32::<LE>(adc.bits.len() as i32)?;
		let mut raw: Vec<u8> = adc.bits.iter().map(|&b| b as u8).collect();
		raw.resize(padded, 0);
		buf.extend_from_slice(&raw);
		Ok(())
	}

	fn size(&self, geo: &Geometry, _: &Engine) -> Option<u32> {
		let adc = geo.ext.get(self.handle).filter(|adc| adc.formatted)?;
		match geo.is_native() {
			true => Some(16),
			false => Some(16 + align_up(adc.bits.len(), 4) as u32),
		}
	}
}

pub fn register_adc(geometries: &mut PluginList<Geometry>) -> PluginHandle<AdcData> {
	let handle = geometries.register::<AdcData>(ID_ADC);
	geometries.register_stream(ID_ADC, Box::new(AdcStream { handle: handle }));
	handle
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use crate::geometry::{
		GeometryFlags,
		MeshHeader,
		MeshHeaderFlags
	};

	use super::*;

	fn strip_geometry(engine: &Engine) -> Geometry {
		let mut geo = Geometry::new(engine, 5, 0, GeometryFlags::POSITIONS | GeometryFlags::TRISTRIP);
		geo.materials.push(crate::material::Material::new(engine));
		geo.mesh_header = Some(MeshHeader {
			flags: MeshHeaderFlags::TRISTRIP,
			meshes: vec![Mesh {
				material: 0,
				num_indices: 5,
				indices: vec![0, 1, 2, 3, 4],
			}],
		});
		geo
	}

	#[test]
	fn test_unconvert_inserts_degenerates() {
		let engine = Engine::default();
		let mut geo = strip_geometry(&engine);
		*geo.ext.get_mut(engine.handles.adc).unwrap() = AdcData {
			formatted: true,
			bits: vec![false, false, false, true, false],
		};

		unconvert_adc(&mut geo, &engine);
		let mesh = &geo.mesh_header.as_ref().unwrap().meshes[0];
		assert_eq!(vec![0, 1, 2, 2, 2, 3, 4], mesh.indices);
		assert_eq!(7, mesh.num_indices);
		assert_eq!(Some(&AdcData::default()), geo.ext.get(engine.handles.adc));
	}

	#[test]
	fn test_unformatted_is_left_alone() {
		let engine = Engine::default();
		let mut geo = strip_geometry(&engine);
		unconvert_adc(&mut geo, &engine);
		assert_eq!(5, geo.mesh_header.as_ref().unwrap().total_indices());
	}

	#[test]
	fn test_bit_count_beyond_chunk() {
		let engine = Engine::default();
		let mut data = vec![];
		ChunkHeader::new(ID_ADC, 8, &engine.config).write(&mut data).unwrap();
		data.extend_from_slice(&0x7FFF_FFF0i32.to_le_bytes());
		data.extend_from_slice(&[0, 1, 0, 1]);

		let stream = AdcStream {
			handle: engine.handles.adc,
		};
		let mut geo = strip_geometry(&engine);
		let outer = ChunkHeader::new(crate::chunk::ID_EXTENSION, data.len() as u32, &engine.config);
		let result = stream.read(&mut Cursor::new(data), &outer, &mut geo, &engine);
		assert!(matches!(result, Err(RwError::Malformed(_))));
		assert_eq!(Some(&AdcData::default()), geo.ext.get(engine.handles.adc));
	}

	#[test]
	fn test_adc_stream() {
		let engine = Engine::default();
		let mut geo = strip_geometry(&engine);
		*geo.ext.get_mut(engine.handles.adc).unwrap() = AdcData {
			formatted: true,
			bits: vec![false, true, false, false, true],
		};

		let mut data = vec![];
		geo.write(&mut data, &engine).unwrap();
		let read = Geometry::read_chunk(&mut Cursor::new(data), &engine).unwrap();
		assert_eq!(geo.ext.get(engine.handles.adc), read.ext.get(engine.handles.adc));

		let adc = read.ext.get(engine.handles.adc).unwrap();
		assert_eq!(Some(&[false, true, false, false, true][..]), adc.bits_for_mesh(&read, 0));
	}
}
