use byteorder::{
	LE,
	ReadBytesExt
};

use std::io::SeekFrom;

use crate::{
	chunk::{
		ChunkHeader,
		Source,
		ID_NATIVEDATA,
		ID_STRUCT
	},
	d3d::{
		d3d8,
		d3d9,
		xbox
	},
	engine::Engine,
	error::RwError,
	geometry::{
		Geometry,
		GeometryFlags,
		MeshHeader,
		MorphTarget
	},
	platform::Platform,
	plugin::{
		PluginList,
		PluginStream
	},
	ps2,
	wdgl
};

/// Platform specific instanced geometry
#[derive(Clone, Debug, PartialEq)]
pub enum InstanceData {
	Ogl(wdgl::InstanceHeader),
	Ps2(ps2::InstanceHeader),
	Xbox(xbox::InstanceHeader),
	D3D8(d3d8::InstanceHeader),
	D3D9(d3d9::InstanceHeader),
}

impl InstanceData {
	pub fn platform(&self) -> Platform {
		match self {
			InstanceData::Ogl(_) => Platform::Ogl,
			InstanceData::Ps2(_) => Platform::Ps2,
			InstanceData::Xbox(_) => Platform::Xbox,
			InstanceData::D3D8(_) => Platform::D3D8,
			InstanceData::D3D9(_) => Platform::D3D9,
		}
	}

	/// Size of the Native Data body
	pub fn stream_size(&self) -> u32 {
		match self {
			InstanceData::Ogl(h) => h.stream_size(),
			InstanceData::Ps2(h) => h.stream_size(),
			InstanceData::Xbox(h) => h.stream_size(),
			InstanceData::D3D8(h) => h.stream_size(),
			InstanceData::D3D9(h) => h.stream_size(),
		}
	}
}

/// Checks that the generic arrays back every index of the mesh header,
/// so instancing can index them without bounds failures
pub(crate) fn check_generic(geo: &Geometry) -> Result<&MeshHeader, RwError> {
	let header = geo.mesh_header.as_ref()
		.ok_or_else(|| RwError::malformed("geometry has no meshes to instance"))?;
	let n = geo.num_vertices;
	let mt = geo.morph_targets.first()
		.ok_or_else(|| RwError::malformed("geometry has no morph target"))?;

	if mt.vertices.len() < n
		|| (geo.has_normals() && mt.normals.len() < n)
		|| (geo.is_prelit() && geo.colors.len() < n)
		|| geo.tex_coords.len() < geo.num_tex_coords
		|| geo.tex_coords.iter().any(|set| set.len() < n)
	{
		return Err(RwError::malformed(format!("vertex arrays shorter than {} vertices", n)));
	}

	for mesh in header.meshes.iter() {
		if mesh.indices.len() != mesh.num_indices as usize {
			return Err(RwError::malformed("mesh index count does not match its indices"));
		}
		if let Some(&i) = mesh.indices.iter().find(|&&i| i as usize >= n) {
			return Err(RwError::malformed(format!("mesh index {} out of {} vertices", i, n)));
		}
	}
	Ok(header)
}

/// Hands the geometry over to its native representation. Only the mobile
/// platform keeps the mesh indices around.
pub(crate) fn commit_native(geo: &mut Geometry, data: InstanceData) {
	let keep_indices = data.platform() == Platform::Ogl;
	geo.flags.insert(GeometryFlags::NATIVE);
	geo.inst_data = Some(data);
	geo.clear_data();
	if keep_indices {
		return;
	}
	if let Some(header) = geo.mesh_header.as_mut() {
		for mesh in header.meshes.iter_mut() {
			mesh.indices.clear();
		}
	}
}

/// Drops the native data and sizes empty generic arrays for it to be
/// unpacked into
pub(crate) fn release_native(geo: &mut Geometry) {
	geo.flags.remove(GeometryFlags::NATIVE);
	geo.inst_data = None;
	if geo.morph_targets.is_empty() {
		geo.morph_targets.push(MorphTarget::default());
	}
	geo.allocate_data();
}

/// Works out which platform wrote a Native Data body. All platforms but the
/// mobile one start with a Struct of the same library version holding the
/// platform id.
fn sniff_platform(buf: &mut dyn Source, header: &ChunkHeader) -> Result<Platform, RwError> {
	let start = buf.stream_position()?;
	if header.length < ChunkHeader::SIZE + 4 {
		return Ok(Platform::Ogl);
	}

	let inner = ChunkHeader::read_unchecked(buf)?;
	let platform = match inner.kind == ID_STRUCT && inner.version == header.version && inner.build == header.build {
		true => {
			let id = buf.read_u32::<LE>()?;
			Platform::from_u32(id)
				.filter(|p| *p != Platform::Null && *p != Platform::Ogl)
				.ok_or_else(|| RwError::malformed(format!("unknown native data platform {:#X}", id)))?
		},
		false => Platform::Ogl,
	};

	buf.seek(SeekFrom::Start(start))?;
	Ok(platform)
}

struct NativeDataStream;

impl PluginStream<Geometry> for NativeDataStream {
	fn read(&self, buf: &mut dyn Source, header: &ChunkHeader, geo: &mut Geometry, _: &Engine) -> Result<(), RwError> {
		let data = match sniff_platform(buf, header)? {
			Platform::Ogl => InstanceData::Ogl(wdgl::InstanceHeader::read(buf, geo)?),
			Platform::Ps2 => InstanceData::Ps2(ps2::InstanceHeader::read(buf, geo)?),
			Platform::Xbox => InstanceData::Xbox(xbox::InstanceHeader::read(buf)?),
			Platform::D3D8 => InstanceData::D3D8(d3d8::InstanceHeader::read(buf)?),
			Platform::D3D9 => InstanceData::D3D9(d3d9::InstanceHeader::read(buf)?),
			Platform::Null => return Err(RwError::UnsupportedPlatform(Platform::Null)),
		};
		geo.inst_data = Some(data);
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, geo: &Geometry, engine: &Engine) -> Result<(), RwError> {
		let config = &engine.config;
		match geo.inst_data.as_ref() {
			Some(InstanceData::Ogl(h)) => h.write(buf),
			Some(InstanceData::Ps2(h)) => h.write(buf, config),
			Some(InstanceData::Xbox(h)) => h.write(buf, config),
			Some(InstanceData::D3D8(h)) => h.write(buf, config),
			Some(InstanceData::D3D9(h)) => h.write(buf, config),
			None => Ok(()),
		}
	}

	fn size(&self, geo: &Geometry, _: &Engine) -> Option<u32> {
		geo.inst_data.as_ref().map(InstanceData::stream_size)
	}
}

pub fn register_native_data(geometries: &mut PluginList<Geometry>) {
	geometries.register_stream(ID_NATIVEDATA, Box::new(NativeDataStream));
}
