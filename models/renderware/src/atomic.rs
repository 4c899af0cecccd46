use bitflags::bitflags;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::{
	SeekFrom,
	Write
};

use crate::{
	chunk::{
		chunk_end,
		find_chunk,
		write_chunk,
		write_struct,
		ChunkHeader,
		Source,
		ID_ATOMIC,
		ID_GEOMETRY,
		ID_RIGHTTORENDER,
		ID_STRUCT
	},
	engine::Engine,
	error::RwError,
	geometry::Geometry,
	pipeline::PipelineKey,
	plugin::{
		Extensions,
		PluginHandle,
		PluginList,
		PluginStream
	}
};

bitflags! {
	pub struct AtomicFlags: u32 {
		const COLLISION_TEST = 0x01;
		const RENDER = 0x04;
	}
}

/// Binds one geometry of the clump to one of its frames
#[derive(Clone, Debug, PartialEq)]
pub struct Atomic {
	pub frame: usize,
	pub geometry: usize,
	pub flags: AtomicFlags,
	/// `None` renders through the default pipeline of the engine's platform
	pub pipeline: Option<PipelineKey>,
	pub ext: Extensions,
}

impl Atomic {
	pub fn new(engine: &Engine, frame: usize, geometry: usize) -> Atomic {
		Atomic {
			frame: frame,
			geometry: geometry,
			flags: AtomicFlags::COLLISION_TEST | AtomicFlags::RENDER,
			pipeline: None,
			ext: engine.atomic_plugins.construct(),
		}
	}

	pub fn pipeline_key(&self, engine: &Engine) -> PipelineKey {
		self.pipeline.unwrap_or_else(|| PipelineKey::default_for(engine.config.platform))
	}

	/// Reads an Atomic chunk body. Streams before 3.4 embed the geometry,
	/// which is appended to `geometries`.
	pub fn read(buf: &mut dyn Source, engine: &Engine, num_frames: usize, geometries: &mut Vec<Geometry>)
		-> Result<Atomic, RwError>
	{
		let header = find_chunk(buf, ID_STRUCT)?;
		let end = chunk_end(buf, header)?;
		let frame = buf.read_i32::<LE>()?;
		let embedded = header.version < 0x30400;
		let (geometry, flags) = match embedded {
			true => (-1, buf.read_u32::<LE>()?),
			false => (buf.read_i32::<LE>()?, buf.read_u32::<LE>()?),
		};
		let _unused = buf.read_u32::<LE>()?;
		buf.seek(SeekFrom::Start(end))?;

		if frame < 0 || frame as usize >= num_frames {
			return Err(RwError::malformed(format!("atomic frame index {} out of range", frame)));
		}

		let geometry = if embedded {
			let chunk = find_chunk(buf, ID_GEOMETRY)?;
			let end = chunk_end(buf, chunk)?;
			geometries.push(Geometry::read(buf, engine)?);
			buf.seek(SeekFrom::Start(end))?;
			geometries.len() - 1
		} else if geometry < 0 || geometry as usize >= geometries.len() {
			return Err(RwError::malformed(format!("atomic geometry index {} out of range", geometry)));
		} else {
			geometry as usize
		};

		let mut atomic = Atomic {
			frame: frame as usize,
			geometry: geometry,
			flags: AtomicFlags::from_bits_truncate(flags),
			pipeline: None,
			ext: engine.atomic_plugins.construct(),
		};
		engine.atomic_plugins.read_extension(buf, &mut atomic, engine)?;

		let rights = atomic.ext.get_mut(engine.handles.right_to_render).and_then(Option::take);
		if let Some(rights) = rights {
			engine.atomic_plugins.assert_rights(&mut atomic, rights.plugin_id, rights.data, engine);
		}

		Ok(atomic)
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine, geometries: &[Geometry]) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		let config = &engine.config;
		let embedded = config.version < 0x30400;
		let geo = geometries.get(self.geometry)
			.ok_or_else(|| RwError::malformed(format!("atomic geometry index {} out of range", self.geometry)))?;

		write_chunk(buf, ID_ATOMIC, config, |body| {
			write_struct(body, config, |s| {
				s.write_i32::<LE>(self.frame as i32)?;
				if !embedded {
					s.write_i32::<LE>(self.geometry as i32)?;
				}
				s.write_u32::<LE>(self.flags.bits())?;
				s.write_u32::<LE>(0)?;
				Ok(())
			})?;
			if embedded {
				geo.write(body, engine)?;
			}
			engine.atomic_plugins.write_extension(body, self, engine)
		})
	}
}

/// Plugin id and data of the pipeline an atomic must render with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RightToRender {
	pub plugin_id: u32,
	pub data: u32,
}

struct RightToRenderStream {
	handle: PluginHandle<Option<RightToRender>>,
}

impl PluginStream<Atomic> for RightToRenderStream {
	fn read(&self, buf: &mut dyn Source, _: &ChunkHeader, atomic: &mut Atomic, _: &Engine) -> Result<(), RwError> {
		let rights = RightToRender {
			plugin_id: buf.read_u32::<LE>()?,
			data: buf.read_u32::<LE>()?,
		};
		if let Some(slot) = atomic.ext.get_mut(self.handle) {
			*slot = Some(rights);
		}
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, atomic: &Atomic, engine: &Engine) -> Result<(), RwError> {
		let key = atomic.pipeline_key(engine);
		buf.write_u32::<LE>(key.plugin_id)?;
		buf.write_u32::<LE>(key.plugin_data)?;
		Ok(())
	}

	fn size(&self, atomic: &Atomic, _: &Engine) -> Option<u32> {
		match atomic.pipeline {
			Some(key) if key.plugin_id != 0 => Some(8),
			_ => None,
		}
	}
}

/// Registers the Right To Render plugin. The slot only holds the record
/// between reading the extension and asserting the rights.
pub fn register_right_to_render(atomics: &mut PluginList<Atomic>) -> PluginHandle<Option<RightToRender>> {
	let handle = atomics.register::<Option<RightToRender>>(ID_RIGHTTORENDER);
	atomics.register_stream(ID_RIGHTTORENDER, Box::new(RightToRenderStream { handle: handle }));
	handle
}
