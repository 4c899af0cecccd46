use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::{
	SeekFrom,
	Write
};

use ultraviolet::vec::Vec2;

use rgk_core::io_ext::{
	ReadBinExt,
	WriteBinExt
};

use crate::{
	atomic::Atomic,
	chunk::{
		check_remaining,
		chunk_end,
		expect_chunk,
		find_chunk,
		write_chunk,
		write_struct,
		ChunkHeader,
		RawChunk,
		Source,
		ID_ATOMIC,
		ID_CAMERA,
		ID_CLUMP,
		ID_GEOMETRY,
		ID_GEOMETRYLIST,
		ID_LIGHT,
		ID_STRUCT,
		ID_UVANIMDICT
	},
	engine::Engine,
	error::RwError,
	frame::{
		read_frame_list,
		write_frame_list,
		Frame
	},
	geometry::Geometry,
	platform::Platform,
	plugin::Extensions
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum LightType {
	Directional = 0x01,
	Ambient = 0x02,
	Point = 0x80,
	Spot = 0x81,
	SoftSpot = 0x82,
}

impl LightType {
	pub fn from_u16(value: u16) -> Option<LightType> {
		match value {
			0x01 => Some(LightType::Directional),
			0x02 => Some(LightType::Ambient),
			0x80 => Some(LightType::Point),
			0x81 => Some(LightType::Spot),
			0x82 => Some(LightType::SoftSpot),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
	pub kind: LightType,
	/// Index into the clump's frame list
	pub frame: usize,
	pub radius: f32,
	pub color: [f32; 3],
	/// Negated cosine of the cone angle
	pub minus_cos_angle: f32,
	pub flags: u16,
	pub ext: Extensions,
}

impl Light {
	pub fn new(engine: &Engine, kind: LightType, frame: usize) -> Light {
		Light {
			kind: kind,
			frame: frame,
			radius: 0.0,
			color: [1.0; 3],
			minus_cos_angle: 1.0,
			flags: 0x3,
			ext: engine.light_plugins.construct(),
		}
	}

	/// Reads the body of a Light chunk
	pub fn read(buf: &mut dyn Source, engine: &Engine, frame: usize) -> Result<Light, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		let end = chunk_end(buf, header)?;
		let radius = buf.read_f32::<LE>()?;
		let mut color = [0.0; 3];
		for c in color.iter_mut() {
			*c = buf.read_f32::<LE>()?;
		}
		let angle = buf.read_f32::<LE>()?;
		let flags = buf.read_u16::<LE>()?;
		let raw_kind = buf.read_u16::<LE>()?;
		let kind = LightType::from_u16(raw_kind)
			.ok_or_else(|| RwError::malformed(format!("unknown light type {:#X}", raw_kind)))?;
		buf.seek(SeekFrom::Start(end))?;

		// old streams store the tangent of the cone angle
		let minus_cos_angle = match header.version >= 0x30300 {
			true => angle,
			false => -1.0 / (angle * angle + 1.0).sqrt(),
		};

		let mut light = Light {
			kind: kind,
			frame: frame,
			radius: radius,
			color: color,
			minus_cos_angle: minus_cos_angle,
			flags: flags & 0xFF,
			ext: engine.light_plugins.construct(),
		};
		engine.light_plugins.read_extension(buf, &mut light, engine)?;
		Ok(light)
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		let config = &engine.config;
		write_chunk(buf, ID_LIGHT, config, |body| {
			write_struct(body, config, |s| {
				s.write_f32::<LE>(self.radius)?;
				for &c in self.color.iter() {
					s.write_f32::<LE>(c)?;
				}
				let angle = match config.version >= 0x30300 {
					true => self.minus_cos_angle,
					false => (-self.minus_cos_angle).acos().tan(),
				};
				s.write_f32::<LE>(angle)?;
				s.write_u16::<LE>(self.flags)?;
				s.write_u16::<LE>(self.kind as u16)?;
				Ok(())
			})?;
			engine.light_plugins.write_extension(body, self, engine)
		})
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
	pub frame: usize,
	pub view_window: Vec2,
	pub view_offset: Vec2,
	pub near_plane: f32,
	pub far_plane: f32,
	pub fog_plane: f32,
	/// 1 perspective, 2 parallel
	pub projection: i32,
	pub ext: Extensions,
}

impl Camera {
	pub fn new(engine: &Engine, frame: usize) -> Camera {
		Camera {
			frame: frame,
			view_window: Vec2::one(),
			view_offset: Vec2::zero(),
			near_plane: 0.05,
			far_plane: 10.0,
			fog_plane: 5.0,
			projection: 1,
			ext: engine.camera_plugins.construct(),
		}
	}

	pub fn read(buf: &mut dyn Source, engine: &Engine, frame: usize) -> Result<Camera, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		let end = chunk_end(buf, header)?;
		let mut cam = Camera {
			frame: frame,
			view_window: buf.read_vec2_le()?,
			view_offset: buf.read_vec2_le()?,
			near_plane: buf.read_f32::<LE>()?,
			far_plane: buf.read_f32::<LE>()?,
			fog_plane: buf.read_f32::<LE>()?,
			projection: buf.read_i32::<LE>()?,
			ext: engine.camera_plugins.construct(),
		};
		buf.seek(SeekFrom::Start(end))?;
		engine.camera_plugins.read_extension(buf, &mut cam, engine)?;
		Ok(cam)
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		let config = &engine.config;
		write_chunk(buf, ID_CAMERA, config, |body| {
			write_struct(body, config, |s| {
				s.write_vec2_le(self.view_window)?;
				s.write_vec2_le(self.view_offset)?;
				s.write_f32::<LE>(self.near_plane)?;
				s.write_f32::<LE>(self.far_plane)?;
				s.write_f32::<LE>(self.fog_plane)?;
				s.write_i32::<LE>(self.projection)?;
				Ok(())
			})?;
			engine.camera_plugins.write_extension(body, self, engine)
		})
	}
}

fn read_frame_index(buf: &mut dyn Source, num_frames: usize, what: &str) -> Result<usize, RwError> {
	let header = find_chunk(buf, ID_STRUCT)?;
	let end = chunk_end(buf, header)?;
	let frame = buf.read_i32::<LE>()?;
	buf.seek(SeekFrom::Start(end))?;
	if frame < 0 || frame as usize >= num_frames {
		return Err(RwError::malformed(format!("{} frame index {} out of range", what, frame)));
	}
	Ok(frame as usize)
}

/// A model: its frame hierarchy, geometries and the objects placed on them
#[derive(Clone, Debug, PartialEq)]
pub struct Clump {
	pub frames: Vec<Frame>,
	pub geometries: Vec<Geometry>,
	pub atomics: Vec<Atomic>,
	pub lights: Vec<Light>,
	pub cameras: Vec<Camera>,
	pub ext: Extensions,
}

impl Clump {
	pub fn new(engine: &Engine) -> Clump {
		Clump {
			frames: vec![],
			geometries: vec![],
			atomics: vec![],
			lights: vec![],
			cameras: vec![],
			ext: engine.clump_plugins.construct(),
		}
	}

	/// Reads the body of a Clump chunk
	pub fn read(buf: &mut dyn Source, engine: &Engine) -> Result<Clump, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		let end = chunk_end(buf, header)?;
		let num_atomics = buf.read_i32::<LE>()?;
		let (num_lights, num_cameras) = match header.version > 0x33000 {
			true => (buf.read_i32::<LE>()?, buf.read_i32::<LE>()?),
			false => (0, 0),
		};
		buf.seek(SeekFrom::Start(end))?;
		if num_atomics < 0 || num_lights < 0 || num_cameras < 0 {
			return Err(RwError::malformed(format!("bad clump counts {} {} {}",
				num_atomics, num_lights, num_cameras)));
		}

		let frames = read_frame_list(buf, engine)?;
		if frames.is_empty() {
			return Err(RwError::malformed("clump without frames"));
		}

		let mut geometries = vec![];
		if header.version >= 0x30400 {
			find_chunk(buf, ID_GEOMETRYLIST)?;
			find_chunk(buf, ID_STRUCT)?;
			let num_geometries = buf.read_i32::<LE>()?;
			if num_geometries < 0 {
				return Err(RwError::malformed(format!("bad geometry count {}", num_geometries)));
			}
			check_remaining(buf, num_geometries as u64, ChunkHeader::SIZE as u64, "geometries")?;
			for _ in 0..num_geometries {
				let chunk = find_chunk(buf, ID_GEOMETRY)?;
				let end = chunk_end(buf, chunk)?;
				geometries.push(Geometry::read(buf, engine)?);
				buf.seek(SeekFrom::Start(end))?;
			}
		}

		check_remaining(buf, num_atomics as u64, ChunkHeader::SIZE as u64, "atomics")?;
		let mut atomics = vec![];
		for _ in 0..num_atomics {
			let chunk = find_chunk(buf, ID_ATOMIC)?;
			let end = chunk_end(buf, chunk)?;
			atomics.push(Atomic::read(buf, engine, frames.len(), &mut geometries)?);
			buf.seek(SeekFrom::Start(end))?;
		}

		// each light and camera is a Struct holding the frame index followed by its chunk
		check_remaining(buf, num_lights as u64, 2 * ChunkHeader::SIZE as u64, "lights")?;
		let mut lights = vec![];
		for _ in 0..num_lights {
			let frame = read_frame_index(buf, frames.len(), "light")?;
			let chunk = find_chunk(buf, ID_LIGHT)?;
			let end = chunk_end(buf, chunk)?;
			lights.push(Light::read(buf, engine, frame)?);
			buf.seek(SeekFrom::Start(end))?;
		}

		check_remaining(buf, num_cameras as u64, 2 * ChunkHeader::SIZE as u64, "cameras")?;
		let mut cameras = vec![];
		for _ in 0..num_cameras {
			let frame = read_frame_index(buf, frames.len(), "camera")?;
			let chunk = find_chunk(buf, ID_CAMERA)?;
			let end = chunk_end(buf, chunk)?;
			cameras.push(Camera::read(buf, engine, frame)?);
			buf.seek(SeekFrom::Start(end))?;
		}

		let mut clump = Clump {
			frames: frames,
			geometries: geometries,
			atomics: atomics,
			lights: lights,
			cameras: cameras,
			ext: engine.clump_plugins.construct(),
		};
		engine.clump_plugins.read_extension(buf, &mut clump, engine)?;

		log::debug!("Read clump: {} frames, {} geometries, {} atomics", clump.frames.len(),
			clump.geometries.len(), clump.atomics.len());
		Ok(clump)
	}

	pub fn read_chunk(buf: &mut dyn Source, engine: &Engine) -> Result<Clump, RwError> {
		expect_chunk(buf, ID_CLUMP)?;
		Clump::read(buf, engine)
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		let config = &engine.config;
		write_chunk(buf, ID_CLUMP, config, |body| {
			write_struct(body, config, |s| {
				s.write_i32::<LE>(self.atomics.len() as i32)?;
				if config.version > 0x33000 {
					s.write_i32::<LE>(self.lights.len() as i32)?;
					s.write_i32::<LE>(self.cameras.len() as i32)?;
				}
				Ok(())
			})?;

			write_frame_list(body, &self.frames, engine)?;

			if config.version >= 0x30400 {
				write_chunk(body, ID_GEOMETRYLIST, config, |list| {
					write_struct(list, config, |s| {
						s.write_i32::<LE>(self.geometries.len() as i32)?;
						Ok(())
					})?;
					for geo in self.geometries.iter() {
						geo.write(list, engine)?;
					}
					Ok(())
				})?;
			}

			for atomic in self.atomics.iter() {
				atomic.write(body, engine, &self.geometries)?;
			}

			for light in self.lights.iter() {
				write_struct(body, config, |s| {
					s.write_i32::<LE>(light.frame as i32)?;
					Ok(())
				})?;
				light.write(body, engine)?;
			}

			for cam in self.cameras.iter() {
				write_struct(body, config, |s| {
					s.write_i32::<LE>(cam.frame as i32)?;
					Ok(())
				})?;
				cam.write(body, engine)?;
			}

			engine.clump_plugins.write_extension(body, self, engine)
		})
	}

	/// Platform of the first native geometry, if any
	pub fn find_platform(&self) -> Option<Platform> {
		self.geometries.iter().find_map(Geometry::native_platform)
	}
}

/// A model file: a clump, optionally preceded by a UV animation dictionary
/// that is carried through untouched
#[derive(Clone, Debug, PartialEq)]
pub struct DffFile {
	pub uv_anim_dict: Option<RawChunk>,
	pub clump: Clump,
	/// Header of the clump as it was read
	pub header: ChunkHeader,
}

impl DffFile {
	pub fn read(buf: &mut dyn Source, engine: &Engine) -> Result<DffFile, RwError> {
		let mut header = ChunkHeader::read(buf)?;
		let mut uv_anim_dict = None;
		if header.kind == ID_UVANIMDICT {
			uv_anim_dict = Some(RawChunk::read_body(buf, header)?);
			header = ChunkHeader::read(buf)?;
		}
		if header.kind != ID_CLUMP {
			return Err(RwError::UnexpectedChunk {
				expected: ID_CLUMP,
				found: header.kind,
			});
		}

		Ok(DffFile {
			uv_anim_dict: uv_anim_dict,
			clump: Clump::read(buf, engine)?,
			header: header,
		})
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		if let Some(dict) = self.uv_anim_dict.as_ref() {
			dict.write(buf)?;
		}
		self.clump.write(buf, engine)
	}
}
