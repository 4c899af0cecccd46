use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::{
	SeekFrom,
	Write
};

use rgk_core::io_ext::ReadBinExt;

use crate::{
	chunk::{
		check_remaining,
		expect_chunk,
		find_chunk,
		write_chunk,
		write_struct,
		ChunkHeader,
		RawChunk,
		Source,
		ID_EXTENSION,
		ID_SKYMIPMAP,
		ID_STRING,
		ID_STRUCT,
		ID_TEXDICTIONARY,
		ID_TEXTURENATIVE
	},
	engine::Engine,
	error::RwError,
	material::Texture,
	platform::Platform,
	plugin::{
		Extensions,
		PluginHandle,
		PluginList,
		PluginStream
	}
};

/// A platform texture. The raster chunks are kept as they were read; only
/// the names and the texture extension are decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeTexture {
	pub platform: Option<Platform>,
	pub texture: Texture,
	pub chunks: Vec<RawChunk>,
}

impl NativeTexture {
	/// Reads the body of a Texture Native chunk
	pub fn read(buf: &mut dyn Source, header: &ChunkHeader, engine: &Engine) -> Result<NativeTexture, RwError> {
		let end = buf.stream_position()? + header.length as u64;
		let mut texture = Texture::new(engine, "");
		let mut chunks = vec![];

		while buf.stream_position()? < end {
			let sub = ChunkHeader::read(buf)?;
			if sub.kind == ID_EXTENSION {
				buf.seek(SeekFrom::Current(-(ChunkHeader::SIZE as i64)))?;
				engine.texture_plugins.read_extension(buf, &mut texture, engine)?;
				break;
			}
			chunks.push(RawChunk::read_body(buf, sub)?);
		}
		buf.seek(SeekFrom::Start(end))?;

		let mut tex = NativeTexture {
			platform: None,
			texture: texture,
			chunks: chunks,
		};
		tex.decode_names()?;
		Ok(tex)
	}

	/// Pulls the platform, names and filter mode out of the raster header.
	/// PS2 textures keep the names in String chunks after the platform
	/// struct, the others in fixed 32 byte fields of it.
	fn decode_names(&mut self) -> Result<(), RwError> {
		let head = match self.chunks.first() {
			Some(c) if c.header.kind == ID_STRUCT && c.data.len() >= 8 => c,
			_ => return Ok(()),
		};
		let mut data = &head.data[..];
		let platform = Platform::from_u32(data.read_u32::<LE>()?);
		self.texture.filter_addressing = data.read_u32::<LE>()?;
		self.platform = platform;

		match platform {
			Some(Platform::Ps2) => {
				let mut names = self.chunks.iter().skip(1).filter(|c| c.header.kind == ID_STRING);
				if let Some(name) = names.next() {
					self.texture.name = (&name.data[..]).read_fixed_str(name.data.len())?;
				}
				if let Some(mask) = names.next() {
					self.texture.mask = (&mask.data[..]).read_fixed_str(mask.data.len())?;
				}
			},
			Some(_) if data.len() >= 64 => {
				self.texture.name = data.read_fixed_str(32)?;
				self.texture.mask = data.read_fixed_str(32)?;
			},
			_ => {},
		}
		Ok(())
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		write_chunk(buf, ID_TEXTURENATIVE, &engine.config, |body| {
			for c in self.chunks.iter() {
				c.write(body)?;
			}
			engine.texture_plugins.write_extension(body, &self.texture, engine)
		})
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct TexDictionary {
	pub device_id: u16,
	pub textures: Vec<NativeTexture>,
	pub ext: Extensions,
}

impl TexDictionary {
	pub fn new(engine: &Engine) -> TexDictionary {
		TexDictionary {
			device_id: 0,
			textures: vec![],
			ext: engine.txd_plugins.construct(),
		}
	}

	/// Reads the body of a Texture Dictionary chunk
	pub fn read(buf: &mut dyn Source, engine: &Engine) -> Result<TexDictionary, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		if header.length < 4 {
			return Err(RwError::malformed("texture dictionary struct too short"));
		}
		let count = buf.read_u16::<LE>()?;
		let device_id = buf.read_u16::<LE>()?;

		check_remaining(buf, count as u64, ChunkHeader::SIZE as u64, "textures")?;
		let mut textures = vec![];
		for _ in 0..count {
			let header = find_chunk(buf, ID_TEXTURENATIVE)?;
			textures.push(NativeTexture::read(buf, &header, engine)?);
		}

		let mut txd = TexDictionary {
			device_id: device_id,
			textures: textures,
			ext: engine.txd_plugins.construct(),
		};
		engine.txd_plugins.read_extension(buf, &mut txd, engine)?;
		log::debug!("Read texture dictionary with {} textures", txd.textures.len());
		Ok(txd)
	}

	pub fn read_chunk(buf: &mut dyn Source, engine: &Engine) -> Result<TexDictionary, RwError> {
		expect_chunk(buf, ID_TEXDICTIONARY)?;
		TexDictionary::read(buf, engine)
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		let config = &engine.config;
		write_chunk(buf, ID_TEXDICTIONARY, config, |body| {
			write_struct(body, config, |s| {
				s.write_u16::<LE>(self.textures.len() as u16)?;
				s.write_u16::<LE>(self.device_id)?;
				Ok(())
			})?;
			for tex in self.textures.iter() {
				tex.write(body, engine)?;
			}
			engine.txd_plugins.write_extension(body, self, engine)
		})
	}
}

/// Mipmap K and L values of PS2 rasters, only streamed for that platform
struct SkyMipmapStream {
	handle: PluginHandle<u32>,
}

impl PluginStream<Texture> for SkyMipmapStream {
	fn read(&self, buf: &mut dyn Source, _: &ChunkHeader, tex: &mut Texture, _: &Engine) -> Result<(), RwError> {
		let value = buf.read_u32::<LE>()? & 0xFFFF;
		if let Some(slot) = tex.ext.get_mut(self.handle) {
			*slot = value;
		}
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, tex: &Texture, _: &Engine) -> Result<(), RwError> {
		buf.write_u32::<LE>(tex.ext.get(self.handle).copied().unwrap_or(0))?;
		Ok(())
	}

	fn size(&self, _: &Texture, engine: &Engine) -> Option<u32> {
		match engine.config.platform {
			Platform::Ps2 => Some(4),
			_ => None,
		}
	}
}

pub fn register_sky_mipmap(textures: &mut PluginList<Texture>) -> PluginHandle<u32> {
	let handle = textures.register::<u32>(ID_SKYMIPMAP);
	textures.register_stream(ID_SKYMIPMAP, Box::new(SkyMipmapStream { handle: handle }));
	handle
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use rgk_core::io_ext::WriteBinExt;

	use crate::platform::FOURCC_PS2;

	use super::*;

	fn d3d8_texture(engine: &Engine, name: &str) -> NativeTexture {
		let mut data = vec![];
		data.write_u32::<LE>(Platform::D3D8 as u32).unwrap();
		data.write_u32::<LE>(0x1106).unwrap();
		data.write_fixed_str(name, 32).unwrap();
		data.write_fixed_str("", 32).unwrap();
		data.extend_from_slice(&[0xAB; 20]);

		let mut tex = NativeTexture {
			platform: None,
			texture: Texture::new(engine, ""),
			chunks: vec![RawChunk {
				header: ChunkHeader::new(ID_STRUCT, data.len() as u32, &engine.config),
				data: data,
			}],
		};
		tex.decode_names().unwrap();
		tex
	}

	#[test]
	fn test_dictionary_passthrough() {
		let engine = Engine::default();
		let mut txd = TexDictionary::new(&engine);
		txd.device_id = 1;
		txd.textures.push(d3d8_texture(&engine, "wheel"));
		txd.textures.push(d3d8_texture(&engine, "body"));

		let mut data = vec![];
		txd.write(&mut data, &engine).unwrap();
		let read = TexDictionary::read_chunk(&mut Cursor::new(data.clone()), &engine).unwrap();
		assert_eq!(txd, read);
		assert_eq!("body", read.textures[1].texture.name);
		assert_eq!(Some(Platform::D3D8), read.textures[0].platform);

		let mut again = vec![];
		read.write(&mut again, &engine).unwrap();
		assert_eq!(data, again);
	}

	#[test]
	fn test_ps2_names_and_mipmap() {
		let mut engine = Engine::default();
		engine.config.platform = Platform::Ps2;
		let config = engine.config;

		let mut head = vec![];
		head.write_u32::<LE>(FOURCC_PS2).unwrap();
		head.write_u32::<LE>(0x2).unwrap();
		let mut chunks = vec![RawChunk {
			header: ChunkHeader::new(ID_STRUCT, 8, &config),
			data: head,
		}];
		for s in ["glass", "glassa"] {
			let mut raw = vec![];
			raw.write_fixed_str(s, 8).unwrap();
			chunks.push(RawChunk {
				header: ChunkHeader::new(ID_STRING, 8, &config),
				data: raw,
			});
		}

		let mut tex = NativeTexture {
			platform: None,
			texture: Texture::new(&engine, ""),
			chunks: chunks,
		};
		*tex.texture.ext.get_mut(engine.handles.sky_mipmap).unwrap() = 0xFC0;
		let mut data = vec![];
		tex.write(&mut data, &engine).unwrap();

		let mut cursor = Cursor::new(data);
		let header = find_chunk(&mut cursor, ID_TEXTURENATIVE).unwrap();
		let read = NativeTexture::read(&mut cursor, &header, &engine).unwrap();
		assert_eq!(Some(Platform::Ps2), read.platform);
		assert_eq!("glass", read.texture.name);
		assert_eq!("glassa", read.texture.mask);
		assert_eq!(Some(&0xFC0), read.texture.ext.get(engine.handles.sky_mipmap));
	}
}
