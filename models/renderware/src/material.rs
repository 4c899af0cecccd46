use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::Write;

use crate::{
	chunk::{
		find_chunk,
		read_string,
		string_size,
		write_chunk,
		write_string,
		write_struct,
		ChunkHeader,
		Source,
		ID_MATERIAL,
		ID_MATLIST,
		ID_STRUCT,
		ID_TEXTURE
	},
	engine::Engine,
	error::RwError,
	plugin::Extensions
};

#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
	pub filter_addressing: u32,
	pub name: String,
	pub mask: String,
	pub ext: Extensions,
}

impl Texture {
	pub fn new(engine: &Engine, name: &str) -> Texture {
		Texture {
			filter_addressing: 0,
			name: name.to_string(),
			mask: String::new(),
			ext: engine.texture_plugins.construct(),
		}
	}

	/// Reads the body of a Texture chunk
	pub fn read(buf: &mut dyn Source, engine: &Engine) -> Result<Texture, RwError> {
		find_chunk(buf, ID_STRUCT)?;
		let filter_addressing = buf.read_u32::<LE>()?;
		let name = read_string(buf)?;
		let mask = read_string(buf)?;

		let mut tex = Texture {
			filter_addressing: filter_addressing,
			name: name,
			mask: mask,
			ext: engine.texture_plugins.construct(),
		};
		engine.texture_plugins.read_extension(buf, &mut tex, engine)?;
		Ok(tex)
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		let config = &engine.config;
		write_chunk(buf, ID_TEXTURE, config, |body| {
			write_struct(body, config, |s| Ok(s.write_u32::<LE>(self.filter_addressing)?))?;
			write_string(body, &self.name, config)?;
			write_string(body, &self.mask, config)?;
			engine.texture_plugins.write_extension(body, self, engine)
		})
	}

	/// Size of the whole Texture chunk, header included
	pub fn stream_size(&self, engine: &Engine) -> u32 {
		2 * ChunkHeader::SIZE + 4 + string_size(&self.name) + string_size(&self.mask)
			+ ChunkHeader::SIZE + engine.texture_plugins.extension_size(self, engine)
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
	pub flags: i32,
	/// RGBA
	pub color: [u8; 4],
	pub unused: i32,
	pub texture: Option<Texture>,
	/// Ambient, specular and diffuse
	pub surface_props: [f32; 3],
	pub ext: Extensions,
}

impl Material {
	pub fn new(engine: &Engine) -> Material {
		Material {
			flags: 0,
			color: [255; 4],
			unused: 0,
			texture: None,
			surface_props: [1.0; 3],
			ext: engine.material_plugins.construct(),
		}
	}

	/// Reads the body of a Material chunk
	pub fn read(buf: &mut dyn Source, engine: &Engine) -> Result<Material, RwError> {
		let header = find_chunk(buf, ID_STRUCT)?;
		let flags = buf.read_i32::<LE>()?;
		let mut color = [0; 4];
		buf.read_exact(&mut color)?;
		let unused = buf.read_i32::<LE>()?;
		let textured = buf.read_i32::<LE>()? != 0;

		let mut surface_props = [1.0; 3];
		if header.version > 0x30400 {
			for p in surface_props.iter_mut() {
				*p = buf.read_f32::<LE>()?;
			}
		}

		let texture = match textured {
			true => {
				find_chunk(buf, ID_TEXTURE)?;
				Some(Texture::read(buf, engine)?)
			},
			false => None,
		};

		let mut mat = Material {
			flags: flags,
			color: color,
			unused: unused,
			texture: texture,
			surface_props: surface_props,
			ext: engine.material_plugins.construct(),
		};
		engine.material_plugins.read_extension(buf, &mut mat, engine)?;
		Ok(mat)
	}

	pub fn write<W>(&self, buf: &mut W, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		let config = &engine.config;
		write_chunk(buf, ID_MATERIAL, config, |body| {
			write_struct(body, config, |s| {
				s.write_i32::<LE>(self.flags)?;
				s.write_all(&self.color)?;
				s.write_i32::<LE>(self.unused)?;
				s.write_i32::<LE>(self.texture.is_some() as i32)?;
				if config.version > 0x30400 {
					for &p in self.surface_props.iter() {
						s.write_f32::<LE>(p)?;
					}
				}
				Ok(())
			})?;
			if let Some(tex) = self.texture.as_ref() {
				tex.write(body, engine)?;
			}
			engine.material_plugins.write_extension(body, self, engine)
		})
	}
}

/// Reads a material list. Entries other than -1 reuse an earlier material.
pub fn read_material_list(buf: &mut dyn Source, engine: &Engine) -> Result<Vec<Material>, RwError> {
	find_chunk(buf, ID_MATLIST)?;
	let header = find_chunk(buf, ID_STRUCT)?;
	let count = buf.read_i32::<LE>()?;
	if count < 0 || count as u64 * 4 + 4 > header.length as u64 {
		return Err(RwError::malformed(format!("bad material count {}", count)));
	}

	let refs = (0..count).map(|_| buf.read_i32::<LE>())
		.collect::<Result<Vec<_>, _>>()?;

	let mut materials: Vec<Material> = Vec::with_capacity(refs.len());
	for r in refs {
		if r < 0 {
			find_chunk(buf, ID_MATERIAL)?;
			materials.push(Material::read(buf, engine)?);
			continue;
		}
		match materials.get(r as usize) {
			Some(mat) => {
				let mat = mat.clone();
				materials.push(mat);
			},
			None => return Err(RwError::malformed(format!("material reference {} out of range", r))),
		}
	}

	Ok(materials)
}

pub fn write_material_list<W>(buf: &mut W, materials: &[Material], engine: &Engine) -> Result<(), RwError>
where
	W: Write + ?Sized,
{
	let config = &engine.config;
	write_chunk(buf, ID_MATLIST, config, |body| {
		write_struct(body, config, |s| {
			s.write_i32::<LE>(materials.len() as i32)?;
			for _ in materials {
				s.write_i32::<LE>(-1)?;
			}
			Ok(())
		})?;
		for mat in materials {
			mat.write(body, engine)?;
		}
		Ok(())
	})
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	#[test]
	fn test_material_round_trip() {
		let engine = Engine::default();
		let mut mat = Material::new(&engine);
		mat.color = [10, 20, 30, 40];
		mat.surface_props = [0.25, 0.5, 0.75];
		let mut tex = Texture::new(&engine, "body");
		tex.mask = "bodya".to_string();
		tex.filter_addressing = 0x1106;
		mat.texture = Some(tex);

		let mats = vec![mat.clone(), Material::new(&engine)];
		let mut data = vec![];
		write_material_list(&mut data, &mats, &engine).unwrap();
		let read = read_material_list(&mut Cursor::new(data), &engine).unwrap();
		assert_eq!(mats, read);
	}

	#[test]
	fn test_old_material_has_no_surface_props() {
		let mut engine = Engine::default();
		engine.config.version = 0x30400;
		let mut data = vec![];
		Material::new(&engine).write(&mut data, &engine).unwrap();
		// header, struct header, 16 byte struct, empty extension
		assert_eq!(12 + 12 + 16 + 12, data.len());
	}

	#[test]
	fn test_material_reference() {
		let engine = Engine::default();
		let config = &engine.config;
		let mut mat = Material::new(&engine);
		mat.color = [1, 2, 3, 4];

		let mut data = vec![];
		write_chunk(&mut data, ID_MATLIST, config, |body| {
			write_struct(body, config, |s| {
				s.write_i32::<LE>(2)?;
				s.write_i32::<LE>(-1)?;
				s.write_i32::<LE>(0)?;
				Ok(())
			})?;
			mat.write(body, &engine)
		}).unwrap();

		let read = read_material_list(&mut Cursor::new(data.clone()), &engine).unwrap();
		assert_eq!(vec![mat.clone(), mat], read);

		// second entry pointing forward
		data[12 + 12 + 8] = 5;
		let result = read_material_list(&mut Cursor::new(data), &engine);
		assert!(matches!(result, Err(RwError::Malformed(_))));
	}

	#[test]
	fn test_texture_stream_size() {
		let engine = Engine::default();
		let mut tex = Texture::new(&engine, "wheel");
		tex.mask = "wheela".to_string();
		let mut data = vec![];
		tex.write(&mut data, &engine).unwrap();
		assert_eq!(data.len() as u32, tex.stream_size(&engine));
	}
}
