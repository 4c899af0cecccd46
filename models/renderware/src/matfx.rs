use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use crate::{
	atomic::Atomic,
	chunk::{
		find_chunk,
		ChunkHeader,
		Source,
		ID_MATFX,
		ID_TEXTURE
	},
	engine::Engine,
	error::RwError,
	material::{
		Material,
		Texture
	},
	pipeline::PipelineKey,
	plugin::{
		PluginHandle,
		PluginList,
		PluginStream
	}
};

/// Combination of effects a material is set up for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MatFXType {
	Nothing = 0,
	BumpMap,
	EnvMap,
	BumpEnvMap,
	Dual,
	UvTransform,
	DualUvTransform,
}

impl MatFXType {
	pub fn from_u32(value: u32) -> Option<MatFXType> {
		match value {
			0 => Some(MatFXType::Nothing),
			1 => Some(MatFXType::BumpMap),
			2 => Some(MatFXType::EnvMap),
			3 => Some(MatFXType::BumpEnvMap),
			4 => Some(MatFXType::Dual),
			5 => Some(MatFXType::UvTransform),
			6 => Some(MatFXType::DualUvTransform),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
	Nothing,
	BumpMap {
		coefficient: f32,
		bumped_texture: Option<Texture>,
		texture: Option<Texture>,
	},
	EnvMap {
		coefficient: f32,
		fb_alpha: i32,
		texture: Option<Texture>,
	},
	Dual {
		src_blend: i32,
		dst_blend: i32,
		texture: Option<Texture>,
	},
	/// The transform matrices are runtime state and never streamed
	UvTransform,
}

impl Effect {
	fn kind(&self) -> MatFXType {
		match self {
			Effect::Nothing => MatFXType::Nothing,
			Effect::BumpMap { .. } => MatFXType::BumpMap,
			Effect::EnvMap { .. } => MatFXType::EnvMap,
			Effect::Dual { .. } => MatFXType::Dual,
			Effect::UvTransform => MatFXType::UvTransform,
		}
	}

	fn empty(kind: MatFXType) -> Effect {
		match kind {
			MatFXType::BumpMap => Effect::BumpMap {
				coefficient: 0.0,
				bumped_texture: None,
				texture: None,
			},
			MatFXType::EnvMap => Effect::EnvMap {
				coefficient: 0.0,
				fb_alpha: 0,
				texture: None,
			},
			MatFXType::Dual => Effect::Dual {
				src_blend: 0,
				dst_blend: 0,
				texture: None,
			},
			MatFXType::UvTransform => Effect::UvTransform,
			_ => Effect::Nothing,
		}
	}

	fn read(buf: &mut dyn Source, kind: MatFXType, engine: &Engine) -> Result<Effect, RwError> {
		let effect = match kind {
			MatFXType::BumpMap => {
				let coefficient = buf.read_f32::<LE>()?;
				let bumped_texture = read_optional_texture(buf, engine)?;
				let texture = read_optional_texture(buf, engine)?;
				Effect::BumpMap {
					coefficient: coefficient,
					bumped_texture: bumped_texture,
					texture: texture,
				}
			},
			MatFXType::EnvMap => {
				let coefficient = buf.read_f32::<LE>()?;
				let fb_alpha = buf.read_i32::<LE>()?;
				Effect::EnvMap {
					coefficient: coefficient,
					fb_alpha: fb_alpha,
					texture: read_optional_texture(buf, engine)?,
				}
			},
			MatFXType::Dual => {
				let src_blend = buf.read_i32::<LE>()?;
				let dst_blend = buf.read_i32::<LE>()?;
				Effect::Dual {
					src_blend: src_blend,
					dst_blend: dst_blend,
					texture: read_optional_texture(buf, engine)?,
				}
			},
			other => Effect::empty(other),
		};
		Ok(effect)
	}

	fn write(&self, buf: &mut Vec<u8>, engine: &Engine) -> Result<(), RwError> {
		buf.write_u32::<LE>(self.kind() as u32)?;
		match self {
			Effect::BumpMap { coefficient, bumped_texture, texture } => {
				buf.write_f32::<LE>(*coefficient)?;
				write_optional_texture(buf, bumped_texture.as_ref(), engine)?;
				write_optional_texture(buf, texture.as_ref(), engine)?;
			},
			Effect::EnvMap { coefficient, fb_alpha, texture } => {
				buf.write_f32::<LE>(*coefficient)?;
				buf.write_i32::<LE>(*fb_alpha)?;
				write_optional_texture(buf, texture.as_ref(), engine)?;
			},
			Effect::Dual { src_blend, dst_blend, texture } => {
				buf.write_i32::<LE>(*src_blend)?;
				buf.write_i32::<LE>(*dst_blend)?;
				write_optional_texture(buf, texture.as_ref(), engine)?;
			},
			Effect::Nothing | Effect::UvTransform => {},
		}
		Ok(())
	}

	fn size(&self, engine: &Engine) -> u32 {
		let tex_size = |t: &Option<Texture>| 4 + t.as_ref().map_or(0, |t| t.stream_size(engine));
		4 + match self {
			Effect::BumpMap { bumped_texture, texture, .. } => 4 + tex_size(bumped_texture) + tex_size(texture),
			Effect::EnvMap { texture, .. } => 8 + tex_size(texture),
			Effect::Dual { texture, .. } => 8 + tex_size(texture),
			Effect::Nothing | Effect::UvTransform => 0,
		}
	}
}

fn read_optional_texture(buf: &mut dyn Source, engine: &Engine) -> Result<Option<Texture>, RwError> {
	if buf.read_i32::<LE>()? == 0 {
		return Ok(None);
	}
	find_chunk(buf, ID_TEXTURE)?;
	Ok(Some(Texture::read(buf, engine)?))
}

fn write_optional_texture(buf: &mut Vec<u8>, tex: Option<&Texture>, engine: &Engine) -> Result<(), RwError> {
	buf.write_i32::<LE>(tex.is_some() as i32)?;
	match tex {
		Some(tex) => tex.write(buf, engine),
		None => Ok(()),
	}
}

/// Material effects, at most two passes
#[derive(Clone, Debug, PartialEq)]
pub struct MatFX {
	pub kind: MatFXType,
	pub effects: [Effect; 2],
}

impl MatFX {
	/// Sets up empty effect slots for a combination
	pub fn new(kind: MatFXType) -> MatFX {
		let (first, second) = match kind {
			MatFXType::BumpEnvMap => (MatFXType::BumpMap, MatFXType::EnvMap),
			MatFXType::DualUvTransform => (MatFXType::UvTransform, MatFXType::Dual),
			other => (other, MatFXType::Nothing),
		};
		MatFX {
			kind: kind,
			effects: [Effect::empty(first), Effect::empty(second)],
		}
	}

	/// Slot holding the effect of type `kind`
	pub fn effect_index(&self, kind: MatFXType) -> Option<usize> {
		self.effects.iter().position(|e| e.kind() == kind)
	}
}

struct MaterialMatFXStream {
	handle: PluginHandle<Option<MatFX>>,
}

impl PluginStream<Material> for MaterialMatFXStream {
	fn read(&self, buf: &mut dyn Source, _: &ChunkHeader, mat: &mut Material, engine: &Engine) -> Result<(), RwError> {
		let raw = buf.read_u32::<LE>()?;
		let kind = MatFXType::from_u32(raw)
			.ok_or_else(|| RwError::malformed(format!("unknown material effect {}", raw)))?;
		let mut matfx = MatFX::new(kind);

		for _ in 0..2 {
			let raw = buf.read_u32::<LE>()?;
			let kind = MatFXType::from_u32(raw)
				.ok_or_else(|| RwError::malformed(format!("unknown material effect {}", raw)))?;
			let effect = Effect::read(buf, kind, engine)?;
			if kind == MatFXType::Nothing || kind == MatFXType::UvTransform {
				continue;
			}
			match matfx.effect_index(kind) {
				Some(i) => matfx.effects[i] = effect,
				None => return Err(RwError::malformed(format!("effect {:?} does not belong to {:?}", kind,
					matfx.kind))),
			}
		}

		if let Some(slot) = mat.ext.get_mut(self.handle) {
			*slot = Some(matfx);
		}
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, mat: &Material, engine: &Engine) -> Result<(), RwError> {
		if let Some(matfx) = mat.ext.get(self.handle).and_then(Option::as_ref) {
			buf.write_u32::<LE>(matfx.kind as u32)?;
			for effect in matfx.effects.iter() {
				effect.write(buf, engine)?;
			}
		}
		Ok(())
	}

	fn size(&self, mat: &Material, engine: &Engine) -> Option<u32> {
		let matfx = mat.ext.get(self.handle)?.as_ref()?;
		Some(4 + matfx.effects.iter().map(|e| e.size(engine)).sum::<u32>())
	}
}

/// Atomic side of the plugin: a flag that routes the atomic through the
/// MatFX pipeline
struct AtomicMatFXStream {
	handle: PluginHandle<bool>,
}

impl PluginStream<Atomic> for AtomicMatFXStream {
	fn read(&self, buf: &mut dyn Source, _: &ChunkHeader, atomic: &mut Atomic, engine: &Engine) -> Result<(), RwError> {
		if buf.read_i32::<LE>()? != 0 {
			enable_effects(atomic, self.handle, engine);
		}
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, atomic: &Atomic, _: &Engine) -> Result<(), RwError> {
		let enabled = atomic.ext.get(self.handle).copied().unwrap_or(false);
		buf.write_i32::<LE>(enabled as i32)?;
		Ok(())
	}

	fn size(&self, atomic: &Atomic, engine: &Engine) -> Option<u32> {
		let enabled = atomic.ext.get(self.handle).copied().unwrap_or(false);
		match enabled || engine.config.version < 0x34000 {
			true => Some(4),
			false => None,
		}
	}
}

/// Flags the atomic and selects the MatFX pipeline of the current platform
pub fn enable_effects(atomic: &mut Atomic, handle: PluginHandle<bool>, engine: &Engine) {
	if let Some(flag) = atomic.ext.get_mut(handle) {
		*flag = true;
	}
	atomic.pipeline = Some(PipelineKey::matfx_for(engine.config.platform));
}

pub fn register_matfx(atomics: &mut PluginList<Atomic>, materials: &mut PluginList<Material>)
	-> (PluginHandle<bool>, PluginHandle<Option<MatFX>>)
{
	let atomic = atomics.register::<bool>(ID_MATFX);
	atomics.register_stream(ID_MATFX, Box::new(AtomicMatFXStream { handle: atomic }));

	let material = materials.register::<Option<MatFX>>(ID_MATFX);
	materials.register_stream(ID_MATFX, Box::new(MaterialMatFXStream { handle: material }));

	(atomic, material)
}
