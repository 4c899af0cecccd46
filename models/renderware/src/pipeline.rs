use std::collections::HashMap;

use crate::{
	chunk::{
		ID_MATFX,
		ID_SKIN
	},
	d3d::{
		d3d8,
		d3d9,
		xbox
	},
	engine::Engine,
	error::RwError,
	geometry::Geometry,
	platform::Platform,
	ps2,
	wdgl
};

/// Identifies an object pipeline by its platform and the plugin that owns it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
	pub platform: Platform,
	pub plugin_id: u32,
	pub plugin_data: u32,
}

impl PipelineKey {
	pub fn default_for(platform: Platform) -> PipelineKey {
		PipelineKey {
			platform: platform,
			plugin_id: 0,
			plugin_data: 0,
		}
	}

	pub fn skin_for(platform: Platform) -> PipelineKey {
		PipelineKey {
			platform: platform,
			plugin_id: ID_SKIN,
			plugin_data: 1,
		}
	}

	pub fn matfx_for(platform: Platform) -> PipelineKey {
		PipelineKey {
			platform: platform,
			plugin_id: ID_MATFX,
			plugin_data: 0,
		}
	}

	/// The pipeline of the same kind on another platform
	pub fn on_platform(self, platform: Platform) -> PipelineKey {
		match self.plugin_id {
			ID_SKIN => PipelineKey::skin_for(platform),
			ID_MATFX => PipelineKey::matfx_for(platform),
			_ => PipelineKey::default_for(platform),
		}
	}
}

/// Converts geometry between its generic form and one platform's native form
pub trait ObjPipeline {
	fn key(&self) -> PipelineKey;

	/// Builds the native data of a generic geometry. Implementations must
	/// leave the geometry untouched when they fail.
	fn instance(&self, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError>;

	/// Rebuilds the generic arrays and meshes from the native data
	fn uninstance(&self, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError>;
}

/// Object pipelines by platform and owning plugin
#[derive(Default)]
pub struct PipelineTable {
	pipelines: HashMap<(Platform, u32), Box<dyn ObjPipeline>>,
}

impl PipelineTable {
	pub fn new() -> PipelineTable {
		PipelineTable::default()
	}

	/// Default, skin and MatFX pipelines for every supported platform
	pub fn with_builtin() -> PipelineTable {
		let mut table = PipelineTable::new();
		for pipe in d3d8::pipelines()
			.into_iter()
			.chain(d3d9::pipelines())
			.chain(xbox::pipelines())
			.chain(wdgl::pipelines())
			.chain(ps2::pipelines())
		{
			table.register(pipe);
		}
		table
	}

	pub fn register(&mut self, pipe: Box<dyn ObjPipeline>) {
		let key = pipe.key();
		self.pipelines.insert((key.platform, key.plugin_id), pipe);
	}

	/// Looks up a pipeline, falling back to the platform's default one
	pub fn get(&self, key: PipelineKey) -> Result<&dyn ObjPipeline, RwError> {
		self.pipelines.get(&(key.platform, key.plugin_id))
			.or_else(|| self.pipelines.get(&(key.platform, 0)))
			.map(|p| p.as_ref())
			.ok_or(RwError::UnsupportedPlatform(key.platform))
	}

	pub fn has_platform(&self, platform: Platform) -> bool {
		self.pipelines.contains_key(&(platform, 0))
	}
}

/// Instances `geo` through the pipeline `key`. Geometry that is already native
/// for the same platform is left alone.
pub fn instance(key: PipelineKey, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
	let pipe = engine.pipelines.get(key)?;
	match geo.native_platform() {
		Some(found) if found == key.platform => return Ok(()),
		Some(found) => return Err(RwError::PlatformMismatch {
			expected: key.platform,
			found: found,
		}),
		None => {},
	}

	if geo.mesh_header.is_none() {
		geo.build_meshes();
	}
	log::debug!("Instancing {} vertices for {}", geo.num_vertices, key.platform.name());
	pipe.instance(geo, engine)
}

/// Turns native geometry of the pipeline's platform back into generic geometry
pub fn uninstance(key: PipelineKey, geo: &mut Geometry, engine: &Engine) -> Result<(), RwError> {
	match geo.native_platform() {
		None => return Ok(()),
		Some(found) if found != key.platform => return Err(RwError::PlatformMismatch {
			expected: key.platform,
			found: found,
		}),
		Some(_) => {},
	}

	let pipe = engine.pipelines.get(key)?;
	log::debug!("Uninstancing {} geometry", key.platform.name());
	pipe.uninstance(geo, engine)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builtin_table() {
		let table = PipelineTable::with_builtin();
		for p in Platform::ALL {
			assert!(table.has_platform(p));
			for key in [PipelineKey::default_for(p), PipelineKey::skin_for(p), PipelineKey::matfx_for(p)] {
				assert_eq!(key, table.get(key).unwrap().key());
			}
		}
		assert!(matches!(table.get(PipelineKey::default_for(Platform::Null)),
			Err(RwError::UnsupportedPlatform(Platform::Null))));
	}

	#[test]
	fn test_fallback_to_default() {
		let table = PipelineTable::with_builtin();
		let key = PipelineKey {
			platform: Platform::D3D9,
			plugin_id: 0x9999,
			plugin_data: 0,
		};
		assert_eq!(PipelineKey::default_for(Platform::D3D9), table.get(key).unwrap().key());
	}

	#[test]
	fn test_on_platform() {
		assert_eq!(PipelineKey::skin_for(Platform::Ps2), PipelineKey::skin_for(Platform::Xbox).on_platform(Platform::Ps2));
		assert_eq!(PipelineKey::default_for(Platform::Ogl), PipelineKey::default_for(Platform::D3D8).on_platform(Platform::Ogl));
	}
}
