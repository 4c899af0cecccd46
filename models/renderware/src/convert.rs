use crate::{
	adc::unconvert_adc,
	clump::{
		Clump,
		DffFile
	},
	engine::Engine,
	error::RwError,
	lcs::fix_lcs_clump,
	pipeline,
	platform::Platform,
	switch::switch_pipes
};

/// What a model conversion does between reading and writing
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConvertOptions {
	pub uninstance: bool,
	pub instance: bool,
	/// Apply the Liberty City Stories hierarchy fixup
	pub lcs: bool,
	/// Output version, `None` keeps the version of the input
	pub version: Option<u32>,
	pub platform: Platform,
}

impl Default for ConvertOptions {
	fn default() -> Self {
		ConvertOptions {
			uninstance: false,
			instance: false,
			lcs: false,
			version: None,
			platform: Platform::D3D8,
		}
	}
}

fn geometries_of(clump: &Clump, engine: &Engine) -> Result<Vec<(pipeline::PipelineKey, usize)>, RwError> {
	clump.atomics.iter().map(|a| {
		if a.geometry >= clump.geometries.len() {
			return Err(RwError::malformed(format!("atomic geometry index {} out of range", a.geometry)));
		}
		Ok((a.pipeline_key(engine), a.geometry))
	}).collect()
}

/// Moves a model from the platform it was read for to `opts.platform`.
///
/// The engine's config is updated along the way, so the model has to be
/// written with the same engine afterwards.
pub fn convert_dff(dff: &mut DffFile, engine: &mut Engine, opts: &ConvertOptions) -> Result<(), RwError> {
	match opts.version {
		Some(version) => engine.config.version = version,
		None => {
			engine.config.version = dff.header.version;
			engine.config.build = dff.header.build;
		},
	}

	let clump = &mut dff.clump;
	if let Some(found) = clump.find_platform() {
		log::debug!("Input is native to {}", found.name());
		engine.config.platform = found;
		switch_pipes(clump, found, engine)?;
	}

	if opts.lcs && !fix_lcs_clump(clump, engine) {
		log::warn!("No HAnim hierarchy to fix");
	}

	if opts.uninstance {
		for (key, g) in geometries_of(clump, engine)? {
			let geo = &mut clump.geometries[g];
			pipeline::uninstance(key, geo, engine)?;
			if opts.platform != Platform::Ps2 {
				unconvert_adc(geo, engine);
			}
		}
	}

	engine.config.platform = opts.platform;
	switch_pipes(clump, opts.platform, engine)?;

	if opts.instance {
		for (key, g) in geometries_of(clump, engine)? {
			pipeline::instance(key, &mut clump.geometries[g], engine)?;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::{
		atomic::Atomic,
		chunk::{
			ChunkHeader,
			ID_CLUMP
		},
		engine::EngineConfig,
		frame::Frame,
		geometry::{
			Geometry,
			GeometryFlags
		},
		material::Material
	};

	use super::*;

	fn dff(engine: &Engine) -> DffFile {
		let mut clump = Clump::new(engine);
		clump.frames.push(Frame::new(engine));
		let mut geo = Geometry::new(engine, 3, 1, GeometryFlags::POSITIONS);
		geo.materials.push(Material::new(engine));
		geo.triangles[0].v = [0, 1, 2];
		clump.geometries.push(geo);
		clump.atomics.push(Atomic::new(engine, 0, 0));
		DffFile {
			uv_anim_dict: None,
			clump: clump,
			header: ChunkHeader::new(ID_CLUMP, 0, &EngineConfig {
				version: 0x34003,
				build: 0,
				..Default::default()
			}),
		}
	}

	#[test]
	fn test_keep_input_version() {
		let mut engine = Engine::default();
		let mut dff = dff(&engine);
		convert_dff(&mut dff, &mut engine, &ConvertOptions::default()).unwrap();
		assert_eq!(0x34003, engine.config.version);
		assert!(!dff.clump.geometries[0].is_native());
	}

	#[test]
	fn test_instance_for_output() {
		let mut engine = Engine::default();
		let mut dff = dff(&engine);
		let opts = ConvertOptions {
			instance: true,
			version: Some(0x36003),
			platform: Platform::D3D9,
			..Default::default()
		};
		convert_dff(&mut dff, &mut engine, &opts).unwrap();
		assert_eq!(0x36003, engine.config.version);
		assert_eq!(Some(Platform::D3D9), dff.clump.find_platform());

		// a second run uninstances the input and moves it on
		let opts = ConvertOptions {
			uninstance: true,
			instance: true,
			version: Some(0x36003),
			platform: Platform::Xbox,
			..Default::default()
		};
		convert_dff(&mut dff, &mut engine, &opts).unwrap();
		assert_eq!(Some(Platform::Xbox), dff.clump.find_platform());
	}
}
