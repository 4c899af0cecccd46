use crate::{
	clump::Clump,
	engine::Engine,
	error::RwError,
	pipeline::{
		self,
		PipelineKey
	},
	platform::Platform
};

/// Moves every atomic of the clump onto `target`. Geometry native to another
/// platform is uninstanced through that platform's pipeline of the same kind,
/// and explicit pipeline selections are carried over to the target platform.
/// Instancing for the target is left to the caller.
pub fn switch_pipes(clump: &mut Clump, target: Platform, engine: &Engine) -> Result<(), RwError> {
	let mut switched = 0;
	for atomic in clump.atomics.iter_mut() {
		let key = atomic.pipeline_key(engine);
		let geo = clump.geometries.get_mut(atomic.geometry)
			.ok_or_else(|| RwError::malformed(format!("atomic geometry index {} out of range", atomic.geometry)))?;

		if let Some(found) = geo.native_platform().filter(|&p| p != target) {
			pipeline::uninstance(key.on_platform(found), geo, engine)?;
		}

		if let Some(current) = atomic.pipeline.filter(|k| k.platform != target) {
			atomic.pipeline = Some(current.on_platform(target));
			switched += 1;
		}
	}
	log::debug!("Switched {} atomic pipelines to {}", switched, target.name());
	Ok(())
}

/// Pipeline every atomic of the clump renders with, in atomic order
pub fn pipeline_keys(clump: &Clump, engine: &Engine) -> Vec<PipelineKey> {
	clump.atomics.iter().map(|a| a.pipeline_key(engine)).collect()
}

#[cfg(test)]
mod tests {
	use crate::{
		atomic::Atomic,
		frame::Frame,
		geometry::{
			Geometry,
			GeometryFlags
		},
		material::Material
	};

	use super::*;

	fn clump_with_atomic(engine: &Engine, pipeline: Option<PipelineKey>) -> Clump {
		let mut clump = Clump::new(engine);
		clump.frames.push(Frame::new(engine));
		let mut geo = Geometry::new(engine, 3, 1, GeometryFlags::POSITIONS);
		geo.materials.push(Material::new(engine));
		clump.geometries.push(geo);
		let mut atomic = Atomic::new(engine, 0, 0);
		atomic.pipeline = pipeline;
		clump.atomics.push(atomic);
		clump
	}

	#[test]
	fn test_pipeline_follows_target() {
		let engine = Engine::default();
		let mut clump = clump_with_atomic(&engine, Some(PipelineKey::skin_for(Platform::Ps2)));
		switch_pipes(&mut clump, Platform::D3D9, &engine).unwrap();
		assert_eq!(Some(PipelineKey::skin_for(Platform::D3D9)), clump.atomics[0].pipeline);
	}

	#[test]
	fn test_default_pipeline_stays_implicit() {
		let engine = Engine::default();
		let mut clump = clump_with_atomic(&engine, None);
		switch_pipes(&mut clump, Platform::Xbox, &engine).unwrap();
		assert_eq!(None, clump.atomics[0].pipeline);
		assert_eq!(vec![PipelineKey::default_for(Platform::D3D8)], pipeline_keys(&clump, &engine));
	}

	#[test]
	fn test_bad_geometry_index() {
		let engine = Engine::default();
		let mut clump = clump_with_atomic(&engine, None);
		clump.atomics[0].geometry = 3;
		assert!(matches!(switch_pipes(&mut clump, Platform::Ps2, &engine), Err(RwError::Malformed(_))));
	}
}
