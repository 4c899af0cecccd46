use crate::{
	adc::{
		register_adc,
		AdcData
	},
	atomic::{
		register_right_to_render,
		Atomic,
		RightToRender
	},
	binmesh::register_bin_mesh,
	clump::{
		Camera,
		Clump,
		Light
	},
	d3d::xbox::register_vertex_format,
	frame::Frame,
	geometry::Geometry,
	hanim::{
		register_hanim,
		HAnimData
	},
	material::{
		Material,
		Texture
	},
	matfx::{
		register_matfx,
		MatFX
	},
	native::register_native_data,
	nodename::register_node_name,
	pipeline::PipelineTable,
	platform::Platform,
	plugin::{
		PluginHandle,
		PluginList
	},
	skin::{
		register_skin,
		Skin
	},
	txd::{
		register_sky_mipmap,
		TexDictionary
	}
};

/// Stream and target settings shared by every read, write and instance call
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
	/// Library version written into new chunk headers
	pub version: u32,
	pub build: u32,
	/// Platform new pipelines and platform dependent plugins target
	pub platform: Platform,
	/// Whether frames write their HAnim extension
	pub stream_hanim: bool,
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfig {
			version: 0x36003,
			build: 0xFFFF,
			platform: Platform::D3D8,
			stream_hanim: true,
		}
	}
}

/// Typed keys of the built-in plugin slots
#[derive(Clone, Copy, Debug)]
pub struct Handles {
	pub right_to_render: PluginHandle<Option<RightToRender>>,
	pub skin: PluginHandle<Option<Skin>>,
	pub adc: PluginHandle<AdcData>,
	pub vertex_format: PluginHandle<u32>,
	pub hanim: PluginHandle<HAnimData>,
	pub node_name: PluginHandle<String>,
	pub atomic_matfx: PluginHandle<bool>,
	pub material_matfx: PluginHandle<Option<MatFX>>,
	pub sky_mipmap: PluginHandle<u32>,
}

/// Owns every plugin list and the pipeline table
pub struct Engine {
	pub config: EngineConfig,
	pub frame_plugins: PluginList<Frame>,
	pub geometry_plugins: PluginList<Geometry>,
	pub material_plugins: PluginList<Material>,
	pub texture_plugins: PluginList<Texture>,
	pub atomic_plugins: PluginList<Atomic>,
	pub clump_plugins: PluginList<Clump>,
	pub light_plugins: PluginList<Light>,
	pub camera_plugins: PluginList<Camera>,
	pub txd_plugins: PluginList<TexDictionary>,
	pub pipelines: PipelineTable,
	pub handles: Handles,
}

impl Engine {
	/// Creates an engine with all built-in plugins and pipelines registered.
	/// Plugins are registered before any object exists, so every extension
	/// slot layout is fixed from here on.
	pub fn new(config: EngineConfig) -> Engine {
		let mut frame_plugins = PluginList::new();
		let mut geometry_plugins = PluginList::new();
		let mut material_plugins = PluginList::new();
		let mut texture_plugins = PluginList::new();
		let mut atomic_plugins = PluginList::new();

		register_bin_mesh(&mut geometry_plugins);
		register_native_data(&mut geometry_plugins);
		let skin = register_skin(&mut geometry_plugins, &mut atomic_plugins);
		let adc = register_adc(&mut geometry_plugins);
		let vertex_format = register_vertex_format(&mut geometry_plugins);

		let hanim = register_hanim(&mut frame_plugins);
		let node_name = register_node_name(&mut frame_plugins);

		let (atomic_matfx, material_matfx) = register_matfx(&mut atomic_plugins, &mut material_plugins);
		let right_to_render = register_right_to_render(&mut atomic_plugins);

		let sky_mipmap = register_sky_mipmap(&mut texture_plugins);

		Engine {
			config: config,
			frame_plugins: frame_plugins,
			geometry_plugins: geometry_plugins,
			material_plugins: material_plugins,
			texture_plugins: texture_plugins,
			atomic_plugins: atomic_plugins,
			clump_plugins: PluginList::new(),
			light_plugins: PluginList::new(),
			camera_plugins: PluginList::new(),
			txd_plugins: PluginList::new(),
			pipelines: PipelineTable::with_builtin(),
			handles: Handles {
				right_to_render: right_to_render,
				skin: skin,
				adc: adc,
				vertex_format: vertex_format,
				hanim: hanim,
				node_name: node_name,
				atomic_matfx: atomic_matfx,
				material_matfx: material_matfx,
				sky_mipmap: sky_mipmap,
			},
		}
	}
}

impl Default for Engine {
	fn default() -> Self {
		Engine::new(EngineConfig::default())
	}
}

#[cfg(test)]
mod tests {
	use crate::chunk::{
		ID_ADC,
		ID_HANIM,
		ID_MATFX,
		ID_MESH,
		ID_NATIVEDATA,
		ID_NODENAME,
		ID_RIGHTTORENDER,
		ID_SKIN,
		ID_SKYMIPMAP,
		ID_VERTEXFMT
	};

	use super::*;

	#[test]
	fn test_registration_order() {
		let engine = Engine::default();
		assert_eq!(vec![ID_MESH, ID_NATIVEDATA, ID_SKIN, ID_ADC, ID_VERTEXFMT],
			engine.geometry_plugins.ids().collect::<Vec<_>>());
		assert_eq!(vec![ID_HANIM, ID_NODENAME], engine.frame_plugins.ids().collect::<Vec<_>>());
		assert_eq!(vec![ID_SKIN, ID_MATFX, ID_RIGHTTORENDER], engine.atomic_plugins.ids().collect::<Vec<_>>());
		assert_eq!(vec![ID_MATFX], engine.material_plugins.ids().collect::<Vec<_>>());
		assert_eq!(vec![ID_SKYMIPMAP], engine.texture_plugins.ids().collect::<Vec<_>>());
	}

	#[test]
	fn test_default_slots() {
		let engine = Engine::default();
		let frame = Frame::new(&engine);
		assert_eq!(Some(&String::new()), frame.ext.get(engine.handles.node_name));
		assert_eq!(Some(-1), frame.ext.get(engine.handles.hanim).map(|h| h.id));

		let atomic = Atomic::new(&engine, 0, 0);
		assert_eq!(Some(&false), atomic.ext.get(engine.handles.atomic_matfx));
	}
}
