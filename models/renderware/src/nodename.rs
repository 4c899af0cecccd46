use rgk_core::io_ext::ReadBinExt;

use crate::{
	chunk::{
		ChunkHeader,
		Source,
		ID_NODENAME
	},
	engine::Engine,
	error::RwError,
	frame::Frame,
	plugin::{
		PluginHandle,
		PluginList,
		PluginStream
	}
};

/// Frame names, stored without a terminator
struct NodeNameStream {
	handle: PluginHandle<String>,
}

impl PluginStream<Frame> for NodeNameStream {
	fn read(&self, buf: &mut dyn Source, header: &ChunkHeader, frame: &mut Frame, _: &Engine) -> Result<(), RwError> {
		let name = buf.read_fixed_str(header.length as usize)?;
		if let Some(slot) = frame.ext.get_mut(self.handle) {
			*slot = name;
		}
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, frame: &Frame, _: &Engine) -> Result<(), RwError> {
		if let Some(name) = frame.ext.get(self.handle) {
			buf.extend_from_slice(name.as_bytes());
		}
		Ok(())
	}

	fn size(&self, frame: &Frame, _: &Engine) -> Option<u32> {
		frame.ext.get(self.handle)
			.filter(|name| !name.is_empty())
			.map(|name| name.len() as u32)
	}
}

pub fn register_node_name(frames: &mut PluginList<Frame>) -> PluginHandle<String> {
	let handle = frames.register::<String>(ID_NODENAME);
	frames.register_stream(ID_NODENAME, Box::new(NodeNameStream { handle: handle }));
	handle
}
