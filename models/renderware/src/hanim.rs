use bitflags::bitflags;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use crate::{
	chunk::{
		ChunkHeader,
		Source,
		ID_HANIM
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

pub const HANIM_VERSION: i32 = 0x100;

bitflags! {
	pub struct NodeFlags: i32 {
		const POP = 0x01;
		const PUSH = 0x02;
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HAnimNode {
	pub id: i32,
	pub index: i32,
	pub flags: NodeFlags,
}

/// Bone hierarchy rooted at the frame carrying it
#[derive(Clone, Debug, PartialEq)]
pub struct HAnimHierarchy {
	pub flags: i32,
	pub max_key_frame_size: i32,
	pub nodes: Vec<HAnimNode>,
}

/// HAnim plugin data of a frame: its bone id and, on the root bone, the hierarchy
#[derive(Clone, Debug, PartialEq)]
pub struct HAnimData {
	pub id: i32,
	pub hierarchy: Option<HAnimHierarchy>,
}

impl Default for HAnimData {
	fn default() -> Self {
		HAnimData {
			id: -1,
			hierarchy: None,
		}
	}
}

struct HAnimStream {
	handle: PluginHandle<HAnimData>,
}

impl PluginStream<Frame> for HAnimStream {
	fn read(&self, buf: &mut dyn Source, header: &ChunkHeader, frame: &mut Frame, _: &Engine) -> Result<(), RwError> {
		let version = buf.read_i32::<LE>()?;
		if version != HANIM_VERSION {
			log::warn!("Unexpected HAnim version {:#X}", version);
		}
		let id = buf.read_i32::<LE>()?;
		let num_nodes = buf.read_i32::<LE>()?;

		let mut hierarchy = None;
		if num_nodes != 0 {
			if num_nodes < 0 || 20 + num_nodes as u64 * 12 > header.length as u64 {
				return Err(RwError::malformed(format!("bad HAnim node count {}", num_nodes)));
			}
			let flags = buf.read_i32::<LE>()?;
			let max_key_frame_size = buf.read_i32::<LE>()?;
			let mut nodes = Vec::with_capacity(num_nodes as usize);
			for _ in 0..num_nodes {
				nodes.push(HAnimNode {
					id: buf.read_i32::<LE>()?,
					index: buf.read_i32::<LE>()?,
					flags: NodeFlags::from_bits_truncate(buf.read_i32::<LE>()?),
				});
			}
			hierarchy = Some(HAnimHierarchy {
				flags: flags,
				max_key_frame_size: max_key_frame_size,
				nodes: nodes,
			});
		}

		if let Some(slot) = frame.ext.get_mut(self.handle) {
			*slot = HAnimData {
				id: id,
				hierarchy: hierarchy,
			};
		}
		Ok(())
	}

	fn write(&self, buf: &mut Vec<u8>, frame: &Frame, _: &Engine) -> Result<(), RwError> {
		let hanim = match frame.ext.get(self.handle) {
			Some(hanim) => hanim,
			None => return Ok(()),
		};

		buf.write_i32::<LE>(HANIM_VERSION)?;
		buf.write_i32::<LE>(hanim.id)?;
		match hanim.hierarchy.as_ref() {
			None => buf.write_i32::<LE>(0)?,
			Some(hier) => {
				buf.write_i32::<LE>(hier.nodes.len() as i32)?;
				buf.write_i32::<LE>(hier.flags)?;
				buf.write_i32::<LE>(hier.max_key_frame_size)?;
				for node in hier.nodes.iter() {
					buf.write_i32::<LE>(node.id)?;
					buf.write_i32::<LE>(node.index)?;
					buf.write_i32::<LE>(node.flags.bits())?;
				}
			},
		}
		Ok(())
	}

	fn size(&self, frame: &Frame, engine: &Engine) -> Option<u32> {
		let hanim = frame.ext.get(self.handle)?;
		let config = &engine.config;
		if !config.stream_hanim || (config.version >= 0x35000 && hanim.id == -1 && hanim.hierarchy.is_none()) {
			return None;
		}
		match hanim.hierarchy.as_ref() {
			Some(hier) => Some(12 + 8 + hier.nodes.len() as u32 * 12),
			None => Some(12),
		}
	}
}

pub fn register_hanim(frames: &mut PluginList<Frame>) -> PluginHandle<HAnimData> {
	let handle = frames.register::<HAnimData>(ID_HANIM);
	frames.register_stream(ID_HANIM, Box::new(HAnimStream { handle: handle }));
	handle
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use crate::frame::{
		read_frame_list,
		write_frame_list
	};

	use super::*;

	#[test]
	fn test_hierarchy_stream() {
		let engine = Engine::default();
		let mut root = Frame::new(&engine);
		*root.ext.get_mut(engine.handles.hanim).unwrap() = HAnimData {
			id: 0,
			hierarchy: Some(HAnimHierarchy {
				flags: 0,
				max_key_frame_size: 36,
				nodes: vec![
					HAnimNode { id: 0, index: 0, flags: NodeFlags::PUSH },
					HAnimNode { id: 2, index: 1, flags: NodeFlags::POP },
				],
			}),
		};
		let mut bone = Frame::new(&engine);
		bone.parent = Some(0);
		bone.ext.get_mut(engine.handles.hanim).unwrap().id = 2;
		let frames = vec![root, bone];

		let mut data = vec![];
		write_frame_list(&mut data, &frames, &engine).unwrap();
		let read = read_frame_list(&mut Cursor::new(data), &engine).unwrap();
		assert_eq!(frames, read);
	}

	#[test]
	fn test_unset_data_not_streamed() {
		let mut engine = Engine::default();
		let frames = vec![Frame::new(&engine)];
		let mut data = vec![];
		write_frame_list(&mut data, &frames, &engine).unwrap();
		let plain = data.len();

		// older streams always carry the bone id
		engine.config.version = 0x34003;
		let mut data = vec![];
		write_frame_list(&mut data, &frames, &engine).unwrap();
		assert_eq!(plain + 12 + 12, data.len());

		engine.config.stream_hanim = false;
		let mut data = vec![];
		write_frame_list(&mut data, &frames, &engine).unwrap();
		assert_eq!(plain, data.len());
	}
}
