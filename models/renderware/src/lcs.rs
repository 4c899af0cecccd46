use crate::{
	clump::Clump,
	engine::Engine,
	hanim::HAnimHierarchy
};

/// Node id the mobile ports use for bones without an animation channel
const LCS_NO_ID: i32 = 255;
/// Ids above this are remapped into the bone range of the console release
const LCS_REMAP_THRESHOLD: i32 = 0x80;
const LCS_REMAP_BITS: i32 = 0x1300;
const LCS_KEY_FRAME_SIZE: i32 = 36;

/// Rewrites a hierarchy from a Liberty City Stories mobile model so its node
/// ids and key frame size match the layout of the other releases.
///
/// The id mapping is taken as observed in converted assets and has not been
/// checked against the game's own tables.
pub fn fix_lcs_hierarchy(hier: &mut HAnimHierarchy) {
	hier.max_key_frame_size = LCS_KEY_FRAME_SIZE;
	for node in hier.nodes.iter_mut() {
		if node.id == LCS_NO_ID {
			node.id = -1;
		} else if node.id > LCS_REMAP_THRESHOLD {
			node.id |= LCS_REMAP_BITS;
		}
	}
}

/// Applies [`fix_lcs_hierarchy`] to the first hierarchy found in the clump's
/// frames. Returns whether one was found.
pub fn fix_lcs_clump(clump: &mut Clump, engine: &Engine) -> bool {
	let handle = engine.handles.hanim;
	let hier = clump.frames.iter_mut()
		.filter_map(|f| f.ext.get_mut(handle))
		.find_map(|h| h.hierarchy.as_mut());

	match hier {
		Some(hier) => {
			fix_lcs_hierarchy(hier);
			log::debug!("Fixed LCS hierarchy of {} nodes", hier.nodes.len());
			true
		},
		None => false,
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		frame::Frame,
		hanim::{
			HAnimData,
			HAnimNode,
			NodeFlags
		}
	};

	use super::*;

	fn node(id: i32) -> HAnimNode {
		HAnimNode {
			id: id,
			index: 0,
			flags: NodeFlags::empty(),
		}
	}

	#[test]
	fn test_node_ids_remapped() {
		let mut hier = HAnimHierarchy {
			flags: 0,
			max_key_frame_size: 0,
			nodes: vec![node(0), node(255), node(0x80), node(0x81), node(2)],
		};
		fix_lcs_hierarchy(&mut hier);
		assert_eq!(36, hier.max_key_frame_size);
		let ids: Vec<i32> = hier.nodes.iter().map(|n| n.id).collect();
		assert_eq!(vec![0, -1, 0x80, 0x1381, 2], ids);
	}

	#[test]
	fn test_clump_without_hierarchy() {
		let engine = Engine::default();
		let mut clump = Clump::new(&engine);
		clump.frames.push(Frame::new(&engine));
		assert!(!fix_lcs_clump(&mut clump, &engine));

		let mut bone = Frame::new(&engine);
		*bone.ext.get_mut(engine.handles.hanim).unwrap() = HAnimData {
			id: 1,
			hierarchy: Some(HAnimHierarchy {
				flags: 0,
				max_key_frame_size: 24,
				nodes: vec![node(255)],
			}),
		};
		clump.frames.push(bone);
		assert!(fix_lcs_clump(&mut clump, &engine));
		let hier = clump.frames[1].ext.get(engine.handles.hanim).unwrap().hierarchy.as_ref().unwrap();
		assert_eq!(-1, hier.nodes[0].id);
	}
}
