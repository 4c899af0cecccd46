use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::Write;

use ultraviolet::{
	mat::Mat4,
	vec::{
		Vec3,
		Vec4
	}
};

use rgk_core::io_ext::{
	ReadBinExt,
	WriteBinExt
};

use crate::{
	chunk::{
		find_chunk,
		write_chunk,
		write_struct,
		Source,
		ID_FRAMELIST,
		ID_STRUCT
	},
	engine::Engine,
	error::RwError,
	plugin::Extensions
};

const FRAME_RECORD_SIZE: u64 = 56;

/// A node of the transform hierarchy. Parents always precede their children.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
	pub right: Vec3,
	pub up: Vec3,
	pub at: Vec3,
	pub pos: Vec3,
	pub parent: Option<usize>,
	pub matrix_flags: u32,
	pub ext: Extensions,
}

impl Frame {
	pub fn new(engine: &Engine) -> Frame {
		Frame {
			right: Vec3::unit_x(),
			up: Vec3::unit_y(),
			at: Vec3::unit_z(),
			pos: Vec3::zero(),
			parent: None,
			matrix_flags: 0,
			ext: engine.frame_plugins.construct(),
		}
	}

	pub fn local_matrix(&self) -> Mat4 {
		Mat4::new(
			Vec4::new(self.right.x, self.right.y, self.right.z, 0.0),
			Vec4::new(self.up.x, self.up.y, self.up.z, 0.0),
			Vec4::new(self.at.x, self.at.y, self.at.z, 0.0),
			Vec4::new(self.pos.x, self.pos.y, self.pos.z, 1.0),
		)
	}
}

/// World matrix of every frame, composed from the root down
pub fn world_matrices(frames: &[Frame]) -> Vec<Mat4> {
	let mut world: Vec<Mat4> = Vec::with_capacity(frames.len());
	for f in frames {
		let m = match f.parent.and_then(|p| world.get(p)) {
			Some(&parent) => parent * f.local_matrix(),
			None => f.local_matrix(),
		};
		world.push(m);
	}
	world
}

/// Reads a frame list chunk body: the frame records, then one extension per frame
pub fn read_frame_list(buf: &mut dyn Source, engine: &Engine) -> Result<Vec<Frame>, RwError> {
	find_chunk(buf, ID_FRAMELIST)?;
	let header = find_chunk(buf, ID_STRUCT)?;
	let count = buf.read_i32::<LE>()?;
	if count < 0 || count as u64 * FRAME_RECORD_SIZE + 4 > header.length as u64 {
		return Err(RwError::malformed(format!("bad frame count {}", count)));
	}

	let mut frames = Vec::with_capacity(count as usize);
	for i in 0..count as usize {
		let right = buf.read_vec3_le()?;
		let up = buf.read_vec3_le()?;
		let at = buf.read_vec3_le()?;
		let pos = buf.read_vec3_le()?;
		let parent = match buf.read_i32::<LE>()? {
			p if p < 0 => None,
			p if (p as usize) < i => Some(p as usize),
			p => return Err(RwError::malformed(format!("frame {} has parent {}", i, p))),
		};
		let matrix_flags = buf.read_u32::<LE>()?;

		frames.push(Frame {
			right: right,
			up: up,
			at: at,
			pos: pos,
			parent: parent,
			matrix_flags: matrix_flags,
			ext: engine.frame_plugins.construct(),
		});
	}

	for frame in frames.iter_mut() {
		engine.frame_plugins.read_extension(buf, frame, engine)?;
	}

	Ok(frames)
}

pub fn write_frame_list<W>(buf: &mut W, frames: &[Frame], engine: &Engine) -> Result<(), RwError>
where
	W: Write + ?Sized,
{
	let config = &engine.config;
	write_chunk(buf, ID_FRAMELIST, config, |body| {
		write_struct(body, config, |s| {
			s.write_i32::<LE>(frames.len() as i32)?;
			for f in frames {
				s.write_vec3_le(f.right)?;
				s.write_vec3_le(f.up)?;
				s.write_vec3_le(f.at)?;
				s.write_vec3_le(f.pos)?;
				s.write_i32::<LE>(f.parent.map_or(-1, |p| p as i32))?;
				s.write_u32::<LE>(f.matrix_flags)?;
			}
			Ok(())
		})?;
		for f in frames {
			engine.frame_plugins.write_extension(body, f, engine)?;
		}
		Ok(())
	})
}
