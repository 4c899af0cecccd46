use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use rgk_core::align_up;

use crate::{
	error::RwError,
	geometry::Geometry,
	skin::Skin
};

pub const DMA_CNT: u32 = 0x10000000;
pub const DMA_REF: u32 = 0x30000000;
pub const DMA_RET: u32 = 0x60000000;
const DMA_ID_MASK: u32 = 0x70000000;

pub const VIF_NOP: u32 = 0;
/// STCYCL with a write cycle length of 1
pub const VIF_STCYCL: u32 = 0x01000100;
pub const VIF_ITOP: u32 = 0x04000000;
pub const VIF_STMOD: u32 = 0x05000000;
pub const VIF_MSKPATH3: u32 = 0x06000000;
pub const VIF_MARK: u32 = 0x07000000;
pub const VIF_FLUSH: u32 = 0x11000000;
pub const VIF_MSCALF: u32 = 0x15000000;
pub const VIF_MSCNT: u32 = 0x17000000;

pub const UNPACK_V2_32: u32 = 0x64000000;
pub const UNPACK_V3_32: u32 = 0x68000000;
pub const UNPACK_V3_8: u32 = 0x6A000000;
pub const UNPACK_V4_32: u32 = 0x6C000000;
pub const UNPACK_V4_8: u32 = 0x6E000000;
pub const UNPACK_UNSIGNED: u32 = 0x00004000;
const UNPACK_MASK: u32 = 0xFF004000;
/// Unpack address relative to the double buffer
const UNPACK_FLG: u32 = 0x8000;

/// Top of the VU1 input buffer the default pipelines get
const VU_LIGHTS: u32 = 0x3D0;
const VU_SKIN: u32 = VU_LIGHTS - 0x100;
const VU_MATFX: u32 = 0x3C5;

/// Library version from which the chains stop carrying MARK codes
const FLUSH_VERSION: u32 = 0x35000;

/// Weight and bone index bits that share each 32 bit weight
const WEIGHT_INDEX_BITS: u32 = 0x3FF;

const NUM_SLOTS: usize = 5;

fn qwc(bytes: u32) -> u32 {
	(bytes + 0xF) >> 4
}

/// Bytes one vertex takes under an unpack command
fn unpack_size(unpack: u32) -> u32 {
	const BITS: [u32; 4] = [32, 16, 8, 16];
	((unpack >> 26 & 3) + 1) * BITS[(unpack >> 24 & 3) as usize] / 8
}

/// Vertex attributes the PS2 pipelines upload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attrib {
	Xyz,
	/// Position with the ADC flag in W
	Xyzw,
	Uv,
	Rgba,
	Normal,
	/// Weights with the bone indices in their low bits. Sits outside the
	/// batches and is referenced by DMA.
	Weights,
}

impl Attrib {
	pub fn unpack(self) -> u32 {
		match self {
			Attrib::Xyz => UNPACK_V3_32,
			Attrib::Xyzw => UNPACK_V4_32,
			Attrib::Uv => UNPACK_V2_32,
			Attrib::Rgba => UNPACK_V4_8 | UNPACK_UNSIGNED,
			Attrib::Normal => UNPACK_V3_8,
			Attrib::Weights => UNPACK_V4_32,
		}
	}

	pub fn size(self) -> u32 {
		unpack_size(self.unpack())
	}

	pub fn broken_out(self) -> bool {
		self == Attrib::Weights
	}
}

/// Packet sizes of one mesh
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshLayout {
	pub num_broken: u32,
	pub num_batches: u32,
	pub batch_vert_count: u32,
	pub last_batch_vert_count: u32,
	pub batch_size: u32,
	pub last_batch_size: u32,
	/// Quad words of the DMA chain
	pub size: u32,
	/// Quad words of the broken out data after it
	pub size2: u32,
	pub attrib_pos: [u32; NUM_SLOTS],
}

/// One vertex as found in the packets, kept as raw bits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawVertex {
	pub pos: [u32; 3],
	pub w: u32,
	pub uv: [u32; 2],
	pub color: [u8; 4],
	pub normal: [i8; 3],
	pub weights: [u32; 4],
}

/// Where a mesh's vertex data comes from
pub struct MeshSource<'a> {
	pub geo: &'a Geometry,
	pub indices: &'a [u16],
	pub adc_bits: Option<&'a [bool]>,
	pub skin: Option<&'a Skin>,
	pub tristrip: bool,
}

/// Attribute slots and VU buffer sizes of a material pipeline
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatPipeline {
	pub attribs: [Option<Attrib>; NUM_SLOTS],
	pub input_stride: u32,
	pub tri_strip_count: u32,
	pub tri_list_count: u32,
}

impl MatPipeline {
	pub fn vert_count(top: u32, in_attribs: u32, out_attribs: u32, out_bufs: u32) -> u32 {
		(top - out_bufs) / (in_attribs * 2 + out_attribs * out_bufs)
	}

	fn new(attribs: [Option<Attrib>; NUM_SLOTS], input_stride: u32, vert_count: u32) -> MatPipeline {
		let broken = attribs.iter().flatten().any(|a| a.broken_out());
		MatPipeline {
			attribs: attribs,
			input_stride: input_stride,
			// strips with broken out data keep two vertices of overlap aligned
			tri_strip_count: if broken { (vert_count - 2) / 4 * 4 + 2 } else { vert_count / 4 * 4 },
			tri_list_count: vert_count / 12 * 12,
		}
	}

	fn base_attribs() -> [Option<Attrib>; NUM_SLOTS] {
		[Some(Attrib::Xyz), Some(Attrib::Uv), Some(Attrib::Rgba), Some(Attrib::Normal), None]
	}

	pub fn default_pipe() -> MatPipeline {
		MatPipeline::new(MatPipeline::base_attribs(), 4, MatPipeline::vert_count(VU_LIGHTS, 4, 3, 2))
	}

	pub fn skin_pipe() -> MatPipeline {
		let mut attribs = MatPipeline::base_attribs();
		attribs[4] = Some(Attrib::Weights);
		MatPipeline::new(attribs, 5, MatPipeline::vert_count(VU_SKIN, 5, 3, 2))
	}

	pub fn matfx_pipe() -> MatPipeline {
		MatPipeline::new(MatPipeline::base_attribs(), 4, MatPipeline::vert_count(VU_MATFX, 4, 3, 3))
	}

	/// Same pipeline uploading ADC flags with the positions
	pub fn with_adc(mut self) -> MatPipeline {
		for a in self.attribs.iter_mut().flatten() {
			if *a == Attrib::Xyz {
				*a = Attrib::Xyzw;
			}
		}
		self
	}

	pub fn has_weights(&self) -> bool {
		self.attribs.iter().flatten().any(|&a| a == Attrib::Weights)
	}

	fn clustered(&self) -> impl Iterator<Item = (u32, Attrib)> + '_ {
		self.slots().filter(|(_, a)| !a.broken_out())
	}

	fn broken(&self) -> impl Iterator<Item = (u32, Attrib)> + '_ {
		self.slots().filter(|(_, a)| a.broken_out())
	}

	fn slots(&self) -> impl Iterator<Item = (u32, Attrib)> + '_ {
		self.attribs.iter().enumerate().filter_map(|(i, a)| a.map(|a| (i as u32, a)))
	}

	fn batch_size(&self, verts: u32) -> u32 {
		if verts == 0 {
			return 0;
		}
		// ITOP line at the end
		1 + self.clustered().map(|(_, a)| 1 + qwc(verts * a.size())).sum::<u32>()
	}

	pub fn layout(&self, num_indices: u32, tristrip: bool) -> Result<MeshLayout, RwError> {
		let too_large = || RwError::malformed(format!("PS2 mesh of {} indices does not fit a packet", num_indices));
		let n = num_indices;
		let (num_batches, batch_vert_count, last) = if tristrip {
			if n < 3 {
				return Err(RwError::malformed(format!("can't batch a strip of {} indices", n)));
			}
			let step = self.tri_strip_count - 2;
			let (mut batches, mut last) = ((n - 2) / step, (n - 2) % step);
			if last != 0 {
				batches += 1;
				last += 2;
			}
			(batches, self.tri_strip_count, last)
		} else {
			if n == 0 {
				return Err(RwError::malformed("can't batch an empty mesh"));
			}
			let last = n % self.tri_list_count;
			(n / self.tri_list_count + (last != 0) as u32, self.tri_list_count, last)
		};
		let last_batch_vert_count = if last == 0 { batch_vert_count } else { last };

		let num_broken = self.broken().count() as u32;
		let batch_size = self.batch_size(batch_vert_count);
		let last_batch_size = self.batch_size(last_batch_vert_count);
		// every batch but the last is full
		let full = num_batches - 1;
		let size = match num_broken {
			0 => batch_size.checked_mul(full),
			nb => (1 + batch_size).checked_mul(full)
				.and_then(|s| s.checked_add((2 * nb).checked_mul(num_batches)?)),
		}.and_then(|s| s.checked_add(1 + last_batch_size)).ok_or_else(too_large)?;

		let mut size2: u32 = 0;
		let mut attrib_pos = [0; NUM_SLOTS];
		for (i, a) in self.broken() {
			attrib_pos[i as usize] = size.checked_add(size2).ok_or_else(too_large)?;
			let bytes = n.checked_mul(a.size()).and_then(|b| b.checked_add(0xF)).ok_or_else(too_large)?;
			size2 = size2.checked_add(bytes >> 4).ok_or_else(too_large)?;
		}
		// the packet length in bytes has to fit the native data struct
		size.checked_add(size2).and_then(|s| s.checked_mul(16)).ok_or_else(too_large)?;

		Ok(MeshLayout {
			num_broken: num_broken,
			num_batches: num_batches,
			batch_vert_count: batch_vert_count,
			last_batch_vert_count: last_batch_vert_count,
			batch_size: batch_size,
			last_batch_size: last_batch_size,
			size: size,
			size2: size2,
			attrib_pos: attrib_pos,
		})
	}

	/// Builds the DMA chain of one mesh followed by its broken out data.
	/// `mark` numbers the MARK codes of old library versions.
	pub fn instance_mesh(&self, src: &MeshSource, version: u32, mark: &mut u32) -> Result<Vec<u8>, RwError> {
		let n = src.indices.len() as u32;
		let l = self.layout(n, src.tristrip)?;
		let overlap = if src.tristrip { 2 } else { 0 };
		let msk_flush = if version >= FLUSH_VERSION { VIF_FLUSH } else { VIF_MSKPATH3 };

		let mut out = Vec::with_capacity(((l.size + l.size2) * 16) as usize);
		if l.num_broken == 0 {
			write_words(&mut out, [DMA_RET | (l.size - 1), 0, VIF_FLUSH, msk_flush])?;
		}

		let mut attrib_pos = l.attrib_pos;
		let mut idx = 0;
		for j in 0..l.num_batches {
			let last = j == l.num_batches - 1;
			let (bsize, nverts) = match last {
				true => (l.last_batch_size, l.last_batch_vert_count),
				false => (l.batch_size, l.batch_vert_count),
			};

			for (i, a) in self.broken() {
				let q = qwc(nverts * a.size());
				// the unpack covers the whole packet since broken out data can't be padded
				let unpack = a.unpack() & UNPACK_MASK | UNPACK_FLG | ((q << 4) / a.size()) << 16 | i;
				write_words(&mut out, [DMA_REF | q, attrib_pos[i as usize], VIF_STCYCL | self.input_stride, unpack])?;
				write_words(&mut out, [DMA_CNT, 0, VIF_NOP, VIF_NOP])?;
				attrib_pos[i as usize] += qwc((l.batch_vert_count - overlap) * a.size());
			}
			if l.num_broken > 0 {
				let tag = if last { DMA_RET } else { DMA_CNT };
				write_words(&mut out, [tag | bsize, 0, VIF_NOP, VIF_NOP])?;
			}

			for (i, a) in self.clustered() {
				let head = match version >= FLUSH_VERSION {
					true => VIF_NOP,
					false => {
						let code = VIF_MARK | (*mark & 0xFFFF);
						*mark += 1;
						code
					},
				};
				let unpack = a.unpack() & UNPACK_MASK | UNPACK_FLG | nverts << 16 | i;
				write_words(&mut out, [head, VIF_STMOD, VIF_STCYCL | self.input_stride, unpack])?;
				write_cluster(&mut out, a, src, idx as usize, nverts as usize)?;
			}
			idx += l.batch_vert_count - overlap;

			let end = match last {
				true => [VIF_FLUSH, msk_flush],
				false => [VIF_NOP, VIF_NOP],
			};
			let start = if j == 0 { VIF_MSCALF } else { VIF_MSCNT };
			write_words(&mut out, [VIF_ITOP | nverts, start, end[0], end[1]])?;
		}

		// weights are the only broken out attribute
		for _ in self.broken() {
			write_weights(&mut out, src)?;
		}

		if out.len() != ((l.size + l.size2) * 16) as usize {
			return Err(RwError::malformed(format!("PS2 mesh packet of {} bytes, expected {}",
				out.len(), (l.size + l.size2) * 16)));
		}
		Ok(out)
	}

	/// Reads the vertices of every mesh index back out of a packet built by
	/// this pipeline
	pub fn collect_mesh(&self, data: &[u8], num_indices: u32, tristrip: bool) -> Result<Vec<RawVertex>, RwError> {
		let l = self.layout(num_indices, tristrip)?;
		if (data.len() as u64) < (l.size + l.size2) as u64 * 16 {
			return Err(RwError::malformed("PS2 mesh packet shorter than its layout"));
		}
		if (word(data, 0)? & DMA_ID_MASK == DMA_REF) != (l.num_broken > 0) {
			return Err(RwError::malformed("PS2 native data was built by another pipeline"));
		}

		let overlap = if tristrip { 2 } else { 0 };
		let mut verts = vec![RawVertex::default(); num_indices as usize];
		let mut p = if l.num_broken == 0 { 16 } else { 0 };
		let mut base = 0;
		for j in 0..l.num_batches {
			let nverts = match j == l.num_batches - 1 {
				true => l.last_batch_vert_count,
				false => l.batch_vert_count,
			} as usize;
			p += 32 * l.num_broken as usize;
			if l.num_broken > 0 {
				p += 16;
			}

			for (_, a) in self.clustered() {
				let unpack = word(data, p + 12)?;
				if unpack & UNPACK_MASK != a.unpack() & UNPACK_MASK {
					return Err(RwError::malformed(format!("unexpected unpack {:08X}, expected {:08X}", unpack, a.unpack())));
				}
				p += 16;
				let len = a.size() as usize * nverts;
				let mut src = data.get(p..p + len)
					.ok_or_else(|| RwError::malformed("PS2 unpack data outside the packet"))?;
				for v in verts[base..base + nverts].iter_mut() {
					read_attrib(&mut src, a, v)?;
				}
				p += align_up(len, 16);
			}
			// ITOP line
			p += 16;
			base += l.batch_vert_count as usize - overlap;
		}

		for (i, a) in self.broken() {
			let start = l.attrib_pos[i as usize] as usize * 16;
			let len = a.size() as usize * verts.len();
			let mut src = data.get(start..start + len)
				.ok_or_else(|| RwError::malformed("PS2 broken out data outside the packet"))?;
			for v in verts.iter_mut() {
				read_attrib(&mut src, a, v)?;
			}
		}
		Ok(verts)
	}
}

/// Position unpack of the first batch of a packet with `num_broken`
/// broken out attributes
pub fn position_unpack(data: &[u8], num_broken: u32) -> Result<u32, RwError> {
	let at = match num_broken {
		0 => 16,
		nb => 32 * nb as usize + 16,
	};
	Ok(word(data, at + 12)? & UNPACK_MASK)
}

fn word(data: &[u8], at: usize) -> Result<u32, RwError> {
	let mut src = data.get(at..at + 4)
		.ok_or_else(|| RwError::malformed("PS2 packet ends inside a tag"))?;
	Ok(src.read_u32::<LE>()?)
}

fn write_words(out: &mut Vec<u8>, words: [u32; 4]) -> Result<(), RwError> {
	for w in words {
		out.write_u32::<LE>(w)?;
	}
	Ok(())
}

fn pad_qword(out: &mut Vec<u8>) {
	out.resize(align_up(out.len(), 16), 0);
}

fn write_cluster(out: &mut Vec<u8>, attrib: Attrib, src: &MeshSource, start: usize, n: usize) -> Result<(), RwError> {
	let geo = src.geo;
	let mt = &geo.morph_targets[0];
	for i in start..start + n {
		let j = src.indices[i] as usize;
		match attrib {
			Attrib::Xyz | Attrib::Xyzw => {
				let p = mt.vertices[j];
				out.write_f32::<LE>(p.x)?;
				out.write_f32::<LE>(p.y)?;
				out.write_f32::<LE>(p.z)?;
				if attrib == Attrib::Xyzw {
					let flagged = src.adc_bits.and_then(|b| b.get(i).copied()).unwrap_or(false);
					out.write_u32::<LE>(if flagged { 0x8000 } else { 0 })?;
				}
			},
			Attrib::Uv => {
				let t = match geo.tex_coords.first() {
					Some(set) if geo.num_tex_coords > 0 => set[j],
					_ => Default::default(),
				};
				out.write_f32::<LE>(t.x)?;
				out.write_f32::<LE>(t.y)?;
			},
			Attrib::Rgba => match geo.is_prelit() {
				true => out.extend_from_slice(&geo.colors[j]),
				false => out.extend_from_slice(&[0, 0, 0, 0xFF]),
			},
			Attrib::Normal => {
				let n = match geo.has_normals() {
					true => mt.normals[j],
					false => Default::default(),
				};
				for c in [n.x, n.y, n.z] {
					out.write_i8((c * 127.0).round().clamp(-128.0, 127.0) as i8)?;
				}
			},
			Attrib::Weights => return Err(RwError::malformed("weights can't be uploaded inside a batch")),
		}
	}
	pad_qword(out);
	Ok(())
}

/// Weights of every index with the bone index plus one in the low bits.
/// Zero weights and bone 0 store no index.
fn write_weights(out: &mut Vec<u8>, src: &MeshSource) -> Result<(), RwError> {
	for &j in src.indices.iter() {
		let (weights, indices) = match src.skin {
			Some(skin) => (skin.weights[j as usize], skin.indices[j as usize]),
			None => ([0.0; 4], [0; 4]),
		};
		for k in 0..4 {
			let w = weights[k];
			let idx = indices[k] as u32;
			let bits = match idx != 0 && w != 0.0 {
				true if idx >= 0xFF => return Err(RwError::malformed(format!("bone {} doesn't fit PS2 weights", idx))),
				true => (idx + 1) << 2,
				false => 0,
			};
			out.write_u32::<LE>(w.to_bits() & !WEIGHT_INDEX_BITS | bits)?;
		}
	}
	pad_qword(out);
	Ok(())
}

fn read_attrib(src: &mut &[u8], attrib: Attrib, v: &mut RawVertex) -> Result<(), RwError> {
	match attrib {
		Attrib::Xyz | Attrib::Xyzw => {
			for c in v.pos.iter_mut() {
				*c = src.read_u32::<LE>()?;
			}
			if attrib == Attrib::Xyzw {
				v.w = src.read_u32::<LE>()?;
			}
		},
		Attrib::Uv => {
			for c in v.uv.iter_mut() {
				*c = src.read_u32::<LE>()?;
			}
		},
		Attrib::Rgba => {
			for c in v.color.iter_mut() {
				*c = src.read_u8()?;
			}
		},
		Attrib::Normal => {
			for c in v.normal.iter_mut() {
				*c = src.read_i8()?;
			}
		},
		Attrib::Weights => {
			for c in v.weights.iter_mut() {
				*c = src.read_u32::<LE>()?;
			}
		},
	}
	Ok(())
}

/// Splits a broken out weight into the weight and the bone index
pub fn unpack_weight(bits: u32) -> (f32, u8) {
	let w = f32::from_bits(bits & !WEIGHT_INDEX_BITS);
	let mut idx = (bits & WEIGHT_INDEX_BITS) >> 2;
	if idx > 0 {
		idx -= 1;
	}
	if w == 0.0 {
		idx = 0;
	}
	(w, idx as u8)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_batch_sizes() {
		let pipe = MatPipeline::default_pipe();
		assert_eq!((60, 68), (pipe.tri_list_count, pipe.tri_strip_count));
		let pipe = MatPipeline::skin_pipe();
		assert_eq!((36, 42), (pipe.tri_list_count, pipe.tri_strip_count));
		let pipe = MatPipeline::matfx_pipe();
		assert_eq!((48, 56), (pipe.tri_list_count, pipe.tri_strip_count));
	}

	#[test]
	fn test_attrib_sizes() {
		assert_eq!(12, Attrib::Xyz.size());
		assert_eq!(16, Attrib::Xyzw.size());
		assert_eq!(8, Attrib::Uv.size());
		assert_eq!(4, Attrib::Rgba.size());
		assert_eq!(3, Attrib::Normal.size());
	}

	#[test]
	fn test_strip_layout() {
		let l = MatPipeline::default_pipe().layout(100, true).unwrap();
		// 66 new vertices per batch after the first two
		assert_eq!(2, l.num_batches);
		assert_eq!(68, l.batch_vert_count);
		assert_eq!(34, l.last_batch_vert_count);

		let l = MatPipeline::default_pipe().layout(68, true).unwrap();
		assert_eq!((1, 68), (l.num_batches, l.last_batch_vert_count));
		assert!(MatPipeline::default_pipe().layout(2, true).is_err());
	}

	#[test]
	fn test_huge_meshes_are_rejected() {
		for pipe in [MatPipeline::default_pipe(), MatPipeline::skin_pipe()].iter() {
			for &tristrip in [false, true].iter() {
				let result = pipe.layout(u32::MAX, tristrip);
				assert!(matches!(result, Err(RwError::Malformed(_))), "tristrip {}", tristrip);
			}
		}
		// the weights alone overflow a packet
		assert!(MatPipeline::skin_pipe().layout(0x1000_0000, false).is_err());
		assert!(MatPipeline::default_pipe().collect_mesh(&[0; 64], u32::MAX, false).is_err());
	}

	#[test]
	fn test_skin_layout() {
		let l = MatPipeline::skin_pipe().layout(4, false).unwrap();
		assert_eq!(1, l.num_broken);
		assert_eq!(12, l.last_batch_size);
		assert_eq!(15, l.size);
		assert_eq!(4, l.size2);
		assert_eq!(15, l.attrib_pos[4]);
	}

	#[test]
	fn test_weight_bits() {
		let bits = 0.5f32.to_bits() & !0x3FF | (3 + 1) << 2;
		assert_eq!((0.5, 3), unpack_weight(bits));
		assert_eq!((0.0, 0), unpack_weight(5 << 2));
		assert_eq!((1.0, 0), unpack_weight(1.0f32.to_bits()));
	}
}
