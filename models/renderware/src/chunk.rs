use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::{
	self,
	Read,
	Seek,
	SeekFrom,
	Write
};

use rgk_core::{
	align_up,
	io_ext::{
		ReadBinExt,
		WriteBinExt
	}
};

use crate::{
	engine::EngineConfig,
	error::RwError
};

pub const ID_NAOBJECT: u32 = 0x0;
pub const ID_STRUCT: u32 = 0x1;
pub const ID_STRING: u32 = 0x2;
pub const ID_EXTENSION: u32 = 0x3;
pub const ID_CAMERA: u32 = 0x5;
pub const ID_TEXTURE: u32 = 0x6;
pub const ID_MATERIAL: u32 = 0x7;
pub const ID_MATLIST: u32 = 0x8;
pub const ID_FRAMELIST: u32 = 0xE;
pub const ID_GEOMETRY: u32 = 0xF;
pub const ID_CLUMP: u32 = 0x10;
pub const ID_LIGHT: u32 = 0x12;
pub const ID_ATOMIC: u32 = 0x14;
pub const ID_TEXTURENATIVE: u32 = 0x15;
pub const ID_TEXDICTIONARY: u32 = 0x16;
pub const ID_GEOMETRYLIST: u32 = 0x1A;
pub const ID_ANIMANIMATION: u32 = 0x1B;
pub const ID_RIGHTTORENDER: u32 = 0x1F;
pub const ID_UVANIMDICT: u32 = 0x2B;

pub const ID_SKYMIPMAP: u32 = 0x110;
pub const ID_SKIN: u32 = 0x116;
pub const ID_HANIM: u32 = 0x11E;
pub const ID_MATFX: u32 = 0x120;
pub const ID_ADC: u32 = 0x134;

pub const ID_MESH: u32 = 0x50E;
pub const ID_NATIVEDATA: u32 = 0x510;
pub const ID_VERTEXFMT: u32 = 0x511;

pub const ID_NODENAME: u32 = 0x0253F2FE;

/// Any seekable byte stream chunks can be read from
pub trait Source: Read + Seek {}

impl<T> Source for T
where
	T: Read + Seek + ?Sized,
{
}

/// Packs a library version and build into the header's library id
pub fn pack_library_id(version: u32, build: u32) -> u32 {
	if version <= 0x31000 {
		return version >> 8;
	}
	((version - 0x30000) & 0x3FF00) << 14 | (version & 0x3F) << 16 | (build & 0xFFFF)
}

/// Splits a library id into its (version, build) pair
pub fn unpack_library_id(id: u32) -> (u32, u32) {
	if id & 0xFFFF0000 != 0 {
		((((id >> 14) & 0x3FF00) + 0x30000) | ((id >> 16) & 0x3F), id & 0xFFFF)
	} else {
		(id << 8, 0)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
	pub kind: u32,
	pub length: u32,
	pub version: u32,
	pub build: u32,
}

impl ChunkHeader {
	pub const SIZE: u32 = 12;

	pub fn new(kind: u32, length: u32, config: &EngineConfig) -> ChunkHeader {
		ChunkHeader {
			kind: kind,
			length: length,
			version: config.version,
			build: config.build,
		}
	}

	/// Reads a header without checking its length against the stream
	pub fn read_unchecked<R>(buf: &mut R) -> Result<ChunkHeader, RwError>
	where
		R: ReadBytesExt + ?Sized,
	{
		let kind = buf.read_u32::<LE>()?;
		let length = buf.read_u32::<LE>()?;
		let (version, build) = unpack_library_id(buf.read_u32::<LE>()?);

		Ok(ChunkHeader {
			kind: kind,
			length: length,
			version: version,
			build: build,
		})
	}

	/// Reads a header and makes sure the stream holds the whole body
	pub fn read(buf: &mut dyn Source) -> Result<ChunkHeader, RwError> {
		let header = ChunkHeader::read_unchecked(buf)?;
		if header.length as u64 > remaining(buf)? {
			return Err(RwError::Truncated);
		}
		Ok(header)
	}

	pub fn write<W>(&self, buf: &mut W) -> io::Result<()>
	where
		W: WriteBytesExt + ?Sized,
	{
		buf.write_u32::<LE>(self.kind)?;
		buf.write_u32::<LE>(self.length)?;
		buf.write_u32::<LE>(pack_library_id(self.version, self.build))
	}
}

/// Number of bytes between the cursor and the end of the stream
pub fn remaining(buf: &mut dyn Source) -> io::Result<u64> {
	let pos = buf.stream_position()?;
	let end = buf.seek(SeekFrom::End(0))?;
	buf.seek(SeekFrom::Start(pos))?;
	Ok(end.saturating_sub(pos))
}

/// Fails unless the stream still holds `count` records of at least `size` bytes each
pub fn check_remaining(buf: &mut dyn Source, count: u64, size: u64, what: &str) -> Result<(), RwError> {
	let left = remaining(buf)?;
	match count.checked_mul(size) {
		Some(needed) if needed <= left => Ok(()),
		_ => Err(RwError::malformed(format!("{} {} do not fit the stream", count, what))),
	}
}

/// Absolute offset of the end of a chunk whose header was just read
pub fn chunk_end(buf: &mut dyn Source, header: ChunkHeader) -> io::Result<u64> {
	Ok(buf.stream_position()? + header.length as u64)
}

/// Skips sibling chunks until one of the given kind is found
pub fn find_chunk(buf: &mut dyn Source, kind: u32) -> Result<ChunkHeader, RwError> {
	loop {
		let header = ChunkHeader::read(buf)?;
		if header.kind == kind {
			return Ok(header);
		}
		log::trace!("Skipping chunk {:#X} while looking for {:#X}", header.kind, kind);
		buf.seek(SeekFrom::Current(header.length as i64))?;
	}
}

/// Reads the next header, which must be of the given kind
pub fn expect_chunk(buf: &mut dyn Source, kind: u32) -> Result<ChunkHeader, RwError> {
	let header = ChunkHeader::read(buf)?;
	if header.kind != kind {
		return Err(RwError::UnexpectedChunk {
			expected: kind,
			found: header.kind,
		});
	}
	Ok(header)
}

/// Walks the children of a chunk whose header was just read.
/// The stream is always repositioned to the next sibling by absolute offset,
/// whatever the handler consumed.
pub fn read_children<F>(buf: &mut dyn Source, parent: &ChunkHeader, mut handler: F) -> Result<(), RwError>
where
	F: FnMut(&mut dyn Source, &ChunkHeader) -> Result<(), RwError>,
{
	let end = buf.stream_position()? + parent.length as u64;

	while buf.stream_position()? < end {
		let header = ChunkHeader::read(buf)?;
		let start = buf.stream_position()?;
		let child_end = start + header.length as u64;
		if child_end > end {
			return Err(RwError::malformed(format!("chunk {:#X} overruns its parent {:#X}",
				header.kind, parent.kind)));
		}

		handler(buf, &header)?;

		if buf.stream_position()? != child_end {
			log::trace!("Resynchronizing after chunk {:#X}", header.kind);
			buf.seek(SeekFrom::Start(child_end))?;
		}
	}

	Ok(())
}

/// Writes a chunk whose body is produced into a scratch buffer first
pub fn write_chunk<W, F>(buf: &mut W, kind: u32, config: &EngineConfig, body: F) -> Result<(), RwError>
where
	W: Write + ?Sized,
	F: FnOnce(&mut Vec<u8>) -> Result<(), RwError>,
{
	let mut scratch = vec![];
	body(&mut scratch)?;

	ChunkHeader::new(kind, scratch.len() as u32, config).write(buf)?;
	buf.write_all(&scratch)?;
	Ok(())
}

pub fn write_struct<W, F>(buf: &mut W, config: &EngineConfig, body: F) -> Result<(), RwError>
where
	W: Write + ?Sized,
	F: FnOnce(&mut Vec<u8>) -> Result<(), RwError>,
{
	write_chunk(buf, ID_STRUCT, config, body)
}

pub fn read_string(buf: &mut dyn Source) -> Result<String, RwError> {
	let header = expect_chunk(buf, ID_STRING)?;
	Ok(buf.read_fixed_str(header.length as usize)?)
}

/// Strings are null terminated and padded to a multiple of 4
pub fn write_string<W>(buf: &mut W, s: &str, config: &EngineConfig) -> Result<(), RwError>
where
	W: Write + ?Sized,
{
	let length = align_up(s.len() + 1, 4);
	ChunkHeader::new(ID_STRING, length as u32, config).write(buf)?;
	buf.write_fixed_str(s, length)?;
	Ok(())
}

pub fn string_size(s: &str) -> u32 {
	ChunkHeader::SIZE + align_up(s.len() + 1, 4) as u32
}

/// A chunk kept as raw bytes for passthrough
#[derive(Clone, Debug, PartialEq)]
pub struct RawChunk {
	pub header: ChunkHeader,
	pub data: Vec<u8>,
}

impl RawChunk {
	/// Reads the body of a chunk whose header was already read
	pub fn read_body(buf: &mut dyn Source, header: ChunkHeader) -> Result<RawChunk, RwError> {
		let mut data = vec![0; header.length as usize];
		buf.read_exact(&mut data)?;
		Ok(RawChunk {
			header: header,
			data: data,
		})
	}

	pub fn write<W>(&self, buf: &mut W) -> io::Result<()>
	where
		W: WriteBytesExt + ?Sized,
	{
		ChunkHeader {
			length: self.data.len() as u32,
			..self.header
		}.write(buf)?;
		buf.write_all(&self.data)
	}
}
