use std::io::{
	SeekFrom,
	Write
};

use crate::{
	chunk::{
		pack_library_id,
		remaining,
		ChunkHeader,
		Source,
		ID_MESH,
		ID_NATIVEDATA,
		ID_VERTEXFMT
	},
	error::RwError
};

const ZMODELER_LOCK: u32 = 0xF21E;
const TOOLKIT0_BASE: u32 = 0x101;
const TOOLKIT1_BASE: u32 = 0x181;
const ROCKSTAR_BASE: u32 = 0x0253F2F0;

const CORE_NAMES: [&str; 45] = [
	"None",
	"Struct",
	"String",
	"Extension",
	"Unknown",
	"Camera",
	"Texture",
	"Material",
	"Material List",
	"Atomic Section",
	"Plane Section",
	"World",
	"Spline",
	"Matrix",
	"Frame List",
	"Geometry",
	"Clump",
	"Unknown",
	"Light",
	"Unicode String",
	"Atomic",
	"Texture Native",
	"Texture Dictionary",
	"Animation Database",
	"Image",
	"Skin Animation",
	"Geometry List",
	"Anim Animation",
	"Team",
	"Crowd",
	"Delta Morph Animation",
	"Right To Render",
	"MultiTexture Effect Native",
	"MultiTexture Effect Dictionary",
	"Team Dictionary",
	"Platform Independet Texture Dictionary",
	"Table of Contents",
	"Particle Standard Global Data",
	"AltPipe",
	"Platform Independet Peds",
	"Patch Mesh",
	"Chunk Group Start",
	"Chunk Group End",
	"UV Animation Dictionary",
	"Coll Tree",
];

const TOOLKIT0_NAMES: [&str; 53] = [
	"Metrics PLG",
	"Spline PLG",
	"Stereo PLG",
	"VRML PLG",
	"Morph PLG",
	"PVS PLG",
	"Memory Leak PLG",
	"Animation PLG",
	"Gloss PLG",
	"Logo PLG",
	"Memory Info PLG",
	"Random PLG",
	"PNG Image PLG",
	"Bone PLG",
	"VRML Anim PLG",
	"Sky Mipmap Val",
	"MRM PLG",
	"LOD Atomic PLG",
	"ME PLG",
	"Lightmap PLG",
	"Refine PLG",
	"Skin PLG",
	"Label PLG",
	"Particles PLG",
	"GeomTX PLG",
	"Synth Core PLG",
	"STQPP PLG",
	"Part PP PLG",
	"Collision PLG",
	"HAnim PLG",
	"User Data PLG",
	"Material Effects PLG",
	"Particle System PLG",
	"Delta Morph PLG",
	"Patch PLG",
	"Team PLG",
	"Crowd PP PLG",
	"Mip Split PLG",
	"Anisotrophy PLG",
	"Not used",
	"GCN Material PLG",
	"Geometric PVS PLG",
	"XBOX Material PLG",
	"Multi Texture PLG",
	"Chain PLG",
	"Toon PLG",
	"PTank PLG",
	"Particle Standard PLG",
	"PDS PLG",
	"PrtAdv PLG",
	"Normal Map PLG",
	"ADC PLG",
	"UV Animation PLG",
];

const TOOLKIT1_NAMES: [&str; 66] = [
	"Character Set PLG",
	"NOHS World PLG",
	"Import Util PLG",
	"Slerp PLG",
	"Optim PLG",
	"TL World PLG",
	"Database PLG",
	"Raytrace PLG",
	"Ray PLG",
	"Library PLG",
	"Not used",
	"Not used",
	"Not used",
	"Not used",
	"Not used",
	"Not used",
	"2D PLG",
	"Tile Render PLG",
	"JPEG Image PLG",
	"TGA Image PLG",
	"GIF Image PLG",
	"Quat PLG",
	"Spline PVS PLG",
	"Mipmap PLG",
	"MipmapK PLG",
	"2D Font",
	"Intersection PLG",
	"TIFF Image PLG",
	"Pick PLG",
	"BMP Image PLG",
	"RAS Image PLG",
	"Skin FX PLG",
	"VCAT PLG",
	"2D Path",
	"2D Brush",
	"2D Object",
	"2D Shape",
	"2D Scene",
	"2D Pick Region",
	"2D Object String",
	"2D Animation PLG",
	"2D Animation",
	"Not used",
	"Not used",
	"Not used",
	"Not used",
	"Not used",
	"Not used",
	"2D Keyframe",
	"2D Maestro",
	"Barycentric",
	"Platform Independent Texture Dictionary TK",
	"TOC TK",
	"TPL TK",
	"AltPipe TK",
	"Animation TK",
	"Skin Split Tookit",
	"Compressed Key TK",
	"Geometry Conditioning PLG",
	"Wing PLG",
	"Generic Pipeline TK",
	"Lightmap Conversion TK",
	"Filesystem PLG",
	"Dictionary TK",
	"UV Animation Linear",
	"UV Animation Parameter",
];

const ROCKSTAR_NAMES: [&str; 16] = [
	"Unused 1",
	"Unused 2",
	"Extra Normals",
	"Pipeline Set",
	"Unused 5",
	"Unused 6",
	"Specular Material",
	"Unused 8",
	"2dfx",
	"Extra Colors",
	"Collision Model",
	"Unused 12",
	"Environment Material",
	"Breakable",
	"Node Name",
	"Unused 16",
];

fn table_name(table: &'static [&'static str], base: u32, id: u32) -> Option<&'static str> {
	id.checked_sub(base).and_then(|i| table.get(i as usize)).copied()
}

/// Display name of a chunk type
pub fn chunk_name(id: u32) -> &'static str {
	match id {
		ID_MESH => "Bin Mesh PLG",
		ID_NATIVEDATA => "Native Data PLG",
		ID_VERTEXFMT => "Vertex Format PLG",
		ZMODELER_LOCK => "ZModeler Lock",
		_ => table_name(&CORE_NAMES, 0, id)
			.or_else(|| table_name(&TOOLKIT0_NAMES, TOOLKIT0_BASE, id))
			.or_else(|| table_name(&TOOLKIT1_NAMES, TOOLKIT1_BASE, id))
			.or_else(|| table_name(&ROCKSTAR_NAMES, ROCKSTAR_BASE, id))
			.unwrap_or("Unknown"),
	}
}

/// Prints a chunk and, as far as they look like chunks, its children.
/// A body is taken to hold children while the next header carries the same
/// library version as its parent; anything else is plain data and skipped.
fn dump_chunk<W>(buf: &mut dyn Source, out: &mut W, header: &ChunkHeader, level: usize) -> Result<(), RwError>
where
	W: Write + ?Sized,
{
	let body = buf.stream_position()?;
	let end = body + header.length as u64;
	writeln!(out, "{:indent$}{} ({:x} bytes @ 0x{:x}/0x{:x}) - [0x{:x}]", "", chunk_name(header.kind),
		header.length, body - ChunkHeader::SIZE as u64, body, header.kind, indent = level * 2)?;

	while buf.stream_position()? + ChunkHeader::SIZE as u64 <= end {
		let child = ChunkHeader::read_unchecked(buf)?;
		let child_end = buf.stream_position()? + child.length as u64;
		if child.version != header.version || child.build != header.build || child_end > end {
			break;
		}
		dump_chunk(buf, out, &child, level + 1)?;
		// Native data only ever starts with one chunk of its own
		if header.kind == ID_NATIVEDATA {
			break;
		}
	}

	buf.seek(SeekFrom::Start(end))?;
	Ok(())
}

/// Prints the chunk tree of a whole stream. Scanning stops at the end of the
/// stream or at a top level chunk of type 0. Returns the last top level header.
pub fn dump_stream<W>(buf: &mut dyn Source, out: &mut W) -> Result<Option<ChunkHeader>, RwError>
where
	W: Write + ?Sized,
{
	let mut last = None;
	while remaining(buf)? >= ChunkHeader::SIZE as u64 {
		let header = ChunkHeader::read(buf)?;
		if header.kind == 0 {
			break;
		}
		dump_chunk(buf, out, &header, 0)?;
		last = Some(header);
	}
	Ok(last)
}

/// The trailing summary line: version, build and packed library id
pub fn version_line(header: &ChunkHeader) -> String {
	format!("{:x} {:x} {:x}", header.version, header.build, pack_library_id(header.version, header.build))
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use crate::{
		chunk::{
			write_chunk,
			write_struct,
			ID_CLUMP,
			ID_EXTENSION
		},
		engine::EngineConfig
	};

	use super::*;

	#[test]
	fn test_chunk_names() {
		assert_eq!("Clump", chunk_name(0x10));
		assert_eq!("Skin PLG", chunk_name(0x116));
		assert_eq!("UV Animation PLG", chunk_name(0x135));
		assert_eq!("Character Set PLG", chunk_name(0x181));
		assert_eq!("Node Name", chunk_name(0x0253F2FE));
		assert_eq!("Native Data PLG", chunk_name(0x510));
		assert_eq!("Unknown", chunk_name(0x2D));
		assert_eq!("Unknown", chunk_name(0x1000));
	}

	#[test]
	fn test_dump_tree() {
		let config = EngineConfig::default();
		let mut data = vec![];
		write_chunk(&mut data, ID_CLUMP, &config, |body| {
			write_struct(body, &config, |s| Ok(s.extend_from_slice(&[1, 0, 0, 0])))?;
			write_chunk(body, ID_EXTENSION, &config, |_| Ok(()))
		}).unwrap();

		let mut out = vec![];
		let last = dump_stream(&mut Cursor::new(data), &mut out).unwrap().unwrap();
		let text = String::from_utf8(out).unwrap();
		assert_eq!("Clump (1c bytes @ 0x0/0xc) - [0x10]\n  \
			Struct (4 bytes @ 0xc/0x18) - [0x1]\n  \
			Extension (0 bytes @ 0x1c/0x28) - [0x3]\n", text);
		assert_eq!("36003 ffff 1803ffff", version_line(&last));
	}

	#[test]
	fn test_foreign_version_is_data() {
		let config = EngineConfig::default();
		let mut old = config;
		old.version = 0x34003;

		let mut data = vec![];
		write_chunk(&mut data, ID_CLUMP, &config, |body| {
			write_struct(body, &old, |s| Ok(s.extend_from_slice(&[0; 4])))
		}).unwrap();
		// terminator
		data.extend_from_slice(&[0; 12]);

		let mut out = vec![];
		dump_stream(&mut Cursor::new(data), &mut out).unwrap();
		assert_eq!(1, String::from_utf8(out).unwrap().lines().count());
	}
}
