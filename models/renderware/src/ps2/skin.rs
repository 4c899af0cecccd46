use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io::{
	SeekFrom,
	Write
};

use ultraviolet::mat::Mat4;

use crate::{
	chunk::{
		find_chunk,
		ChunkHeader,
		Source,
		ID_STRUCT
	},
	engine::EngineConfig,
	error::RwError,
	platform::Platform,
	skin::{
		read_matrix,
		write_matrix,
		Skin,
		SkinSplit
	}
};

/// Skins streamed by older libraries lack used bones, weight count and split data
const NEW_FORMAT_VERSION: u32 = 0x34000;

pub fn read_native_skin(buf: &mut dyn Source) -> Result<Skin, RwError> {
	find_chunk(buf, ID_STRUCT)?;
	let platform = buf.read_u32::<LE>()?;
	if platform != Platform::Ps2 as u32 {
		return Err(RwError::malformed(format!("native skin platform {} is not PS2", platform)));
	}

	let mut header = [0; 4];
	buf.read_exact(&mut header)?;
	let num_bones = header[0] as usize;
	let old_format = header[1] == 0;

	let mut skin = Skin::new(num_bones, 0);
	if old_format {
		// placeholders so the skin can be written in the new format
		skin.used_bones = (0..num_bones).map(|b| b as u8).collect();
		skin.num_weights = 4;
	} else {
		skin.used_bones = vec![0; header[1] as usize];
		buf.read_exact(&mut skin.used_bones)?;
		skin.num_weights = header[2] as usize;
	}

	skin.inverse_matrices = (0..num_bones).map(|_| read_matrix(buf))
		.collect::<Result<Vec<Mat4>, _>>()?;

	if !old_format {
		// unknown
		buf.seek(SeekFrom::Current(16))?;
		skin.split = SkinSplit::read(buf, num_bones)?;
	}
	Ok(skin)
}

pub fn write_native_skin(buf: &mut Vec<u8>, skin: &Skin, config: &EngineConfig) -> Result<(), RwError> {
	if skin.num_bones > 0xFF || skin.used_bones.len() > 0xFF || skin.inverse_matrices.len() != skin.num_bones {
		return Err(RwError::malformed(format!("PS2 skins hold at most 255 bones, not {}", skin.num_bones)));
	}
	let old_format = config.version < NEW_FORMAT_VERSION;

	ChunkHeader::new(ID_STRUCT, native_skin_size(skin, config) - ChunkHeader::SIZE, config).write(buf)?;
	buf.write_u32::<LE>(Platform::Ps2 as u32)?;
	let header = match old_format {
		true => [skin.num_bones as u8, 0, 0, 0],
		false => [skin.num_bones as u8, skin.used_bones.len() as u8, skin.num_weights as u8, 0],
	};
	buf.write_all(&header)?;

	if !old_format {
		buf.write_all(&skin.used_bones)?;
	}
	for m in skin.inverse_matrices.iter() {
		write_matrix(buf, m)?;
	}
	if !old_format {
		buf.write_all(&[0; 16])?;
		skin.split.write(buf)?;
	}
	Ok(())
}

pub fn native_skin_size(skin: &Skin, config: &EngineConfig) -> u32 {
	let mut size = ChunkHeader::SIZE + 4 + 4 + skin.inverse_matrices.len() as u32 * 64;
	if config.version >= NEW_FORMAT_VERSION {
		size += skin.used_bones.len() as u32 + 16 + skin.split.size();
	}
	size
}
