use std::io;
use thiserror::Error;

use crate::platform::Platform;

#[derive(Error, Debug)]
pub enum RwError {
	#[error("Stream ended before the declared length was satisfied")]
	Truncated,
	#[error("Malformed stream: {0}")]
	Malformed(String),
	#[error("Expected chunk {expected:#X}, found {found:#X}")]
	UnexpectedChunk {
		expected: u32,
		found: u32,
	},
	#[error("No pipeline registered for platform {0:?}")]
	UnsupportedPlatform(Platform),
	#[error("Geometry is instanced for {found:?}, not {expected:?}")]
	PlatformMismatch {
		expected: Platform,
		found: Platform,
	},
	#[error("I/O error")]
	IO {
		source: io::Error,
	},
}

impl From<io::Error> for RwError {
	fn from(source: io::Error) -> RwError {
		match source.kind() {
			io::ErrorKind::UnexpectedEof => RwError::Truncated,
			_ => RwError::IO { source: source },
		}
	}
}

impl RwError {
	pub(crate) fn malformed<S>(msg: S) -> RwError
	where
		S: Into<String>,
	{
		RwError::Malformed(msg.into())
	}
}
