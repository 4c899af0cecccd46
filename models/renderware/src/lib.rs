//! RenderWare binary streams: clumps, texture dictionaries and the
//! per-platform instancing of geometry.

pub mod adc;
pub mod atomic;
pub mod binmesh;
pub mod chunk;
pub mod clump;
pub mod convert;
pub mod d3d;
pub mod dump;
pub mod engine;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod hanim;
pub mod lcs;
pub mod material;
pub mod matfx;
pub mod native;
pub mod nodename;
pub mod pipeline;
pub mod platform;
pub mod plugin;
pub mod ps2;
pub mod skin;
pub mod switch;
pub mod txd;
pub mod wdgl;

pub use engine::{
	Engine,
	EngineConfig
};
pub use error::RwError;
pub use platform::Platform;
