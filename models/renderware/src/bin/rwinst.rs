use clap::Parser;

use std::{
	fs,
	io::Cursor,
	path::PathBuf,
	process
};

use rgk_models_renderware::{
	clump::DffFile,
	convert::{
		convert_dff,
		ConvertOptions
	},
	Engine,
	Platform,
	RwError
};

/// Converts the geometry of a RenderWare model between platforms
#[derive(Parser)]
#[command(version)]
struct Args {
	/// Uninstance the geometry of every atomic
	#[arg(short = 'u', conflicts_with = "instance")]
	uninstance: bool,
	/// Instance the geometry of every atomic for the output platform
	#[arg(short = 'i')]
	instance: bool,
	/// Input is a Liberty City Stories mobile model
	#[arg(short = 's')]
	lcs: bool,
	/// Output version in hex, 0 keeps the input version
	#[arg(short = 'v', default_value = "0", value_parser = parse_hex)]
	version: u32,
	/// One of mobile, ps2, xbox, d3d8 or d3d9
	#[arg(short = 'o', default_value = "d3d8")]
	platform: String,
	input: PathBuf,
	#[arg(default_value = "out.dff")]
	output: PathBuf,
}

fn parse_hex(s: &str) -> Result<u32, std::num::ParseIntError> {
	u32::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn run(args: &Args) -> Result<(), RwError> {
	let platform = Platform::from_name(&args.platform).unwrap_or_else(|| {
		log::warn!("Unknown platform {}, using d3d8", args.platform);
		Platform::D3D8
	});
	let opts = ConvertOptions {
		uninstance: args.uninstance,
		instance: args.instance,
		lcs: args.lcs,
		version: if args.version == 0 { None } else { Some(args.version) },
		platform: platform,
	};

	let mut engine = Engine::default();
	let mut dff = DffFile::read(&mut Cursor::new(fs::read(&args.input)?), &engine)?;
	convert_dff(&mut dff, &mut engine, &opts)?;

	// nothing reaches the output file unless the whole model was written
	let mut out = vec![];
	dff.write(&mut out, &engine)?;
	fs::write(&args.output, out)?;
	Ok(())
}

fn main() {
	env_logger::init();
	let args = Args::parse();
	if let Err(e) = run(&args) {
		eprintln!("{}: {}", args.input.display(), e);
		process::exit(1);
	}
}
