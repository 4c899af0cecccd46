use clap::Parser;

use std::{
	fs,
	io::Cursor,
	path::PathBuf,
	process
};

use rgk_models_renderware::{
	chunk::{
		expect_chunk,
		ID_TEXDICTIONARY
	},
	txd::TexDictionary,
	Engine,
	RwError
};

/// Reads a texture dictionary and writes it back out
#[derive(Parser)]
#[command(version)]
struct Args {
	input: PathBuf,
	#[arg(default_value = "out.txd")]
	output: PathBuf,
}

fn run(args: &Args) -> Result<(), RwError> {
	let mut engine = Engine::default();
	let mut buf = Cursor::new(fs::read(&args.input)?);
	let header = expect_chunk(&mut buf, ID_TEXDICTIONARY)?;
	let txd = TexDictionary::read(&mut buf, &engine)?;

	engine.config.version = header.version;
	engine.config.build = header.build;
	if let Some(platform) = txd.textures.first().and_then(|t| t.platform) {
		engine.config.platform = platform;
	}

	let mut out = vec![];
	txd.write(&mut out, &engine)?;
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
