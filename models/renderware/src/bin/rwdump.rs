use clap::Parser;

use std::{
	fs::File,
	io::{
		self,
		BufReader,
		Write
	},
	path::PathBuf,
	process
};

use rgk_models_renderware::{
	dump::{
		dump_stream,
		version_line
	},
	RwError
};

/// Prints the chunk tree of a RenderWare stream
#[derive(Parser)]
#[command(version)]
struct Args {
	file: PathBuf,
}

fn run(args: &Args) -> Result<(), RwError> {
	let mut buf = BufReader::new(File::open(&args.file)?);
	let stdout = io::stdout();
	let mut out = stdout.lock();

	if let Some(header) = dump_stream(&mut buf, &mut out)? {
		writeln!(out, "{}", version_line(&header))?;
	}
	Ok(())
}

fn main() {
	env_logger::init();
	let args = Args::parse();
	if let Err(e) = run(&args) {
		eprintln!("{}: {}", args.file.display(), e);
		process::exit(1);
	}
}
