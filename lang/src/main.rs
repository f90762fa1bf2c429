use std::{
    path::{Path, PathBuf},
    process::exit,
};

use anyhow::{bail, Context};
use clap::Parser;
use log::info;

use spinc::{
    compiler::{Compiler, Options},
    context::DEFAULT_EEPROM_SIZE,
    frontend::OutlineCompiler,
    image::{self, ImageFormat},
    source::{Loader, SOURCE_EXTENSION},
    symbols,
};

/// An open-source compiler for the Spin language.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Spin file to compile
    #[arg(value_name = "OBJECT")]
    object: PathBuf,

    /// Add a directory to the include path
    #[arg(short = 'I', short_alias = 'L', value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Output filename
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Set EEPROM maximum size (up to 16777216 bytes)
    #[arg(
        short = 'M',
        long,
        value_name = "SIZE",
        default_value_t = DEFAULT_EEPROM_SIZE,
        value_parser = clap::value_parser!(u32).range(..=16_777_216),
    )]
    eeprom_size: u32,

    /// Output in binary format
    #[arg(short, long, overrides_with = "eeprom")]
    binary: bool,

    /// Output in EEPROM format
    #[arg(short, long, overrides_with = "binary")]
    eeprom: bool,

    /// Output documentation
    #[arg(short, long)]
    doc: bool,

    /// Output object file tree
    #[arg(short, long)]
    tree: bool,

    /// Output list of filenames
    #[arg(short, long)]
    files: bool,

    /// Quiet mode (suppress any non-error text)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Dump PUB & CON symbol information for top object
    #[arg(short, long = "symbol")]
    symbols: bool,

    /// Enable unused method removal
    #[arg(short, long)]
    unused: bool,
}

impl Args {
    /// `-b` and `-e` override each other; binary unless only `-e` remains.
    fn format(&self) -> ImageFormat {
        match (self.binary, self.eeprom) {
            (false, true) => ImageFormat::Eeprom,
            _ => ImageFormat::Binary,
        }
    }
}

fn default_output(object: &Path, format: ImageFormat) -> PathBuf {
    let object = std::fs::canonicalize(object).unwrap_or_else(|_| object.to_path_buf());
    object.with_extension(format.extension())
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.object.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXTENSION) {
        bail!(
            "ERROR: spinfile must have .{} extension. You passed in: {}",
            SOURCE_EXTENSION,
            args.object.display()
        );
    }

    let report_only = args.tree || args.files || args.symbols;
    let quiet = args.quiet || report_only;
    let format = args.format();
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.object, format));

    if args.tree || !quiet {
        let name = args.object.file_name().unwrap_or(args.object.as_os_str());
        println!("{}", name.to_string_lossy());
    }

    let mut loader = Loader::new(args.include.clone());
    loader.add_file_dir(&args.object);
    let options = Options {
        quiet,
        tree: args.tree,
        eliminate_unused: args.unused && !report_only,
        eeprom_size: args.eeprom_size,
        doc: args.doc && !quiet,
    };
    let mut compiler = Compiler::new(loader, OutlineCompiler::new(), options);
    let root = args.object.to_string_lossy().into_owned();
    let build = compiler.build(&root)?;

    if !report_only {
        let image = image::compose(&build.root, format, args.eeprom_size as usize)?;
        std::fs::write(&output, &image)
            .with_context(|| format!("cannot write {}", output.display()))?;
        info!("wrote {}", output.display());
        if !quiet {
            println!("Program size is {} bytes", image.len());
        }
    }

    if args.symbols {
        for line in symbols::dump(&build.context.source, &build.context.symbols) {
            println!("{}", line);
        }
    }
    if args.files {
        for path in compiler.loader.accessed.unique() {
            println!("{}", path.display());
        }
    }
    if args.verbose && !quiet {
        print!("{}", build.context.list);
    }
    if let Some(doc) = &build.context.doc {
        print!("{}", doc);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Args::parse()) {
        eprintln!("{}", e);
        exit(1);
    }
}
