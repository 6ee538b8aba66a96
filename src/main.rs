use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;

use fivecc::error::{ReadSourceSnafu, WriteOutputSnafu};
use fivecc::tokenizer::{describe_token, tokenize};
use fivecc::{CompileResult, SourceFile, compile};

#[derive(Parser, Debug)]
#[command(name = "fivecc")]
#[command(about = "A small C compiler targeting x86-64 assembly")]
struct Args {
  /// Input C source file, or `-` to read standard input.
  #[arg(required_unless_present = "code")]
  input: Option<String>,
  /// Compile this source text instead of reading a file.
  #[arg(short = 'c', long = "code", conflicts_with = "input")]
  code: Option<String>,
  /// Output assembly file. Writes to stdout if omitted.
  #[arg(short = 'o', long = "output")]
  output: Option<PathBuf>,
  /// Print the token stream to stderr before compiling.
  #[arg(long = "dump-tokens")]
  dump_tokens: bool,
  /// Log pipeline progress at debug level.
  #[arg(short = 'v', long = "verbose")]
  verbose: bool,
}

fn main() {
  let args = Args::parse();
  init_tracing(args.verbose);

  if let Err(err) = run(&args) {
    eprintln!("{err}");
    process::exit(1);
  }
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(filter)
    .init();
}

fn read_source(args: &Args) -> CompileResult<SourceFile> {
  if let Some(code) = &args.code {
    return Ok(SourceFile::new("<inline>", code.as_str()));
  }

  match args.input.as_deref() {
    Some("-") | None => {
      let contents = io::read_to_string(io::stdin()).context(ReadSourceSnafu { path: "<stdin>" })?;
      Ok(SourceFile::new("<stdin>", contents))
    }
    Some(path) => {
      let contents = fs::read_to_string(path).context(ReadSourceSnafu { path })?;
      Ok(SourceFile::new(path, contents))
    }
  }
}

fn dump_tokens(src: &SourceFile) -> CompileResult<()> {
  let tokens = tokenize(src)?;
  for token in &tokens {
    eprintln!(
      "{:>5} {:?} {}",
      token.loc,
      token.kind,
      describe_token(Some(token), &src.contents)
    );
  }
  Ok(())
}

fn run(args: &Args) -> CompileResult<()> {
  let src = read_source(args)?;
  if args.dump_tokens {
    dump_tokens(&src)?;
  }

  let asm = compile(&src)?;

  match &args.output {
    Some(path) => fs::write(path, asm).context(WriteOutputSnafu { path }),
    None => io::stdout()
      .write_all(asm.as_bytes())
      .context(WriteOutputSnafu { path: "<stdout>" }),
  }
}
