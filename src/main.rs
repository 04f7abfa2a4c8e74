use clap::{Parser, Subcommand};

mod commands;
mod tty;

use afpipe::output;
use commands::{compile, pipelines};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "afpipe")]
#[command(version = VERSION)]
#[command(about = "Compile AlphaFold inference pipelines into Vertex AI pipeline templates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the Filestore network and compile a pipeline template
    Compile(compile::CompileArgs),
    /// List registered pipeline functions
    #[command(visible_alias = "list")]
    Pipelines(pipelines::PipelinesArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (json_result, exit_code) = commands::run_json(cli.command);

    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
