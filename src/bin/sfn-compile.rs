//! Command-line driver: compile a textual shader program and print the listing.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use sfn::{compile_with_options, CompileArgs, ShaderProgram};

#[derive(Parser)]
#[command(name = "sfn-compile", version, about = "Lower shader IR to VLIW GPU instructions")]
struct Cli {
    /// Input shader IR file ("-" reads stdin)
    input: PathBuf,
    #[command(flatten)]
    args: CompileArgs,
}

fn read_input(path: &PathBuf) -> Result<String, String> {
    if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).map_err(|e| format!("cannot read stdin: {}", e))
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path.display(), e))
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let caps = cli.args.device_caps();
    let bindings = cli.args.bindings();

    let source = read_input(&cli.input)?;
    let program = ShaderProgram::parse(&source).map_err(|e| e.to_string())?;
    if cli.args.print_ir {
        println!("{}", program);
    }

    let shader =
        compile_with_options(&program, &caps, &bindings, cli.args.options()).map_err(|e| e.to_string())?;
    print!("{}", shader.listing());
    if cli.args.report {
        println!();
        print!("{}", shader.report);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(msg) = run(&cli) {
        eprintln!("error: {}", msg);
        process::exit(1);
    }
}
