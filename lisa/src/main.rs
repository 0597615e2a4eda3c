mod cli;

use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();
    match cli::execute(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("lisa: {e:#}");
            std::process::exit(1);
        }
    }
}
