use clap::Parser;

fn main() {
    let cli = airvaultctl::Cli::parse();
    if let Err(err) = airvaultctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
