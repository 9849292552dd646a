use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "holon")]
#[command(about = "Holon blockchain CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full node
    Node,
    /// Validator operations (register, stake, unstake)
    Validator,
    /// Wallet operations
    Wallet,
}

fn main() {
    let _cli = Cli::parse();
    // TODO: dispatch to sub-modules
    println!("Holon CLI stub");
}
