use std::process;

fn main() {
    if let Err(e) = pipetree::cli::run() {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
