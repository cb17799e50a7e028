use farm_arena::logger::{init_logger, LogTarget};

fn main() {
    // stdout carries the result document only
    if let Err(e) = init_logger(LogTarget::Stderr) {
        eprintln!("logging disabled: {e:#}");
    }
    let code = farm_arena::runner::main(std::env::args().skip(1));
    std::process::exit(code);
}
