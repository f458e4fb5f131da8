fn main() {
    if let Err(e) = p2pcall_lib::run() {
        eprintln!("p2pcall: {e}");
        std::process::exit(1);
    }
}
