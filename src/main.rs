fn main() {
    let args = std::env::args();
    if let Err(err) = ubicd::run(args) {
        eprintln!("ubicd error: {err}");
        std::process::exit(1);
    }
}
