fn main() {
    if let Err(err) = mailmeter::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
