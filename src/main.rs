fn main() {
    if let Err(err) = batch_loader::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
