fn main() {
    if let Err(e) = live_features::run() {
        log::error!("{}", e);
        eprintln!("live-features: {}", e);
        std::process::exit(1);
    }
}
