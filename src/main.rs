fn main() {
    if let Err(err) = energy_stats::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
