fn main() {
    if let Err(e) = lidar_pipeline::cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
