//! Seismonet CLI entry point.

fn main() {
    std::process::exit(seismonet_runner::run())
}
