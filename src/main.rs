fn main() {
    if lodestar::run().is_err() {
        std::process::exit(1);
    }
}
