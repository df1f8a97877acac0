fn main() {
    if let Err(err) = rowshape::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
