fn main() {
    if !cfg!(unix) {
        panic!(
            "{} only works on unix hosts (named pipes and pseudo-terminals are required)",
            env!("CARGO_PKG_NAME")
        );
    }
}
