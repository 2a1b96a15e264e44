pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version_command() {
    println!("pila {}", VERSION);
}
