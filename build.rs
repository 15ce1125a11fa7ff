fn main() {
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let file = match arch.as_str() {
        "x86_64" => "src/arch/x86_64.S",
        "aarch64" => "src/arch/aarch64.S",
        other => panic!("unsupported architecture: {}", other),
    };
    println!("cargo:rerun-if-changed={}", file);
    cc::Build::new().file(file).compile("registers");
}
