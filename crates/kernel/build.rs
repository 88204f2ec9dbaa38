fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    // Hosted builds run the unit tests and need no linker script.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let script_path = std::path::Path::new(&manifest_dir).join(format!("linker-{}.ld", arch));
    println!("cargo:rustc-link-arg-bins=-T{}", script_path.display());
    println!("cargo:rerun-if-changed={}", script_path.display());
}
