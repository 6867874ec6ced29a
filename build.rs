//! Build script for the vibration node firmware
//!
//! Only the embedded build needs linker scripts. `memory.x` comes from
//! embassy-stm32 (`memory-x` feature); `link.x` and `defmt.x` from
//! cortex-m-rt and defmt.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    if std::env::var_os("CARGO_FEATURE_EMBEDDED").is_none() {
        return;
    }

    let target = std::env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumb") {
        println!("cargo:rustc-link-arg-bins=--nmagic");
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }
}
