use std::{env, path::PathBuf};

fn main() {
    let target = env::var("TARGET").expect("TARGET not set");

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    let kernel_dir = PathBuf::from(manifest_dir);

    // The kernel is only ever built bare-metal for x86_64 (no host std
    // target shares this linker script). Unit tests run against the host
    // triple and skip this branch entirely.
    if target == "x86_64-unknown-none" || target.contains("nimbus") {
        let linker_script = kernel_dir.join("src/arch/x86_64/link.ld");
        println!("cargo:rustc-link-arg=-T{}", linker_script.display());
        println!("cargo:rustc-link-arg=-no-pie");
    }

    println!("cargo:rerun-if-changed=src/arch/x86_64/link.ld");
}
