// build.rs — assemble the AP boot stub (ELF64) for bare-metal builds
use std::{env, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=asm/x86_64/ap_trampoline.asm");

    let target = env::var("TARGET").unwrap_or_default();
    if !target.starts_with("x86_64-") {
        println!("cargo:warning=Skipping ASM for non-x86_64 target: {target}");
        return;
    }
    // Host builds (unit tests) never link the stub; the bring-up logic takes
    // the image as a plain byte slice there.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    let mut build = nasm_rs::Build::new();
    build.flag("-f").flag("elf64");
    build.include("asm/x86_64");

    if env::var("PROFILE").as_deref() == Ok("debug") {
        build.debug(true);
        build.flag("-w+all");
    }

    build.file("asm/x86_64/ap_trampoline.asm");

    if let Err(e) = build.compile("ap_boot_stub") {
        panic!("NASM build failed: {e}");
    }

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    println!("cargo:rustc-link-search=native={}", out_dir.display());
    println!("cargo:rustc-link-lib=static=ap_boot_stub");
}
