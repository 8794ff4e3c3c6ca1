fn main() {
    // `itree version` reports when and from which commit it was built
    let built_at = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC");
    println!("cargo:rustc-env=BUILD_DATE={}", built_at);
    println!("cargo:rerun-if-changed=build.rs");

    built::write_built_file().expect("Failed to record build metadata for itree");
}
