// Build script for the map tracker
// Copies the sample config file next to the built binary

use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Tell Cargo to rerun this script if the config file changes
    println!("cargo:rerun-if-changed=map_tracker.toml");

    let Ok(out_dir) = env::var("OUT_DIR") else {
        return;
    };

    // OUT_DIR = target/<profile>/build/<crate>-<hash>/out
    let Some(target_dir) = Path::new(&out_dir).ancestors().nth(3) else {
        println!("cargo:warning=Could not find target directory");
        return;
    };

    let config_src = Path::new("map_tracker.toml");
    let config_dst = target_dir.join("map_tracker.toml");

    // Never overwrite a config the user already edited
    if config_src.exists() && !config_dst.exists() {
        match fs::copy(config_src, &config_dst) {
            Ok(_) => println!(
                "cargo:warning=Copied config file to {}",
                config_dst.display()
            ),
            Err(e) => println!("cargo:warning=Failed to copy config file: {}", e),
        }
    }
}
