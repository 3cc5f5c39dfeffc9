// Build information captured once at compile time by the build script.
const VERSION: &str = env!("CARGO_PKG_VERSION");
const COMMIT: &str = env!("QUARRY_BUILD_COMMIT");
const MODIFIED: &str = env!("QUARRY_BUILD_MODIFIED");
const BUILD_TIME: &str = env!("QUARRY_BUILD_TIME");

/// Prints version, commit, and build time.
pub fn execute() {
    println!("version: {VERSION}");
    if COMMIT != "unknown" {
        if MODIFIED == "true" {
            println!("commit: {COMMIT} (dirty)");
        } else {
            println!("commit: {COMMIT}");
        }
    }
    println!("built: {BUILD_TIME}");
}
