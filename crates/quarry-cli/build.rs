use std::process::Command;

fn main() {
    let commit = git(&["rev-parse", "--short=12", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let modified = git(&["status", "--porcelain"]).map_or(false, |out| !out.is_empty());
    let build_time = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    println!("cargo:rustc-env=QUARRY_BUILD_COMMIT={commit}");
    println!("cargo:rustc-env=QUARRY_BUILD_MODIFIED={modified}");
    println!("cargo:rustc-env=QUARRY_BUILD_TIME={build_time}");
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
