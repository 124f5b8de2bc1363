use std::env;
use std::process::Command;

/// Short commit id stamped into saved results: explicit override first, then the local checkout
fn commit_sha() -> Option<String> {
    let from_env = env::var("METCV_GIT_SHA").ok();
    let from_git = || {
        Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
    };

    from_env
        .or_else(from_git)
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
}

fn main() {
    for watched in [".git/HEAD", ".git/refs"] {
        println!("cargo:rerun-if-changed={}", watched);
    }
    println!("cargo:rerun-if-env-changed=METCV_GIT_SHA");

    if let Some(sha) = commit_sha() {
        println!("cargo:rustc-env=METCV_GIT_SHA={}", sha);
    }
}
