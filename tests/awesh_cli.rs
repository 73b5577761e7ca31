//! Integration tests that lock the awesh CLI flag surface.

use std::process::Command;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn awesh_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_awesh").expect("awesh test binary not built")
}

#[test]
fn awesh_help_mentions_the_flags() {
    let output = Command::new(awesh_bin())
        .arg("--help")
        .output()
        .expect("run awesh --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("awesh"));
    assert!(combined.contains("--verbose"));
    assert!(combined.contains("--config"));
}

#[test]
fn awesh_version_reports_the_crate_version() {
    let output = Command::new(awesh_bin())
        .arg("--version")
        .output()
        .expect("run awesh --version");
    assert!(output.status.success());
    assert!(combined_output(&output).contains(env!("CARGO_PKG_VERSION")));
}
