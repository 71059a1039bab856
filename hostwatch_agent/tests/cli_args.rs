//! CLI smoke test: the agent accepts port flags and starts.
use assert_cmd::cargo::CommandCargoExt;
use std::process::Command;

#[test]
fn agent_starts_with_long_and_short_port_flags() {
    // Unlikely ports to avoid conflicts; we only check the process comes up.
    let mut child = Command::cargo_bin("hostwatch_agent")
        .expect("binary built")
        .args(["--port", "39555"])
        .spawn()
        .expect("spawn agent");
    std::thread::sleep(std::time::Duration::from_millis(300));
    let _ = child.kill();
    let _ = child.wait();

    let mut child2 = Command::cargo_bin("hostwatch_agent")
        .expect("binary built")
        .args(["-p", "39556"])
        .spawn()
        .expect("spawn agent");
    std::thread::sleep(std::time::Duration::from_millis(300));
    let _ = child2.kill();
    let _ = child2.wait();
}
