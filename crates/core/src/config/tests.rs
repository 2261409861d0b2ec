use std::time::Duration;

use super::types::KestrelConfig;
use crate::ids::MAX_THREADS;

#[test]
fn parse_minimal_toml() {
    let toml = r#"
[threads]
count = 2
"#;
    let cfg = KestrelConfig::from_toml(toml).unwrap();
    assert_eq!(cfg.threads.count, 2);
    assert_eq!(cfg.queues.capacity_blocks, 4096);
    assert_eq!(cfg.tasks.owned_capacity, 256);
}

#[test]
fn parse_full_toml() {
    let toml = r#"
[threads]
count = 4

[queues]
capacity_blocks = 1024

[tasks]
owned_capacity = 64

[frame]
target_fps = 30
"#;
    let cfg = KestrelConfig::from_toml(toml).unwrap();
    assert_eq!(cfg.threads.count, 4);
    assert_eq!(cfg.queues.capacity_blocks, 1024);
    assert_eq!(cfg.tasks.owned_capacity, 64);
    assert_eq!(cfg.frame.target_fps, 30);
    let budget = cfg.frame_budget().unwrap();
    assert!(budget > Duration::from_millis(33) && budget < Duration::from_millis(34));
}

#[test]
fn empty_toml_uses_defaults() {
    let cfg = KestrelConfig::from_toml("").unwrap();
    assert!(cfg.threads.count >= 1 && cfg.threads.count <= MAX_THREADS);
}

#[test]
fn unpaced_frame_has_no_budget() {
    let toml = r#"
[threads]
count = 1

[frame]
target_fps = 0
"#;
    let cfg = KestrelConfig::from_toml(toml).unwrap();
    assert!(cfg.frame_budget().is_none());
}

#[test]
fn reject_zero_threads() {
    let toml = r#"
[threads]
count = 0
"#;
    let err = KestrelConfig::from_toml(toml).unwrap_err();
    assert!(err.to_string().contains("threads.count"), "got: {err}");
}

#[test]
fn reject_too_many_threads() {
    let toml = format!("[threads]\ncount = {}\n", MAX_THREADS + 1);
    let err = KestrelConfig::from_toml(&toml).unwrap_err();
    assert!(err.to_string().contains("out of range"), "got: {err}");
}

#[test]
fn reject_non_power_of_two_capacity() {
    let toml = r#"
[threads]
count = 1

[queues]
capacity_blocks = 1000
"#;
    let err = KestrelConfig::from_toml(toml).unwrap_err();
    assert!(err.to_string().contains("power of two"), "got: {err}");
}

#[test]
fn reject_capacity_below_one_message() {
    let toml = r#"
[threads]
count = 1

[queues]
capacity_blocks = 8
"#;
    let err = KestrelConfig::from_toml(toml).unwrap_err();
    assert!(err.to_string().contains("full message"), "got: {err}");
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = KestrelConfig::from_toml("[threads\ncount = 1").unwrap_err();
    assert!(err.to_string().contains("parse"), "got: {err}");
}

#[test]
fn env_override_max_delta() {
    // SAFETY: test-only; no other test reads frame.max_delta_ms
    unsafe {
        std::env::set_var("KESTREL_FRAME_MAX_DELTA_MS", "250");
    }
    let cfg = KestrelConfig::from_toml("[threads]\ncount = 1\n").unwrap();
    assert_eq!(cfg.max_delta(), Duration::from_millis(250));
    unsafe {
        std::env::remove_var("KESTREL_FRAME_MAX_DELTA_MS");
    }
}

#[test]
fn with_threads_overrides_count_only() {
    let cfg = KestrelConfig::with_threads(3);
    assert_eq!(cfg.threads.count, 3);
    assert_eq!(cfg.queues.capacity_blocks, 4096);
    cfg.validate().unwrap();
}
