// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the `devmode` binary.

use anyhow::Result;
use std::fs;
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};

/// Runs `devmode` isolated from the user's configuration.
fn devmode(config_home: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_devmode"))
        .args(args)
        .arg("--nocolor")
        .env("XDG_CONFIG_HOME", config_home)
        .env("RUST_LOG", "off")
        .output()?;
    Ok(output)
}

fn write_server_env(root: &Path, contents: &str) -> Result<()> {
    let server = root
        .join("target")
        .join("liberty")
        .join("wlp")
        .join("usr")
        .join("servers")
        .join("defaultServer");
    fs::create_dir_all(&server)?;
    fs::write(server.join("server.env"), contents)?;
    Ok(())
}

#[test]
fn test_debug_port_reads_last_server_env_entry() -> Result<()> {
    let project = tempfile::tempdir()?;
    fs::write(project.path().join("pom.xml"), "<project/>")?;
    write_server_env(
        project.path(),
        "WLP_DEBUG_ADDRESS=7777\nWLP_DEBUG_ADDRESS=8888\nWLP_DEBUG_ADDRESS=9999\n",
    )?;

    let path = project.path().display().to_string();
    let output = devmode(project.path(), &["debug-port", &path])?;

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "9999");
    Ok(())
}

#[test]
fn test_debug_port_prefers_start_parms() -> Result<()> {
    let project = tempfile::tempdir()?;
    let path = project.path().display().to_string();

    let output = devmode(
        project.path(),
        &["debug-port", &path, "--build", "gradle", "--parms", "--libertyDebugPort=5005"],
    )?;

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "5005");
    Ok(())
}

#[test]
fn test_debug_port_without_server_env_fails() -> Result<()> {
    let project = tempfile::tempdir()?;
    fs::write(project.path().join("pom.xml"), "<project/>")?;

    let path = project.path().display().to_string();
    let output = devmode(project.path(), &["debug-port", &path])?;

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
    Ok(())
}

#[test]
fn test_probe_finds_listening_socket() -> Result<()> {
    let config_home = tempfile::tempdir()?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port().to_string();

    let output = devmode(
        config_home.path(),
        &["probe", &port, "--host", "127.0.0.1", "--retries", "3"],
    )?;

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Listening"));
    drop(listener);
    Ok(())
}

#[test]
fn test_probe_gives_up_on_closed_port() -> Result<()> {
    let config_home = tempfile::tempdir()?;
    fs::create_dir_all(config_home.path().join("devmode-supervisor"))?;
    fs::write(
        config_home.path().join("devmode-supervisor").join("config.toml"),
        "probe_interval_ms = 10\n",
    )?;
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port().to_string()
    };

    let output = devmode(
        config_home.path(),
        &["probe", &port, "--host", "127.0.0.1", "--retries", "2"],
    )?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(&format!("port: {port}")), "stderr: {stderr}");
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn test_start_reports_pid_and_ends_with_process() -> Result<()> {
    let config_home = tempfile::tempdir()?;
    let config_dir = config_home.path().join("devmode-supervisor");
    fs::create_dir_all(&config_dir)?;
    fs::write(
        config_dir.join("config.toml"),
        "[build.maven]\nprogram = \"true\"\n",
    )?;

    let project = tempfile::tempdir()?;
    fs::write(project.path().join("pom.xml"), "<project/>")?;

    let path = project.path().display().to_string();
    let output = devmode(config_home.path(), &["start", &path])?;
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "stderr: {stderr}");
    assert!(stderr.contains("Started dev mode for"), "{stderr}");
    assert!(stderr.contains("(pid "), "{stderr}");
    assert!(!stderr.contains("(pid 0)"), "{stderr}");
    assert!(stderr.contains("Dev mode session ended"), "{stderr}");
    Ok(())
}
