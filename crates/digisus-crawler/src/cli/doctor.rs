//! Environment readiness check.

use crate::cli::output;
use crate::renderer::chromium::find_chromium;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct DoctorReport {
    os: &'static str,
    arch: &'static str,
    chromium: Option<String>,
    out_dir: String,
    out_dir_writable: bool,
    ready: bool,
}

/// Check that Chromium can be found and the output root can be written.
pub async fn run(out_dir: &Path) -> Result<()> {
    let chromium = find_chromium();
    let writable = probe_writable(out_dir).await;
    let report = DoctorReport {
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        chromium: chromium.as_ref().map(|p| p.display().to_string()),
        out_dir: out_dir.display().to_string(),
        out_dir_writable: writable,
        ready: chromium.is_some() && writable,
    };

    if output::is_json() {
        output::print_json(&report);
        return Ok(());
    }

    println!("DigiSUS Crawler Doctor");
    println!("======================");
    println!();
    println!("OS:   {}", report.os);
    println!("Arch: {}", report.arch);
    println!();

    match &report.chromium {
        Some(path) => println!("[OK] Chromium found: {path}"),
        None => println!(
            "[!!] Chromium NOT found. Install Chrome/Chromium or set DIGISUS_CHROMIUM_PATH."
        ),
    }
    if report.out_dir_writable {
        println!("[OK] Output root {} is writable", report.out_dir);
    } else {
        println!("[!!] Output root {} is not writable", report.out_dir);
    }

    println!();
    if report.ready {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }

    Ok(())
}

/// Create the root if needed and write/remove a marker file in it.
async fn probe_writable(dir: &Path) -> bool {
    if tokio::fs::create_dir_all(dir).await.is_err() {
        return false;
    }
    let marker = dir.join(".digisus-doctor");
    let ok = tokio::fs::write(&marker, b"ok").await.is_ok();
    let _ = tokio::fs::remove_file(&marker).await;
    ok
}
