//! Development tasks for voxtype-relay
//!
//! Usage:
//!   cargo xtask install    Install release binary and man pages (requires sudo)
//!   cargo xtask uninstall  Remove installed binary and man pages (requires sudo)
//!   cargo xtask dist       Build release binary and man pages for distribution

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

const BIN_NAME: &str = "voxtype-relay";
const BIN_DIR: &str = "/usr/local/bin";
const MAN_DIR: &str = "/usr/local/share/man/man1";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let Some(command) = args.first() else {
        print_help();
        return ExitCode::SUCCESS;
    };

    let result = match command.as_str() {
        "install" => install(),
        "uninstall" => uninstall(),
        "dist" => dist().map(|_| ()),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        cmd => {
            eprintln!("Unknown command: {}", cmd);
            print_help();
            Err(anyhow::anyhow!("Unknown command"))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    eprintln!(
        r#"
voxtype-relay development tasks

Usage: cargo xtask <COMMAND>

Commands:
  install    Build release binary, install it to /usr/local/bin with man pages (requires sudo)
  uninstall  Remove voxtype-relay and its man pages (requires sudo)
  dist       Build optimized release binary and man pages for distribution
"#
    );
}

/// Get the project root directory
fn project_root() -> anyhow::Result<PathBuf> {
    let dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => env::current_dir()?,
    };

    // xtask is in a subdirectory, go up one level
    Ok(dir.parent().unwrap_or(&dir).to_path_buf())
}

fn path_str(path: &Path) -> anyhow::Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow::anyhow!("Non UTF-8 path: {:?}", path))
}

/// Build the release binary with man pages; returns the binary and the pages
fn build_release(root: &Path) -> anyhow::Result<(PathBuf, Vec<PathBuf>)> {
    let status = Command::new("cargo")
        .args(["build", "--release", "--bin", BIN_NAME])
        .env("VOXTYPE_GEN_MANPAGES", "1")
        .current_dir(root)
        .status()?;

    if !status.success() {
        anyhow::bail!("Build failed");
    }

    let binary = root.join("target/release").join(BIN_NAME);
    if !binary.exists() {
        anyhow::bail!("Binary not found at {:?}", binary);
    }

    Ok((binary, find_man_pages(&root.join("target/release/build"))?))
}

/// Man pages land in the build script's OUT_DIR; collect the newest set
fn find_man_pages(build_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(build_dir)? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with(BIN_NAME) {
            continue;
        }
        let man = entry.path().join("out/man");
        if let Ok(modified) = std::fs::metadata(&man).and_then(|m| m.modified()) {
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, man));
            }
        }
    }

    let Some((_, man_dir)) = newest else {
        return Ok(Vec::new());
    };
    let mut pages: Vec<PathBuf> = std::fs::read_dir(man_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "1"))
        .collect();
    pages.sort();
    Ok(pages)
}

/// Build release binary and install to /usr/local/bin
fn install() -> anyhow::Result<()> {
    let root = project_root()?;

    println!("==> Building release binary...");
    let (binary, pages) = build_release(&root)?;

    let target = format!("{}/{}", BIN_DIR, BIN_NAME);
    println!("==> Installing to {}...", target);
    let status = Command::new("sudo")
        .args(["install", "-Dm755", path_str(&binary)?, &target])
        .status()?;
    if !status.success() {
        anyhow::bail!("Install failed (sudo required)");
    }

    for page in &pages {
        let Some(name) = page.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let status = Command::new("sudo")
            .args([
                "install",
                "-Dm644",
                path_str(page)?,
                &format!("{}/{}", MAN_DIR, name),
            ])
            .status()?;
        if !status.success() {
            anyhow::bail!("Installing man page {} failed", name);
        }
    }

    println!("==> Installed successfully!");
    println!();
    println!("Installed: {}", target);
    if !pages.is_empty() {
        println!("Man pages: {} ({} pages)", MAN_DIR, pages.len());
    }

    // Show version
    let _ = Command::new(&target).arg("--version").status();

    Ok(())
}

/// Remove voxtype-relay from /usr/local/bin
fn uninstall() -> anyhow::Result<()> {
    let target = format!("{}/{}", BIN_DIR, BIN_NAME);
    println!("==> Removing {}...", target);

    let status = Command::new("sudo").args(["rm", "-f", &target]).status()?;
    if !status.success() {
        anyhow::bail!("Uninstall failed (sudo required)");
    }

    let status = Command::new("sudo")
        .args([
            "sh",
            "-c",
            &format!("rm -f {}/{}.1 {}/{}-*.1", MAN_DIR, BIN_NAME, MAN_DIR, BIN_NAME),
        ])
        .status()?;
    if !status.success() {
        anyhow::bail!("Removing man pages failed");
    }

    println!("==> Uninstalled successfully!");
    Ok(())
}

/// Build optimized release binary for distribution
fn dist() -> anyhow::Result<PathBuf> {
    let root = project_root()?;

    println!("==> Building distribution binary...");
    let (binary, pages) = build_release(&root)?;

    println!("==> Built: {:?}", binary);
    for page in &pages {
        println!("    {:?}", page);
    }

    // Show binary info
    let _ = Command::new("ls").arg("-lh").arg(&binary).status();
    let _ = Command::new(&binary).arg("--version").status();

    Ok(binary)
}
