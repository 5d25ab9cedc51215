#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

pub const BOURNEMOUTH_URL: &str =
    "https://www.arsenal.com/tickets/arsenal/2025-August-10/afc-bournemouth-vs-arsenal";
pub const BRENTFORD_URL: &str =
    "https://www.arsenal.com/tickets/arsenal/2025-August-23/brentford-vs-arsenal";

pub struct FixtureEnv {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub pages_dir: PathBuf,
    pub outbox_dir: PathBuf,
    _temp: TempDir,
}

/// Copies `tests/fixtures` into a fresh temp dir so runs can write state.
pub fn setup_fixture_env() -> Result<FixtureEnv> {
    let temp = tempdir()?;
    let root = temp.path().to_path_buf();

    let fixture_root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    copy_dir(&fixture_root, &root)?;

    Ok(FixtureEnv {
        config_path: root.join("awaywatch.toml"),
        pages_dir: root.join("pages"),
        outbox_dir: root.join("outbox"),
        root,
        _temp: temp,
    })
}

/// Mid-July 2025, a few weeks before the fixtures in the listing.
pub fn run_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 20, 12, 0, 0).unwrap()
}

pub fn outbox_messages(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut messages = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            messages.push(fs::read_to_string(path)?);
        }
    }
    Ok(messages)
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else {
            fs::copy(src_path, dst_path)?;
        }
    }

    Ok(())
}
