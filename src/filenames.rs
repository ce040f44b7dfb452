//! Page file naming and discovery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Result;

pub const SUFFIX: &str = ".page";
pub const INDEX_FILE: &str = "pages.idx";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Page filename for a page number (e.g. "000000042.page").
pub fn page_filename(page_number: u32) -> String {
    format!("{:09}{SUFFIX}", page_number)
}

pub fn for_page_number(page_number: u32, dir: &Path) -> PathBuf {
    dir.join(page_filename(page_number))
}

/// Unique scratch path used while a page file is being sized.
pub fn temp_path(page_number: u32, dir: &Path) -> PathBuf {
    let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(
        "{}.{}-{}.tmp",
        page_filename(page_number),
        std::process::id(),
        unique
    ))
}

/// Returns the page number if `name` is a published page file.
pub fn to_page_number(name: &str) -> Option<u32> {
    let base = name.strip_suffix(SUFFIX)?;
    if base.len() != 9 || !base.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    base.parse::<u32>().ok()
}

/// All page numbers present in `dir`, ascending.
pub fn discover_pages(dir: &Path) -> Result<Vec<u32>> {
    let mut pages = Vec::new();
    if !dir.exists() {
        return Ok(pages);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(page_number) = name.to_str().and_then(to_page_number) {
            pages.push(page_number);
        }
    }
    pages.sort_unstable();
    Ok(pages)
}

pub fn ensure_directory_exists(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}
