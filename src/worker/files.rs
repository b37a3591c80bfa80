//! Output-location file counting.
//!
//! Progress is measured by counting files before and after a downloader
//! call; nothing else is shared between backends. In-progress writes
//! (`.part` files) and hidden files are not counted.

use std::io;
use std::path::{Path, PathBuf};

fn is_counted(name: &str) -> bool {
    !name.starts_with('.') && !name.ends_with(".part")
}

/// Regular files under `dir`, recursively. A missing directory counts as 0.
pub async fn count_files(dir: &Path) -> io::Result<u32> {
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    let mut count: u32 = 0;

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound && current == dir => return Ok(0),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file()
                && entry.file_name().to_str().is_some_and(is_counted)
            {
                count = count.saturating_add(1);
            }
        }
    }

    Ok(count)
}
