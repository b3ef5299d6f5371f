//! Media library listings.
//!
//! Lists one directory below the media root at a time, directories first,
//! names in natural order (`e2` before `e10`), each file annotated with any
//! recorded view progress.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::debug;

use crate::model::{MediaItem, MediaListing};
use crate::progress::ProgressStore;

pub struct MediaLibrary {
    root: PathBuf,
    progress: Arc<ProgressStore>,
}

impl MediaLibrary {
    pub fn new(root: impl Into<PathBuf>, progress: Arc<ProgressStore>) -> Self {
        Self {
            root: root.into(),
            progress,
        }
    }

    pub fn from_config(progress: Arc<ProgressStore>) -> Self {
        Self::new(salonconfig::get_config().get_media_root(), progress)
    }

    /// List `folder`, a path relative to the media root ("" for the root).
    pub async fn list(&self, folder: &str) -> Result<MediaListing> {
        let folder = folder.trim_matches('/');
        if folder.split('/').any(|part| part == "..") {
            bail!("Folder '{folder}' escapes the media root");
        }

        let dir = if folder.is_empty() {
            self.root.clone()
        } else {
            self.root.join(folder)
        };
        debug!(dir = %dir.display(), "Listing media directory");

        let progress = self.progress.read().await;
        let folder_progress = progress.entries.get(folder);

        let mut media = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.starts_with('.') {
                continue;
            }
            let is_directory = entry.file_type().await?.is_dir();
            let view_progress = (!is_directory)
                .then(|| folder_progress)
                .flatten()
                .filter(|saved| saved.content_name == name)
                .map(|saved| saved.position_seconds);
            media.push(MediaItem {
                path: join_relative(folder, &name),
                parent: folder.to_string(),
                name,
                is_directory,
                view_progress,
            });
        }

        media.sort_by(|a, b| {
            b.is_directory
                .cmp(&a.is_directory)
                .then_with(|| natural_cmp(&a.name, &b.name))
        });

        Ok(MediaListing {
            media,
            last_watched: progress.last_watched,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn join_relative(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}

/// Case-insensitive comparison treating digit runs as numbers, so that
/// `Episode 2` sorts before `Episode 10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(lc), Some(rc)) => {
                if lc.is_ascii_digit() && rc.is_ascii_digit() {
                    let ln = take_number(&mut left);
                    let rn = take_number(&mut right);
                    match ln.cmp(&rn) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                let lc = lc.to_ascii_lowercase();
                let rc = rc.to_ascii_lowercase();
                match lc.cmp(&rc) {
                    Ordering::Equal => {
                        left.next();
                        right.next();
                    }
                    other => return other,
                }
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> u64 {
    let mut value: u64 = 0;
    while let Some(c) = chars.peek().copied() {
        let Some(digit) = c.to_digit(10) else { break };
        value = value.saturating_mul(10).saturating_add(digit as u64);
        chars.next();
    }
    value
}
