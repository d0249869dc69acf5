//! Parsing helpers for `/proc/self/mountinfo` (and similar mountinfo files).

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    pub source: Option<String>,
}

// mountinfo format:
//   <id> <parent> <major:minor> <root> <mount point> <opts...> - <fstype> <source> <superopts>
pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            let (pre, post) = match line.split_once(" - ") {
                Some((pre, post)) => (pre, Some(post)),
                None => (line, None),
            };
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let source = post
                .and_then(|post| post.split_whitespace().nth(1))
                .map(str::to_string);
            Some(MountInfo {
                mount_point: PathBuf::from(unescape_mount_path(pre_fields[4])),
                source,
            })
        })
        .collect()
}

pub fn is_mounted_from_info(path: &Path, entries: &[MountInfo]) -> bool {
    let target = normalize_path(path);
    entries
        .iter()
        .any(|entry| normalize_path(&entry.mount_point) == target)
}

/// Mount points whose source is `dev_path` itself or one of its partitions.
pub fn mounted_under_device(entries: &[MountInfo], dev_path: &Path) -> Vec<PathBuf> {
    let device = dev_path.to_string_lossy();
    let mut mounts: Vec<PathBuf> = entries
        .iter()
        .filter(|entry| {
            entry
                .source
                .as_deref()
                .is_some_and(|source| is_device_or_partition(source, &device))
        })
        .map(|entry| entry.mount_point.clone())
        .collect();
    mounts.sort();
    mounts.dedup();
    mounts
}

// `/dev/sda` owns `/dev/sda1`; a disk name ending in a digit (`nvme0n1`,
// `mmcblk0`) owns `p<N>` partitions only.
fn is_device_or_partition(source: &str, device: &str) -> bool {
    let Some(rest) = source.strip_prefix(device) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    let number = if device.ends_with(|c: char| c.is_ascii_digit()) {
        rest.strip_prefix('p')
    } else {
        Some(rest)
    };
    number.is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}
