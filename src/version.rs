//! Per-inode version management.
//!
//! Every inode carries a fixed ring of [`VersionEntry`] slots, oldest
//! first. Cutting a snapshot copies the latest entry's metadata (size and
//! block index) into a fresh entry, so the two share one data block until a
//! divergent write lands. When the ring is full, the oldest non-pinned
//! entry is rotated out; the newest entry is never a rotation victim, and a
//! fully pinned ring refuses the snapshot instead of dropping history.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};

use crate::error::Error;
use crate::sys::inode::{Inode, VersionEntry};
use crate::sys::MAX_VERSIONS;

/// Commit message of the version cut at inode creation.
pub const INITIAL_COMMIT_MSG: &str = "Initial Creation";

/// Commit message of snapshots cut automatically by the write path.
pub const AUTO_SNAPSHOT_MSG: &str = "Auto-save";

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Reset an inode's version state and cut `v1` with empty content.
pub fn init_inode(inode: &mut Inode) {
    inode.total_versions = 0;
    inode.latest_version = 0;
    inode.versions = [VersionEntry::default(); MAX_VERSIONS];
    create_snapshot(inode, INITIAL_COMMIT_MSG).expect("empty ring always has room");
}

/// Whether the snapshot-interval policy calls for a new version before the
/// next write.
pub fn should_snapshot(inode: &Inode, interval_secs: i64) -> bool {
    should_snapshot_at(inode, interval_secs, now_secs())
}

pub(crate) fn should_snapshot_at(inode: &Inode, interval_secs: i64, now: i64) -> bool {
    match inode.latest() {
        None => true,
        Some(latest) => now - latest.timestamp >= interval_secs,
    }
}

/// Cut a new snapshot, rotating out the oldest non-pinned version when the
/// ring is full. Returns the new version id.
pub fn create_snapshot(inode: &mut Inode, commit_msg: &str) -> Result<u32, Error> {
    create_snapshot_at(inode, commit_msg, now_secs())
}

pub(crate) fn create_snapshot_at(
    inode: &mut Inode,
    commit_msg: &str,
    now: i64,
) -> Result<u32, Error> {
    create_snapshot_rotating(inode, commit_msg, now).map(|(id, _)| id)
}

/// Like [`create_snapshot_at`], but also hands back the entry rotated out,
/// so the engine can release its block reference.
pub(crate) fn create_snapshot_rotating(
    inode: &mut Inode,
    commit_msg: &str,
    now: i64,
) -> Result<(u32, Option<VersionEntry>), Error> {
    let mut total = inode.total_versions as usize;
    let mut rotated = None;

    if total >= MAX_VERSIONS {
        // the absolute latest is protected: victims come from [0, total-1)
        let victim = inode.versions[..total - 1]
            .iter()
            .position(|v| !v.pinned())
            .ok_or(Error::NoSpace)?;
        rotated = Some(inode.versions[victim]);
        inode.versions.copy_within(victim + 1..total, victim);
        total -= 1;
    }

    let mut entry = VersionEntry::default();
    match total.checked_sub(1).map(|idx| inode.versions[idx]) {
        Some(prev) => {
            // metadata copy-on-write: the new version shares the previous
            // version's data block until a divergent write
            entry.file_size = prev.file_size;
            entry.block_count = prev.block_count;
            entry.block_list_start = prev.block_list_start;
            entry.version_id = prev.version_id + 1;
        }
        None => entry.version_id = 1,
    }
    entry.timestamp = now;
    entry.set_commit_msg(commit_msg);

    inode.versions[total] = entry;
    inode.total_versions = (total + 1) as u32;
    inode.latest_version = entry.version_id;
    Ok((entry.version_id, rotated))
}

/// Look a version up by id; `0` means the latest. `None` covers both "never
/// existed" and "rotated out".
pub fn get_version(inode: &Inode, version_id: u32) -> Option<&VersionEntry> {
    if inode.total_versions == 0 {
        return None;
    }
    if version_id == 0 {
        return inode.latest();
    }
    inode
        .live_versions()
        .iter()
        .find(|v| v.version_id == version_id)
}

pub fn get_version_mut(inode: &mut Inode, version_id: u32) -> Option<&mut VersionEntry> {
    if inode.total_versions == 0 {
        return None;
    }
    let total = inode.total_versions as usize;
    if version_id == 0 {
        return Some(&mut inode.versions[total - 1]);
    }
    inode.versions[..total]
        .iter_mut()
        .find(|v| v.version_id == version_id)
}

/// The newest version whose timestamp is at or before the moment described
/// by `time_str` (`"yesterday"`, `"2h"`, `"30m"`, `"7d"`). `None` when the
/// file did not exist yet, or when the string parses to nothing.
pub fn find_by_time_str<'a>(inode: &'a Inode, time_str: &str) -> Option<&'a VersionEntry> {
    find_by_time_at(inode, time_str, now_secs())
}

pub(crate) fn find_by_time_at<'a>(
    inode: &'a Inode,
    time_str: &str,
    now: i64,
) -> Option<&'a VersionEntry> {
    let target = parse_relative_time(time_str, now)?;
    inode
        .live_versions()
        .iter()
        .rev()
        .find(|v| v.timestamp <= target)
}

/// `"yesterday"` or `<digits><h|m|d>`, resolved against `now`.
fn parse_relative_time(time_str: &str, now: i64) -> Option<i64> {
    if time_str == "yesterday" {
        return Some(now - 24 * 3600);
    }
    let (digits, unit) = time_str.split_at(time_str.len().checked_sub(1)?);
    let value: i64 = digits.parse().ok()?;
    let seconds = match unit {
        "h" => value.checked_mul(3600)?,
        "m" => value.checked_mul(60)?,
        "d" => value.checked_mul(24 * 3600)?,
        _ => return None,
    };
    Some(now - seconds)
}

/// Flip a version's pin flag. Returns the new state.
pub fn toggle_pin(inode: &mut Inode, version_id: u32) -> Result<bool, Error> {
    let entry = get_version_mut(inode, version_id).ok_or(Error::NotFound)?;
    entry.is_pinned ^= 1;
    Ok(entry.pinned())
}

/// Render one line per live version into `buf`, stopping before overflow.
/// Returns the bytes written.
pub fn list_versions(inode: &Inode, buf: &mut [u8]) -> usize {
    let mut written = 0;
    for entry in inode.live_versions() {
        let line = format!(
            "v{}{} | {} | {} | {} bytes\n",
            entry.version_id,
            if entry.pinned() { "[PIN]" } else { "" },
            render_timestamp(entry.timestamp),
            entry.commit_msg(),
            entry.file_size,
        );
        let bytes = line.as_bytes();
        if written + bytes.len() > buf.len() {
            break;
        }
        buf[written..written + bytes.len()].copy_from_slice(bytes);
        written += bytes.len();
    }
    written
}

fn render_timestamp(secs: i64) -> String {
    match Local.timestamp_opt(secs, 0).single() {
        Some(moment) => moment.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => secs.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::inode::TypePerm;

    fn file_inode() -> Inode {
        let mut inode = Inode::new(7, TypePerm::FILE.bits() | 0o644, 1000, 1000);
        init_inode(&mut inode);
        inode
    }

    #[test]
    fn init_cuts_v1() {
        let inode = file_inode();
        assert_eq!(inode.total_versions, 1);
        assert_eq!(inode.latest_version, 1);
        let v1 = get_version(&inode, 0).unwrap();
        assert_eq!(v1.version_id, 1);
        assert_eq!(v1.file_size, 0);
        assert_eq!(v1.block_list_start, 0);
        assert_eq!(v1.commit_msg(), INITIAL_COMMIT_MSG);
    }

    #[test]
    fn snapshot_inherits_latest_metadata() {
        let mut inode = file_inode();
        {
            let latest = inode.latest_mut().unwrap();
            latest.file_size = 321;
            latest.block_count = 1;
            latest.block_list_start = 1042;
        }
        let id = create_snapshot(&mut inode, "Backup v2").unwrap();
        assert_eq!(id, 2);
        assert_eq!(inode.latest_version, 2);

        let v2 = get_version(&inode, 2).unwrap();
        assert_eq!(v2.file_size, 321);
        assert_eq!(v2.block_count, 1);
        assert_eq!(v2.block_list_start, 1042);
        assert!(!v2.pinned());

        // the source entry is untouched
        let v1 = get_version(&inode, 1).unwrap();
        assert_eq!(v1.file_size, 321);
    }

    #[test]
    fn overflow_rotates_oldest_unpinned() {
        let mut inode = file_inode();
        // grow to v135: the ring holds MAX_VERSIONS, so v1..v7 rotate out
        for i in 2..=135 {
            create_snapshot(&mut inode, &format!("Stress v{}", i)).unwrap();
        }
        assert_eq!(inode.total_versions as usize, MAX_VERSIONS);
        assert_eq!(inode.versions[0].version_id, 8);
        assert_eq!(inode.latest_version, 135);
        assert!(get_version(&inode, 1).is_none());
        assert!(get_version(&inode, 8).is_some());

        // ids stay strictly increasing across the ring
        let ids: Vec<u32> = inode.live_versions().iter().map(|v| v.version_id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn pinned_version_survives_rotation() {
        let mut inode = file_inode();
        for i in 2..=MAX_VERSIONS as u32 {
            create_snapshot(&mut inode, &format!("v{}", i)).unwrap();
        }
        assert_eq!(inode.total_versions as usize, MAX_VERSIONS);

        // protect v2; the next rotation must take v1
        assert!(toggle_pin(&mut inode, 2).unwrap());
        create_snapshot(&mut inode, "one past full").unwrap();
        assert!(get_version(&inode, 1).is_none());
        assert!(get_version(&inode, 2).is_some());

        // now v2 is the oldest; the next rotation skips it and takes v3
        create_snapshot(&mut inode, "two past full").unwrap();
        assert!(get_version(&inode, 2).is_some());
        assert!(get_version(&inode, 3).is_none());
    }

    #[test]
    fn fully_pinned_ring_refuses_snapshot() {
        let mut inode = file_inode();
        for i in 2..=MAX_VERSIONS as u32 {
            create_snapshot(&mut inode, &format!("v{}", i)).unwrap();
        }
        for id in 1..MAX_VERSIONS as u32 {
            toggle_pin(&mut inode, id).unwrap();
        }
        // every rotation candidate is pinned; the protected latest does not count
        assert_eq!(
            create_snapshot(&mut inode, "no room"),
            Err(Error::NoSpace)
        );
        assert_eq!(inode.total_versions as usize, MAX_VERSIONS);
    }

    #[test]
    fn snapshot_interval_policy() {
        let mut inode = file_inode();
        let now = inode.latest().unwrap().timestamp;
        assert!(!should_snapshot_at(&inode, 30, now + 10));
        assert!(should_snapshot_at(&inode, 30, now + 30));

        inode.total_versions = 0;
        assert!(should_snapshot_at(&inode, 30, now));
    }

    #[test]
    fn time_travel_lookup() {
        let mut inode = file_inode();
        let base = 1_700_000_000;
        inode.versions[0].timestamp = base;
        create_snapshot_at(&mut inode, "later", base + 3 * 3600).unwrap();

        let now = base + 4 * 3600;
        // two hours ago only v1 existed
        assert_eq!(find_by_time_at(&inode, "2h", now).unwrap().version_id, 1);
        // thirty minutes ago v2 was live
        assert_eq!(find_by_time_at(&inode, "30m", now).unwrap().version_id, 2);
        // a day ago the file did not exist
        assert!(find_by_time_at(&inode, "yesterday", now).is_none());
        assert_eq!(
            find_by_time_at(&inode, "1d", now + 2 * 24 * 3600)
                .unwrap()
                .version_id,
            2
        );
        // malformed strings resolve to nothing
        assert!(find_by_time_at(&inode, "2x", now).is_none());
        assert!(find_by_time_at(&inode, "", now).is_none());
    }

    #[test]
    fn pin_toggle_round_trip() {
        let mut inode = file_inode();
        assert!(toggle_pin(&mut inode, 1).unwrap());
        assert!(!toggle_pin(&mut inode, 1).unwrap());
        assert_eq!(toggle_pin(&mut inode, 42), Err(Error::NotFound));
    }

    #[test]
    fn list_renders_and_respects_bounds() {
        let mut inode = file_inode();
        create_snapshot(&mut inode, "second").unwrap();
        toggle_pin(&mut inode, 2).unwrap();
        {
            let v2 = get_version_mut(&mut inode, 2).unwrap();
            v2.file_size = 512;
        }

        let mut buf = [0_u8; 512];
        let written = list_versions(&inode, &mut buf);
        let text = std::str::from_utf8(&buf[..written]).unwrap();
        assert!(text.contains("v1 |"));
        assert!(text.contains("v2[PIN]"));
        assert!(text.contains("| second |"));
        assert!(text.contains("512 bytes"));
        assert_eq!(text.lines().count(), 2);

        // a buffer with room for one line stops before overflow
        let first_line_len = text.lines().next().unwrap().len() + 1;
        let mut small = vec![0_u8; first_line_len + 4];
        let written = list_versions(&inode, &mut small);
        assert_eq!(written, first_line_len);
    }
}
