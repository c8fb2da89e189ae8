use crate::core::model::{JobMode, ProgressRecord, SessionSnapshot};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaylistProgress {
    pub current: u64,
    pub total: u64,
    pub percent: f64,
}

/// Item-level progress of a playlist record. `None` unless both counters are
/// present and `total` is non-zero.
pub fn playlist_progress(rec: &ProgressRecord) -> Option<PlaylistProgress> {
    let (current, total) = (rec.current_item?, rec.total_items?);
    if total == 0 {
        tracing::warn!(current, "playlist record with total_items=0 ignored");
        return None;
    }
    let percent = (current as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
    Some(PlaylistProgress { current, total, percent })
}

/// Folds playlist counters into the snapshot. Returns whether anything changed.
pub fn aggregate(rec: &ProgressRecord, snap: &mut SessionSnapshot) -> bool {
    let Some(p) = playlist_progress(rec) else {
        return false;
    };

    let before = (snap.mode, snap.current_item, snap.total_items, snap.playlist_percent);
    snap.mode = JobMode::Playlist;
    snap.current_item = Some(p.current);
    snap.total_items = Some(p.total);
    snap.playlist_percent = Some(p.percent);
    before != (snap.mode, snap.current_item, snap.total_items, snap.playlist_percent)
}
