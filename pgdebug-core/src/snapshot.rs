//! Snapshot size bounding

/// Clamp a rendered snapshot to `limit` bytes.
///
/// The cut lands on a char boundary and a marker naming the original length
/// is appended, so a truncated dump is never mistaken for a complete one.
/// `None` leaves the snapshot as is.
pub fn bound_snapshot(snapshot: String, limit: Option<usize>) -> String {
    let Some(limit) = limit else {
        return snapshot;
    };
    if snapshot.len() <= limit {
        return snapshot;
    }

    let mut cut = limit;
    while !snapshot.is_char_boundary(cut) {
        cut -= 1;
    }

    let original_len = snapshot.len();
    let mut bounded = snapshot;
    bounded.truncate(cut);
    bounded.push_str(&format!("\n... [truncated, {} bytes total]", original_len));
    bounded
}
