use std::cmp::Ordering;

/// Compares dotted numeric versions. A leading `v` and any `-prerelease`
/// suffix are ignored; missing segments count as zero.
///
/// Returns `None` when either side is not a numeric version.
pub fn compare_versions(current: &str, latest: &str) -> Option<Ordering> {
    let current_segments = parse_version_segments(current)?;
    let latest_segments = parse_version_segments(latest)?;
    let max_len = current_segments.len().max(latest_segments.len());
    for index in 0..max_len {
        let current_value = *current_segments.get(index).unwrap_or(&0);
        let latest_value = *latest_segments.get(index).unwrap_or(&0);
        match current_value.cmp(&latest_value) {
            Ordering::Equal => {}
            other => return Some(other),
        }
    }
    Some(Ordering::Equal)
}

/// True only when `target` parses and is strictly newer than `current`.
pub fn needs_update(current: &str, target: &str) -> bool {
    compare_versions(current, target) == Some(Ordering::Less)
}

fn parse_version_segments(raw: &str) -> Option<Vec<u64>> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    let core = trimmed
        .split_once('-')
        .map(|(left, _)| left)
        .unwrap_or(trimmed);
    if core.is_empty() {
        return None;
    }
    core.split('.')
        .map(|token| token.parse::<u64>().ok())
        .collect()
}
