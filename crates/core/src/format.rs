use std::time::Duration;

/// Format a duration as `12.3s` or `4m 5s`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{}m {}s", (secs / 60.0) as u64, (secs % 60.0) as u64)
    }
}

/// Compact count for display: `999`, `1.2K`, `3.4M`
pub fn format_count(n: u64) -> String {
    match n {
        0..=999 => n.to_string(),
        1_000..=999_999 => format!("{:.1}K", n as f64 / 1_000.0),
        _ => format!("{:.1}M", n as f64 / 1_000_000.0),
    }
}

/// Parse a count the way the platform renders it: `42`, `1,234`, `1.2K`, `3M`
pub fn parse_count(text: &str) -> Option<u64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let (number, multiplier) = match cleaned.char_indices().last()? {
        (i, 'k' | 'K') => (&cleaned[..i], 1_000.0),
        (i, 'm' | 'M') => (&cleaned[..i], 1_000_000.0),
        (i, 'b' | 'B') => (&cleaned[..i], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };

    if multiplier == 1.0 {
        return number.parse().ok();
    }

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

/// Cut `text` to `max_chars` characters, marking the cut with `...`
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
