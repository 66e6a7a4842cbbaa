//! HTML helpers for Telegram messages

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// `[██████░░░░]` style bar, `width` cells wide
pub fn progress_bar(percent: u8, width: usize) -> String {
    let percent = percent.min(100) as usize;
    let filled = percent * width / 100;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}

/// Cut text to `max` characters, marking the cut
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>Tom & \"Jerry\"</b>"), "&lt;b&gt;Tom &amp; &quot;Jerry&quot;&lt;/b&gt;");
    }

    #[test]
    fn bar_fills_proportionally() {
        assert_eq!(progress_bar(60, 10), "[██████░░░░]");
        assert_eq!(progress_bar(0, 4), "[░░░░]");
        assert_eq!(progress_bar(250, 4), "[████]");
    }

    #[test]
    fn truncates_long_text() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 6), "hello…");
    }
}
