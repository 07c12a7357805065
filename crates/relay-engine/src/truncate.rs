/// Cap routed message content at `max_bytes`.
/// Truncates at a char boundary and appends a marker showing original vs truncated size.
pub fn truncate_message(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let mut boundary = max_bytes;
    while !content.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &content[..boundary],
        content.len(),
        boundary
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limit() {
        assert_eq!(truncate_message("hello world", 1024), "hello world");
    }

    #[test]
    fn truncates_at_limit() {
        let input = "a".repeat(1000);
        let result = truncate_message(&input, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.ends_with("[truncated: 1000 bytes -> 100 bytes]"));
    }

    #[test]
    fn truncates_at_char_boundary() {
        // 4-byte chars: a 10-byte cap keeps two of them.
        let input = "🦀".repeat(100);
        let result = truncate_message(&input, 10);
        assert!(result.starts_with("🦀🦀\n"));
        assert!(result.contains("[truncated: 400 bytes -> 8 bytes]"));
    }

    #[test]
    fn exact_boundary_no_truncation() {
        let input = "a".repeat(100);
        assert_eq!(truncate_message(&input, 100), input);
    }

    #[test]
    fn one_over_truncates() {
        let input = "a".repeat(101);
        assert!(truncate_message(&input, 100).contains("[truncated: 101 bytes -> 100 bytes]"));
    }

    #[test]
    fn empty_string() {
        assert_eq!(truncate_message("", 100), "");
    }
}
