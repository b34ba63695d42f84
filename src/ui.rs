use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Shorten long values for one-line display.
pub fn truncate(value: &str, max: usize) -> String {
    let first_line = value.lines().next().unwrap_or("");
    let count = first_line.chars().count();
    if count <= max && first_line.len() == value.len() {
        return value.to_string();
    }
    let keep: String = first_line.chars().take(max.saturating_sub(1)).collect();
    format!("{keep}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_value() {
        assert_eq!(truncate("10.0.0.0/16", 20), "10.0.0.0/16");
    }

    #[test]
    fn test_truncate_long_value() {
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn test_truncate_multiline_value() {
        assert_eq!(truncate("#!/bin/bash\nset -e", 40), "#!/bin/bash…");
    }
}
