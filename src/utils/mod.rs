use regex::Regex;
use std::sync::OnceLock;

/// Stem used when a title sanitizes down to nothing
pub const PLACEHOLDER_STEM: &str = "Unknown";

/// Punctuation kept even though some platforms classify it alongside symbols
const ALLOWED_PUNCTUATION: &str = "-'&,.!?";

/// Characters that are illegal in filenames on at least one common filesystem
const ILLEGAL_FILENAME_CHARS: &[char] = &['|', '/', '\\', ':', '*', '?', '"', '<', '>'];

/// Characters trimmed from both ends of a sanitized title
const EDGE_TRIM_CHARS: &[char] = &[' ', '-', '_', '(', ')'];

fn symbol_or_control_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{S}\p{C}]").expect("valid symbol regex"))
}

fn descriptor_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)\s*[\[(]?\s*\b(?:",
            r"official\s*(?:music\s*)?video|official\s*audio|official\s*lyric\s*video|",
            r"lyrics?\s*(?:video)?|music\s*video|hd|hq|4k|mv|audio|",
            r"visuali[sz]er|remastered(?:\s*\d{4})?|",
            r"live|acoustic|remix|karaoke",
            r")\b\s*[\])]?",
        ))
        .expect("valid descriptor regex")
    })
}

fn repeated_whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").expect("valid whitespace regex"))
}

/// Sanitize a video title into a safe, readable file stem (no extension)
///
/// Drops emoji and other symbols, strips promotional tags such as
/// `(Official Video)` or `[4K]`, removes characters that filesystems reject,
/// then collapses whitespace and trims leftover separators. The result may be
/// empty; see [`file_stem_or_placeholder`].
///
/// Tags only match as whole words, so `Olive Tree` keeps its `live` and
/// `Hdtv` is left alone, unlike a plain substring search.
pub fn sanitize_filename(title: &str) -> String {
    let without_symbols: String = title
        .chars()
        .filter(|c| {
            ALLOWED_PUNCTUATION.contains(*c)
                || !symbol_or_control_re().is_match(c.encode_utf8(&mut [0u8; 4]))
        })
        .collect();

    let without_tags = descriptor_tag_re().replace_all(&without_symbols, "");

    let without_illegal: String = without_tags
        .chars()
        .filter(|c| !ILLEGAL_FILENAME_CHARS.contains(c))
        .collect();

    repeated_whitespace_re()
        .replace_all(&without_illegal, " ")
        .trim_matches(EDGE_TRIM_CHARS)
        .to_string()
}

/// Use `stem` as a file stem, or the placeholder when it is empty
pub fn file_stem_or_placeholder(stem: &str) -> &str {
    if stem.is_empty() {
        PLACEHOLDER_STEM
    } else {
        stem
    }
}

/// Render a fixed-width text progress bar for chat status messages
pub fn progress_bar(fraction: f64) -> String {
    const WIDTH: usize = 20;

    let filled = ((WIDTH as f64) * fraction.clamp(0.0, 1.0)) as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(WIDTH - filled))
}

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Check if the current environment has required tools
pub async fn check_dependencies(yt_dlp_path: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp_path).await {
        missing.push(format!("{} - required for audio extraction", yt_dlp_path));
    }

    // ffmpeg does the mp3 transcoding and thumbnail embedding
    if !check_command_available("ffmpeg").await {
        missing.push("ffmpeg - required for mp3 conversion".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    let version_flag = if command.ends_with("ffmpeg") { "-version" } else { "--version" };

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_removes_official_video_tag() {
        assert_eq!(sanitize_filename("Linkin Park - Numb (Official Video)"), "Linkin Park - Numb");
        assert_eq!(sanitize_filename("Artist - Song (Official Music Video)"), "Artist - Song");
    }

    #[test]
    fn test_sanitize_removes_quality_and_descriptor_tags() {
        assert_eq!(sanitize_filename("Artist - Song [4K]"), "Artist - Song");
        assert_eq!(sanitize_filename("Artist - Song [HD]"), "Artist - Song");
        assert_eq!(sanitize_filename("Artist - Song (Lyrics)"), "Artist - Song");
        assert_eq!(sanitize_filename("Artist - Song (Remastered 2011)"), "Artist - Song");
        assert_eq!(sanitize_filename("Artist - Song [Visualiser]"), "Artist - Song");
        assert_eq!(sanitize_filename("Artist - Song (KARAOKE)"), "Artist - Song");
    }

    #[test]
    fn test_sanitize_keeps_words_containing_tags() {
        assert_eq!(sanitize_filename("Olive Tree"), "Olive Tree");
        assert_eq!(sanitize_filename("Delivery Man"), "Delivery Man");
        assert_eq!(sanitize_filename("Hdtv Nights"), "Hdtv Nights");
    }

    #[test]
    fn test_sanitize_removes_illegal_characters() {
        let result = sanitize_filename("Song: The | Best / Ever \\ \"Now\"");
        for c in ['|', '/', '\\', ':', '"'] {
            assert!(!result.contains(c), "{:?} still contains {:?}", result, c);
        }
        assert_eq!(result, "Song The Best Ever Now");
    }

    #[test]
    fn test_sanitize_removes_emoji_and_controls() {
        assert_eq!(sanitize_filename("🔥 Fire Song 🔥"), "Fire Song");
        assert_eq!(sanitize_filename("Tab\tSeparated"), "TabSeparated");
    }

    #[test]
    fn test_sanitize_collapses_whitespace_and_trims() {
        assert_eq!(sanitize_filename("Artist  -   Song"), "Artist - Song");
        assert_eq!(sanitize_filename("  - Song Title - "), "Song Title");
    }

    #[test]
    fn test_sanitize_empty_and_garbage() {
        assert_eq!(sanitize_filename(""), "");
        assert_eq!(sanitize_filename("(Official Video) [HD]"), "");
        assert_eq!(sanitize_filename(" -_() "), "");
    }

    #[test]
    fn test_sanitize_preserves_basic_punctuation() {
        assert_eq!(sanitize_filename("Rock & Roll, Baby!"), "Rock & Roll, Baby!");
        assert_eq!(sanitize_filename("Don't Stop Me Now"), "Don't Stop Me Now");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let titles = [
            "Rock & Roll, Baby!",
            "Linkin Park - Numb (Official Video)",
            "  - Song Title - ",
            "Plain Title 123",
            "🔥 Fire Song 🔥 [4K]",
        ];
        for title in titles {
            let once = sanitize_filename(title);
            assert_eq!(sanitize_filename(&once), once);
        }
    }

    #[test]
    fn test_file_stem_or_placeholder() {
        assert_eq!(file_stem_or_placeholder(""), PLACEHOLDER_STEM);
        assert_eq!(file_stem_or_placeholder("Song"), "Song");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0), "░".repeat(20));
        assert_eq!(progress_bar(1.0), "█".repeat(20));
        assert_eq!(progress_bar(0.5), format!("{}{}", "█".repeat(10), "░".repeat(10)));
        assert_eq!(progress_bar(7.0), "█".repeat(20));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("Simon & Garfunkel"), "Simon &amp; Garfunkel");
        assert_eq!(escape_html("<b>"), "&lt;b&gt;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
    }
}
