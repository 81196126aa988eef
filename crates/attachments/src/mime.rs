//! Extension and MIME helpers for uploaded files.

use std::path::Path;

/// Longest extension kept on a stored file name.
const MAX_EXTENSION_LEN: usize = 16;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Extension (with leading dot, lowercased) to use for the stored copy of
/// `original_name`. Only ASCII alphanumerics survive; anything else yields
/// an empty string so the stored name is just the id.
pub fn storage_extension(original_name: &str) -> String {
    let Some(ext) = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
    else {
        return String::new();
    };
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return String::new();
    }
    format!(".{}", ext.to_ascii_lowercase())
}

/// Guess a MIME type from a file name's extension.
pub fn guess_from_name(name: &str) -> &'static str {
    let ext = storage_extension(name);
    match ext.trim_start_matches('.') {
        "csv" => "text/csv",
        "txt" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg",
        "mp4" => "video/mp4",
        _ => OCTET_STREAM,
    }
}

/// Pick the MIME type to record: the supplied one unless it is missing or
/// the generic octet-stream, in which case guess from the name.
pub fn resolve(supplied: Option<&str>, original_name: &str) -> String {
    match supplied.map(str::trim) {
        Some(ct) if !ct.is_empty() && !ct.eq_ignore_ascii_case(OCTET_STREAM) => ct.to_string(),
        _ => guess_from_name(original_name).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("report.csv", ".csv")]
    #[case("Photo.JPG", ".jpg")]
    #[case("archive.tar.gz", ".gz")]
    #[case("noext", "")]
    #[case("../../etc/passwd", "")]
    #[case("evil.c$v", "")]
    #[case(".hidden", "")]
    fn storage_extension_cases(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(storage_extension(name), expected);
    }

    #[test]
    fn resolve_prefers_supplied_type() {
        assert_eq!(resolve(Some("text/csv"), "data.bin"), "text/csv");
        assert_eq!(resolve(Some(OCTET_STREAM), "data.csv"), "text/csv");
        assert_eq!(resolve(None, "scan.pdf"), "application/pdf");
        assert_eq!(resolve(Some("  "), "blob"), OCTET_STREAM);
    }
}
