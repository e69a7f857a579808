//! Object key generation
//!
//! Keys have the shape `[folder][stem_]<millis>_<random>[.ext]`. The random
//! suffix keeps keys distinct across concurrent uploads without coordination.

use crate::upload::Payload;
use chrono::Utc;
use rand::Rng;

const SUFFIX_LEN: usize = 8;
const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Preferred extensions for common upload types
const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("application/pdf", ".pdf"),
    ("text/plain", ".txt"),
    ("application/json", ".json"),
    ("video/mp4", ".mp4"),
    ("audio/mpeg", ".mp3"),
];

/// Generate a unique object key for `payload`
pub fn generate_key(payload: &Payload, stem: Option<&str>, folder: Option<&str>) -> String {
    let file_name = generate_file_name(payload, stem);
    match folder.filter(|folder| !folder.is_empty()) {
        Some(folder) => format!("{}{}", folder, file_name),
        None => file_name,
    }
}

fn generate_file_name(payload: &Payload, stem: Option<&str>) -> String {
    let timestamp = Utc::now().timestamp_millis();
    let suffix = random_suffix();
    let extension = file_extension(payload);

    match stem.filter(|stem| !stem.is_empty()) {
        Some(stem) => format!("{}_{}_{}{}", stem, timestamp, suffix, extension),
        None => format!("{}_{}{}", timestamp, suffix, extension),
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// Extension for `payload`, including the leading dot, or an empty string.
///
/// The file name wins over the declared MIME type.
pub fn file_extension(payload: &Payload) -> String {
    if let Some(name) = payload.file_name() {
        if let Some(dot) = name.rfind('.') {
            return name[dot..].to_string();
        }
    }

    payload
        .content_type()
        .map(extension_for_mime)
        .unwrap_or_default()
}

/// Extension registered for a MIME type, or an empty string
pub fn extension_for_mime(mime: &str) -> String {
    let mime = mime.trim().to_ascii_lowercase();

    if let Some((_, ext)) = MIME_EXTENSIONS.iter().find(|(known, _)| *known == mime) {
        return ext.to_string();
    }

    // octet-stream maps to dozens of unrelated extensions
    if mime.is_empty() || mime == "application/octet-stream" {
        return String::new();
    }

    mime_guess::get_mime_extensions_str(&mime)
        .and_then(|extensions| extensions.first())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}
