//! Submission normalization and content fingerprinting (C1, fingerprint
//! half).

use sha2::{Digest, Sha256};

/// A code-fence-aware, whitespace-collapsing normalization of the raw
/// thought text, applied before fingerprinting, caching, and stagnation
/// comparison.
///
/// - Collapses runs of Unicode whitespace to a single space.
/// - Lowercases language tags on fenced code blocks (```JS -> ```js).
/// - Strips any inline audit-config fenced block entirely, since its
///   presence must not perturb the fingerprint of otherwise-identical
///   submissions.
pub fn normalize_submission(raw: &str) -> String {
    let without_config_block = strip_audit_config_block(raw);
    let lang_tag_lowered = lowercase_fence_lang_tags(&without_config_block);
    collapse_whitespace(&lang_tag_lowered)
}

fn strip_audit_config_block(text: &str) -> String {
    // Audit-config blocks are fenced as ```audit-config ... ```. Drop the
    // whole fence (tag, body, and closing fence) wherever it appears.
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find("```audit-config") {
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start..];
                if let Some(close_rel) = after_open[3..].find("```") {
                    let close_abs = close_rel + 3 + 3;
                    rest = &after_open[close_abs..];
                } else {
                    // Unterminated block: drop the remainder.
                    rest = "";
                    break;
                }
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

fn lowercase_fence_lang_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if text[i..].starts_with("```") {
            out.push_str("```");
            i += 3;
            let tag_start = i;
            while i < bytes.len() && !matches!(bytes[i], b'\n' | b'\r') {
                i += 1;
            }
            out.push_str(&text[tag_start..i].to_ascii_lowercase());
        } else {
            let ch = text[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

/// A 256-bit content hash of a normalized submission, hex-encoded.
pub fn fingerprint(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
