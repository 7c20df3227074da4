//! Comma-separated tag string parsing, shared by submission, filtering and
//! tag search so every path agrees on what counts as a tag name.

/// Splits `"a, b ,,　c"` into `["a", "b", "c"]`.
///
/// Full-width ideographic spaces are normalized to ASCII spaces before
/// trimming, empty fragments are dropped, and repeats keep only their first
/// position.
pub fn split_tags_str(tags_str: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for fragment in tags_str.split(',') {
        let name = fragment.replace('\u{3000}', " ").trim().to_string();
        if name.is_empty() || names.contains(&name) {
            continue;
        }
        names.push(name);
    }
    names
}
