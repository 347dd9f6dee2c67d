/// Derive a directory name from a venue's display name.
///
/// Lower-cases, turns spaces into underscores and drops apostrophes.
/// Example: `"Rozco's Comedy"` → `"rozcos_comedy"`
pub fn venue_dir_name(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\'' | '’'))
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect();
    if slug.is_empty() || slug.chars().all(|c| c == '.' || c == '_') {
        "venue".to_string()
    } else {
        slug
    }
}
