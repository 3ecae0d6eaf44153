/// Canonical phrase form: lowercase, punctuation stripped, whitespace collapsed.
///
/// Output holds only lowercase alphanumerics separated by single spaces, so
/// `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(phrase: &str) -> String {
    let mut out = String::with_capacity(phrase.len());
    let mut pending_space = false;
    for c in phrase.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        for lc in c.to_lowercase() {
            if lc.is_alphanumeric() {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(lc);
            }
        }
    }
    out
}
