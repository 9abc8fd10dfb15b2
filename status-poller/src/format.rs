/// Strips TrackMania formatting codes from a name
///
/// Removes `$` followed by a three-digit hex colour, a `$l[...]`/`$h[...]`
/// link, a bare `$l`/`$h`, or any other single character except a newline.
/// A `$` at the end of the text or before a newline is kept.
pub fn strip_formatting(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '$' {
            if let Some(len) = code_len(&chars[i + 1..]) {
                i += 1 + len;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

/// Length of the code following a `$`, if there is one
fn code_len(rest: &[char]) -> Option<usize> {
    if rest.len() >= 3 && rest[..3].iter().all(char::is_ascii_hexdigit) {
        return Some(3);
    }

    match rest.first() {
        Some('l') | Some('h') => {
            if rest.get(1) == Some(&'[') {
                let link_end = rest[2..]
                    .iter()
                    .take_while(|&&c| c != '\n')
                    .position(|&c| c == ']');
                if let Some(end) = link_end {
                    return Some(2 + end + 1);
                }
            }
            Some(1)
        }
        Some('\n') | None => None,
        Some(_) => Some(1),
    }
}
