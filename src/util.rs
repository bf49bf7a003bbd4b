//! URL joining and the stable hash used to spread a key across backends.

const URL_SEPARATOR: char = '/';

/// Join non-empty path parts with exactly one `/` between them.
///
/// A single argument is returned unchanged; an empty argument list yields
/// the empty string. Overlapping separators (`"a/"` + `"/b"`) collapse to one.
pub fn url_join(parts: &[&str]) -> String {
    let elems: Vec<&str> = parts.iter().copied().filter(|p| !p.is_empty()).collect();

    match elems.len() {
        0 => return String::new(),
        1 => return elems[0].to_string(),
        _ => {}
    }

    let mut out = String::from(elems[0]);
    for i in 1..elems.len() {
        let prev_ends_sep = elems[i - 1].ends_with(URL_SEPARATOR);
        let next_starts_sep = elems[i].starts_with(URL_SEPARATOR);

        if prev_ends_sep && next_starts_sep {
            out.push_str(&elems[i][1..]);
        } else if prev_ends_sep || next_starts_sep {
            out.push_str(elems[i]);
        } else {
            out.push(URL_SEPARATOR);
            out.push_str(elems[i]);
        }
    }

    out
}

/// Prepend `http://` when `url` carries no scheme. Backends are stored in
/// the pool in whatever raw form the operator configured; this is applied
/// at the point of URL composition (dispatch and probing), not at ingest.
pub fn with_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// 32-bit-wrapping `Σ s[i]·31^(n-1-i)` over raw bytes. Not security-sensitive;
/// used only to deterministically spread a routing key across k backends.
pub fn hash_code(s: &str) -> i32 {
    let mut hash: i32 = 0;
    for &b in s.as_bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(b as i32);
    }
    hash
}
