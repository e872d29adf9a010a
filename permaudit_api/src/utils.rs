use chrono::{DateTime, Local};

/// Join a router mount prefix and a route path.
///
/// - Repeated `/` are collapsed.
/// - Trailing `/` is removed, except for root.
#[must_use]
pub fn join_route(prefix: &str, path: &str) -> String {
    let mut ret = String::from("/");
    for i in prefix.split('/').chain(path.split('/')) {
        if i.is_empty() {
            continue;
        }
        if !ret.ends_with('/') {
            ret.push('/');
        }
        ret.push_str(i);
    }
    ret
}

/// Report file name, e.g. `diff-20250101-120000.md`.
#[must_use]
pub fn report_file_name(kind: &str, ext: &str, now: DateTime<Local>) -> String {
    format!("{kind}-{}.{ext}", now.format("%Y%m%d-%H%M%S"))
}

/// Shorten `s` to `n` chars for logging secrets and long bodies.
#[must_use]
pub fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_owned()
    } else {
        let mut ret: String = s.chars().take(n).collect();
        ret.push_str("...");
        ret
    }
}

/// Escape `|` and newlines for markdown table cells.
#[must_use]
pub fn md_escape(s: &str) -> String {
    s.replace('|', "\\|").replace(['\r', '\n'], " ")
}
