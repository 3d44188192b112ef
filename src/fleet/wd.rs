//! Find a configured repository by name.

use std::path::{Component, Path, PathBuf};

/// How well `path` matches `names`.
///
/// Each name found anywhere in the path scores 1. Each path component equal
/// to a name scores the name's length plus one, so exact directory names
/// outweigh incidental substrings and longer names outweigh shorter ones.
pub fn match_score(path: &Path, names: &[String]) -> usize {
    let text = path.to_string_lossy();
    let mut score = names
        .iter()
        .filter(|name| text.contains(name.as_str()))
        .count();

    for component in path.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        for name in names {
            if part == name.as_str() {
                score += name.len() + 1;
            }
        }
    }
    score
}

/// The configured path that best matches `names`.
///
/// Ties go to the path configured first. With no names, that is simply the
/// first path; otherwise a path must match at least one name.
pub fn best_match<'a>(paths: &'a [PathBuf], names: &[String]) -> Option<&'a PathBuf> {
    if names.is_empty() {
        return paths.first();
    }

    let mut best: Option<(&PathBuf, usize)> = None;
    for path in paths {
        let score = match_score(path, names);
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((path, score));
        }
    }
    best.map(|(path, _)| path)
}
