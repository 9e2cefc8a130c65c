//! Property paths such as `user.addresses[0].zip` over JSON values.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn segments(path: &str) -> Option<Vec<Segment<'_>>> {
    let mut out = Vec::new();
    for part in path.split('.') {
        let (name, mut rest) = part.find('[').map_or((part, ""), |at| part.split_at(at));
        if !name.is_empty() {
            out.push(Segment::Key(name));
        }
        while !rest.is_empty() {
            let close = rest.find(']')?;
            let index = rest.get(1..close)?.trim().parse().ok()?;
            out.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Splits `path` into its root name and the remaining path (possibly empty).
///
/// `"item.name"` gives `("item", "name")`, `"list[0].name"` gives `("list", "[0].name")`.
#[must_use]
pub fn split_root(path: &str) -> (&str, &str) {
    match path.find(['.', '[']) {
        Some(at) => {
            let (root, rest) = path.split_at(at);
            (root, rest.strip_prefix('.').unwrap_or(rest))
        }
        None => (path, ""),
    }
}

/// Resolves `path` against `root`. An empty path resolves to `root` itself.
#[must_use]
pub fn get<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(root);
    }
    segments(path)?.into_iter().try_fold(root, |value, segment| match segment {
        Segment::Key(key) => value.get(key),
        Segment::Index(index) => value.get(index),
    })
}

/// Mutable counterpart of [`get`].
#[must_use]
pub fn get_mut<'v>(root: &'v mut Value, path: &str) -> Option<&'v mut Value> {
    if path.is_empty() {
        return Some(root);
    }
    get_segments_mut(root, &segments(path)?)
}

fn get_segments_mut<'v>(root: &'v mut Value, segments: &[Segment<'_>]) -> Option<&'v mut Value> {
    segments.iter().try_fold(root, |value, segment| match *segment {
        Segment::Key(key) => value.get_mut(key),
        Segment::Index(index) => value.get_mut(index),
    })
}

/// Writes `value` at `path`, replacing `root` itself for an empty path.
///
/// Intermediate steps must exist; a missing final key is inserted into its
/// parent object. Returns `false` when the path cannot be reached.
pub fn set(root: &mut Value, path: &str, value: Value) -> bool {
    if path.is_empty() {
        *root = value;
        return true;
    }
    let Some(segments) = segments(path) else {
        return false;
    };
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let Some(parent) = get_segments_mut(root, parents) else {
        return false;
    };
    match (*last, parent) {
        (Segment::Key(key), Value::Object(map)) => {
            map.insert(key.to_string(), value);
            true
        }
        (Segment::Index(index), Value::Array(items)) if index < items.len() => {
            items[index] = value;
            true
        }
        _ => false,
    }
}
