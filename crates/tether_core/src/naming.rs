//! Name translation between host and script conventions
//!
//! Host members are PascalCase (`FooQux`, `HTTPServer`); script members are
//! camelCase (`fooQux`, `httpServer`). A host member is visible to script
//! only when it starts with an uppercase letter.

/// `FooQux` -> `fooQux`, `FOOQux` -> `fooQux`, `FOO` -> `foo`.
///
/// The leading uppercase run is lowercased. When the run is followed by more
/// characters, its last letter starts the next word and keeps its case.
pub fn to_script(name: &str) -> String {
    let mut upper = String::new();
    let mut keep = String::new();
    for c in name.chars() {
        if c.is_ascii_uppercase() && keep.is_empty() {
            upper.push(c);
        } else {
            keep.push(c);
        }
    }

    if upper.len() > 1 && upper.len() != name.len() {
        // upper is ASCII only
        let boundary = upper.split_off(upper.len() - 1);
        keep.insert_str(0, &boundary);
    }

    upper.make_ascii_lowercase();
    upper + &keep
}

/// Host names a script key may refer to, most likely first.
///
/// `fooQux` -> `[FooQux, FOOQux]`, `x` -> `[X, X]`. There are always two
/// candidates, even when they coincide. Keys that already start with an
/// uppercase letter do not refer to any host member.
pub fn to_host(name: &str) -> Vec<String> {
    let Some(first) = name.chars().next() else {
        return Vec::new();
    };
    if first.is_ascii_uppercase() {
        return Vec::new();
    }

    let mut title = String::with_capacity(name.len());
    title.push(first.to_ascii_uppercase());
    title.push_str(&name[first.len_utf8()..]);

    let mut lower = String::new();
    let mut keep = String::new();
    for c in name.chars() {
        if c.is_ascii_lowercase() && keep.is_empty() {
            lower.push(c);
        } else {
            keep.push(c);
        }
    }
    lower.make_ascii_uppercase();
    let acronym = lower + &keep;

    vec![title, acronym]
}

/// Whether a host member is visible to script.
pub fn is_exported(name: &str) -> bool {
    to_script(name) != name
}

/// Name carried by a serialization tag: `-` yields an empty name, otherwise
/// everything before the first comma.
pub fn parse_json_tag(tag: &str) -> &str {
    if tag == "-" {
        return "";
    }
    match tag.split_once(',') {
        Some((name, _)) => name,
        None => tag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_script() {
        assert_eq!(to_script("FooQux"), "fooQux");
        assert_eq!(to_script("FOOQux"), "fooQux");
        assert_eq!(to_script("Foo"), "foo");
        assert_eq!(to_script("FOO"), "foo");
        assert_eq!(to_script("foo"), "foo");
        assert_eq!(to_script(""), "");
    }

    #[test]
    fn test_to_host() {
        assert_eq!(to_host("fooQux"), vec!["FooQux", "FOOQux"]);
        assert_eq!(to_host("foo"), vec!["Foo", "FOO"]);
        assert_eq!(to_host("x"), vec!["X", "X"]);
        assert_eq!(to_host("id"), vec!["Id", "ID"]);
        assert!(to_host("FooQux").is_empty());
        assert!(to_host("").is_empty());
    }

    #[test]
    fn test_translations_agree_on_exported_names() {
        for name in ["FooQux", "Multiply", "HTTPServer", "ID"] {
            let script = to_script(name);
            assert!(
                to_host(&script).iter().any(|candidate| candidate == name),
                "{name} -> {script} does not translate back"
            );
        }
    }

    #[test]
    fn test_is_exported() {
        assert!(is_exported("Foo"));
        assert!(is_exported("FOO"));
        assert!(!is_exported("foo"));
        assert!(!is_exported("_foo"));
    }

    #[test]
    fn test_parse_json_tag() {
        assert_eq!(parse_json_tag("-"), "");
        assert_eq!(parse_json_tag("foo,omitempty"), "foo");
        assert_eq!(parse_json_tag("foo"), "foo");
        assert_eq!(parse_json_tag(""), "");
    }
}
