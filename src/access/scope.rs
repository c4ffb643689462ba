/// Tests a required scope string against a principal's granted scopes.
///
/// A granted scope covers every required scope it is a segment-wise prefix
/// of, with `*` matching any single segment. When `accept_prefix_match` is
/// set, a required scope that is itself a prefix of a granted one also
/// passes, which is how a document is reachable when only some of its
/// children are in scope. `None` means the principal is unscoped.
pub fn in_auth_scope(granted: Option<&[String]>, required: &str, accept_prefix_match: bool) -> bool {
    let Some(granted) = granted else {
        return true;
    };
    let required: Vec<&str> = required.split('.').filter(|s| !s.is_empty()).collect();
    granted
        .iter()
        .any(|scope| scope_matches(&compile(scope), &required, accept_prefix_match))
}

fn compile(scope: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = scope
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    while parts.len() > 2 && parts.last() == Some(&"*") {
        parts.pop();
    }
    parts
}

fn scope_matches(granted: &[&str], required: &[&str], accept_prefix_match: bool) -> bool {
    for (idx, part) in granted.iter().enumerate() {
        let Some(required_part) = required.get(idx) else {
            return accept_prefix_match;
        };
        if *part != "*" && part != required_part {
            return false;
        }
    }
    true
}

/// Builds the scope string checked before touching a node.
pub fn node_scope(action: &str, fqpparts: &[String; 2], subject_id: Option<&str>) -> String {
    let subject = subject_id.unwrap_or("*");
    if fqpparts[1].is_empty() {
        format!("object.{action}.{}.{subject}", fqpparts[0])
    } else {
        format!("object.{action}.{}.{subject}.{}", fqpparts[0], fqpparts[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn unscoped_principals_pass() {
        assert!(in_auth_scope(None, "object.read.c_widget.1.c_name", false));
    }

    #[test]
    fn wildcards_and_prefixes() {
        let granted = scopes(&["object.read.c_widget.*.c_name"]);
        assert!(in_auth_scope(
            Some(&granted),
            "object.read.c_widget.abc.c_name",
            false
        ));
        assert!(in_auth_scope(
            Some(&granted),
            "object.read.c_widget.abc.c_name.first",
            false
        ));
        assert!(!in_auth_scope(
            Some(&granted),
            "object.read.c_widget.abc.c_other",
            false
        ));
        assert!(!in_auth_scope(Some(&granted), "object.read.c_widget.abc", false));
        assert!(in_auth_scope(Some(&granted), "object.read.c_widget.abc", true));
    }

    #[test]
    fn trailing_wildcards_are_trimmed() {
        let granted = scopes(&["object.*.*"]);
        assert!(in_auth_scope(
            Some(&granted),
            "object.update.c_widget.abc.c_name",
            false
        ));
    }

    #[test]
    fn node_scope_strings() {
        let parts = ["c_widget".to_string(), "c_doc.c_name".to_string()];
        assert_eq!(
            node_scope("read", &parts, Some("s1")),
            "object.read.c_widget.s1.c_doc.c_name"
        );
    }
}
