//! Allow-list of location prefixes deciding whether the engine runs at all.

use url::Url;

/// A location reduced to the parts that decide membership.
#[derive(Clone, Debug, PartialEq, Eq)]
struct NormalizedLocation {
    /// `None` for prefixes written without a scheme, which match any scheme.
    scheme: Option<String>,
    host: String,
    /// Path without trailing slashes; the site root is the empty string.
    path: String,
}

impl NormalizedLocation {
    fn parse(input: &str) -> Result<Self, url::ParseError> {
        let input = input.trim();
        let (url, scheme) = if input.contains("://") {
            let url = Url::parse(input)?;
            let scheme = url.scheme().to_string();
            (url, Some(scheme))
        } else {
            (Url::parse(&format!("http://{input}"))?, None)
        };

        Ok(Self {
            scheme,
            host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            path: url.path().trim_end_matches('/').to_string(),
        })
    }

    /// Returns `true` if `self`, as a prefix, covers `location`.
    fn covers(&self, location: &NormalizedLocation) -> bool {
        if self.scheme.as_ref().is_some_and(|s| Some(s) != location.scheme.as_ref()) {
            return false;
        }
        if self.host != location.host {
            return false;
        }
        match location.path.strip_prefix(&self.path) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// The set of location prefixes the engine may run on.
///
/// A location is allowed if it equals a prefix or lies beneath one at a path
/// separator: `example.com/a` allows `example.com/a/b` but not
/// `example.com/ab`. An empty scope allows nothing.
///
/// # Example
///
/// ```
/// use live_masker::PageScope;
///
/// let scope = PageScope::new(["https://example.com/account/"]);
/// assert!(scope.allows("https://example.com/account/settings?tab=1"));
/// assert!(!scope.allows("https://example.com/accounts"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct PageScope {
    prefixes: Vec<NormalizedLocation>,
}

impl PageScope {
    /// Normalize `prefixes`. Entries that cannot be parsed are skipped.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .filter_map(|prefix| {
                let prefix = prefix.as_ref();
                match NormalizedLocation::parse(prefix) {
                    Ok(normalized) => Some(normalized),
                    Err(e) => {
                        tracing::warn!("Ignoring page prefix {prefix:?}: {e}");
                        None
                    }
                }
            })
            .collect();
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Returns `true` if `location` falls under one of the prefixes.
    pub fn allows(&self, location: &str) -> bool {
        let Ok(location) = NormalizedLocation::parse(location) else {
            return false;
        };
        self.prefixes.iter().any(|prefix| prefix.covers(&location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_descendant_paths_match() {
        let scope = PageScope::new(["https://example.com/a"]);
        assert!(scope.allows("https://example.com/a"));
        assert!(scope.allows("https://example.com/a/"));
        assert!(scope.allows("https://example.com/a/b"));
        assert!(!scope.allows("https://example.com/ab"));
        assert!(!scope.allows("https://example.com/"));
    }

    #[test]
    fn query_fragment_and_port_are_ignored() {
        let scope = PageScope::new(["https://Example.com:8443/inbox/"]);
        assert!(scope.allows("https://example.com/inbox?page=2#top"));
    }

    #[test]
    fn scheme_must_match_when_given() {
        let scope = PageScope::new(["https://example.com/"]);
        assert!(!scope.allows("http://example.com/"));
    }

    #[test]
    fn scheme_less_prefix_matches_any_scheme() {
        let scope = PageScope::new(["example.com/a"]);
        assert!(scope.allows("https://example.com/a/b"));
        assert!(scope.allows("http://example.com/a"));
        assert!(!scope.allows("https://other.com/a"));
    }

    #[test]
    fn site_root_covers_every_path() {
        let scope = PageScope::new(["https://example.com"]);
        assert!(scope.allows("https://example.com/deep/page"));
    }

    #[test]
    fn empty_scope_denies_everything() {
        let scope = PageScope::new(Vec::<String>::new());
        assert!(scope.is_empty());
        assert!(!scope.allows("https://example.com/"));
    }

    #[test]
    fn unparsable_entries_are_skipped() {
        let scope = PageScope::new(["http://[bad", "https://example.com/"]);
        assert!(!scope.is_empty());
        assert!(scope.allows("https://example.com/x"));
        assert!(!scope.allows("not a url"));
    }
}
