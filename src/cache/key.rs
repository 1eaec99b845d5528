//! Request normalization and query matching shared by all backends.
//!
//! A stored entry is identified by its [`CacheKey`]: upper-cased method, URL
//! without fragment, and the request's values for every header named in the
//! stored response's `Vary` header. `put` replaces the entry with an equal key.

use serde::{Deserialize, Serialize};

use crate::http::{Request, Response};

/// Options accepted by match/delete/keys queries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchOptions {
    /// Compare URLs without their query string.
    pub ignore_search: bool,
    /// Match non-GET query requests as if they were GET.
    pub ignore_method: bool,
    /// Skip the `Vary` header comparison.
    pub ignore_vary: bool,
    /// Restrict a storage-wide match to one cache.
    pub cache_name: Option<String>,
}

impl MatchOptions {
    /// Options with `ignore_search` set.
    pub fn ignoring_search() -> Self {
        Self {
            ignore_search: true,
            ..Self::default()
        }
    }
}

/// One stored request/response pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The request the response was stored for.
    pub request: Request,
    /// The stored response.
    pub response: Response,
}

/// Normalized identity of a stored entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: String,
    url: String,
    vary: Vec<(String, Option<String>)>,
}

impl CacheKey {
    /// Key of `request` as stored alongside `response`.
    pub fn new(request: &Request, response: &Response) -> Self {
        let vary = response
            .headers
            .vary()
            .into_iter()
            .map(|name| {
                let value = request.headers.get(&name).map(str::to_string);
                (name, value)
            })
            .collect();
        Self {
            method: request.method.to_ascii_uppercase(),
            url: request.url_without_fragment().to_string(),
            vary,
        }
    }
}

/// True if `entry` answers `query` under `opts`.
pub(crate) fn matches(entry: &CacheEntry, query: &Request, opts: &MatchOptions) -> bool {
    if !opts.ignore_method && !query.method.eq_ignore_ascii_case("GET") {
        return false;
    }

    let (stored, wanted) = if opts.ignore_search {
        (
            entry.request.url_without_search(),
            query.url_without_search(),
        )
    } else {
        (
            entry.request.url_without_fragment(),
            query.url_without_fragment(),
        )
    };
    if stored != wanted {
        return false;
    }

    if opts.ignore_vary {
        return true;
    }
    entry.response.headers.vary().iter().all(|name| {
        name != "*" && entry.request.headers.get(name) == query.headers.get(name)
    })
}

/// Entries answering `query`, or all of them when `query` is `None`.
pub(crate) fn select<'a>(
    entries: &'a [CacheEntry],
    query: Option<&'a Request>,
    opts: &'a MatchOptions,
) -> impl Iterator<Item = &'a CacheEntry> + 'a {
    entries
        .iter()
        .filter(move |e| query.is_none_or(|q| matches(e, q, opts)))
}

/// Inserts `entry`, replacing any entry with the same [`CacheKey`].
pub(crate) fn upsert(entries: &mut Vec<CacheEntry>, entry: CacheEntry) {
    let key = CacheKey::new(&entry.request, &entry.response);
    entries.retain(|e| CacheKey::new(&e.request, &e.response) != key);
    entries.push(entry);
}

/// Removes entries answering `query`; returns whether any was removed.
pub(crate) fn remove(entries: &mut Vec<CacheEntry>, query: &Request, opts: &MatchOptions) -> bool {
    let before = entries.len();
    entries.retain(|e| !matches(e, query, opts));
    entries.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, vary: Option<&str>, accept: Option<&str>) -> CacheEntry {
        let mut request = Request::get(url);
        if let Some(a) = accept {
            request = request.with_header("Accept", a);
        }
        let mut response = Response::ok("x");
        if let Some(v) = vary {
            response = response.with_header("Vary", v);
        }
        CacheEntry { request, response }
    }

    #[test]
    fn fragment_is_ignored_and_search_is_optional() {
        let e = entry("https://app.test/a?v=1#top", None, None);
        assert!(matches(&e, &Request::get("https://app.test/a?v=1"), &MatchOptions::default()));
        assert!(!matches(&e, &Request::get("https://app.test/a"), &MatchOptions::default()));
        assert!(matches(&e, &Request::get("https://app.test/a"), &MatchOptions::ignoring_search()));
    }

    #[test]
    fn non_get_queries_need_ignore_method() {
        let e = entry("https://app.test/a", None, None);
        let post = Request::new("post", "https://app.test/a");
        assert!(!matches(&e, &post, &MatchOptions::default()));
        let opts = MatchOptions {
            ignore_method: true,
            ..MatchOptions::default()
        };
        assert!(matches(&e, &post, &opts));
    }

    #[test]
    fn vary_headers_take_part_in_matching_and_keys() {
        let json = entry("https://app.test/a", Some("Accept"), Some("application/json"));
        let html = entry("https://app.test/a", Some("Accept"), Some("text/html"));
        let q = Request::get("https://app.test/a").with_header("accept", "text/html");

        assert!(!matches(&json, &q, &MatchOptions::default()));
        assert!(matches(&html, &q, &MatchOptions::default()));
        let opts = MatchOptions {
            ignore_vary: true,
            ..MatchOptions::default()
        };
        assert!(matches(&json, &q, &opts));

        let mut entries = vec![json.clone()];
        upsert(&mut entries, html);
        assert_eq!(entries.len(), 2);
        upsert(&mut entries, json);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn vary_star_never_matches() {
        let e = entry("https://app.test/a", Some("*"), None);
        assert!(!matches(&e, &Request::get("https://app.test/a"), &MatchOptions::default()));
    }
}
