//! Mapping between mount paths (`/http/host/seg...`, `/https/host/seg...`)
//! and origin URLs, plus canonicalisation of hyperlinks found in listings.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Http,
    Https,
}

impl Namespace {
    fn prefix(self) -> &'static str {
        match self {
            Namespace::Http => "/http/",
            Namespace::Https => "/https/",
        }
    }

    fn scheme(self) -> &'static str {
        match self {
            Namespace::Http => "http://",
            Namespace::Https => "https://",
        }
    }
}

/// Splits a mount path into its namespace and the `host[/path]` remainder.
fn split(path: &str) -> Option<(Namespace, &str)> {
    [Namespace::Http, Namespace::Https]
        .into_iter()
        .find_map(|ns| path.strip_prefix(ns.prefix()).map(|rest| (ns, rest)))
        .filter(|(_, rest)| !rest.is_empty() && !rest.starts_with('/'))
}

pub fn namespace(path: &str) -> Option<Namespace> {
    split(path).map(|(ns, _)| ns)
}

/// `/`, `/http` and `/https`: directories that exist only in the mount.
pub fn is_synthetic_dir(path: &str) -> bool {
    matches!(path, "/" | "/http" | "/https" | "/http/" | "/https/")
}

/// True for `/http/host` and `/https/host`: the origin's root directory.
pub fn is_host_root(path: &str) -> bool {
    split(path).is_some_and(|(_, rest)| !rest.contains('/'))
}

/// URL of the resource a mount path names.
///
/// A host root gets a trailing slash since it can only be a directory.
pub fn to_url(path: &str) -> Option<String> {
    let (ns, rest) = split(path)?;
    if rest.contains('/') {
        Some(format!("{}{}", ns.scheme(), rest))
    } else {
        Some(format!("{}{}/", ns.scheme(), rest))
    }
}

/// URL of a mount path treated as a directory (always slash-terminated).
pub fn to_dir_url(path: &str) -> Option<String> {
    let (ns, rest) = split(path)?;
    Some(format!("{}{}/", ns.scheme(), rest.trim_end_matches('/')))
}

/// Inverse of [`to_url`].
pub fn from_url(url: &str) -> Option<String> {
    [Namespace::Http, Namespace::Https].into_iter().find_map(|ns| {
        url.strip_prefix(ns.scheme())
            .filter(|rest| !rest.is_empty())
            .map(|rest| format!("{}{}", ns.prefix(), rest))
    })
}

/// `dir` + `/` + `name`, without doubling a slash `dir` already ends with.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Resolves a hyperlink found in the listing at `source` to a child name.
///
/// Returns `None` for links to other sites, self-links, links that descend
/// more than one level or climb out of the directory, and empty names.
/// Directory children keep their trailing slash; any `#fragment` is dropped.
pub fn canonicalise(link: &str, source: &str) -> Option<String> {
    let rest = if link.starts_with("http://") || link.starts_with("https://") {
        link.strip_prefix(source)?
    } else if link.starts_with('/') {
        link.strip_prefix(source_path(source)?)?
    } else {
        link
    };

    let name = match rest.find('#') {
        Some(hash) => &rest[..hash],
        None => rest,
    };

    if let Some(slash) = name.find('/') {
        if slash + 1 != name.len() {
            return None; // no subdirs
        }
    }

    let bare = name.trim_end_matches('/');
    if bare.is_empty() || bare == "." || bare == ".." || name.starts_with('?') {
        return None;
    }

    Some(name.to_string())
}

/// The path part of an absolute URL, starting at the first `/` after the host.
fn source_path(source: &str) -> Option<&str> {
    let after_scheme = source.find("://")? + 3;
    let start = source[after_scheme..].find('/')? + after_scheme;
    Some(&source[start..])
}
