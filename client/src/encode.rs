//! Filesystem-safe encoding of mount paths, shared by both cache tiers.
//!
//! `A-Z a-z 0-9 . = - _ @ /` pass through, a space becomes `+`, every other
//! byte becomes `%XX` (uppercase hex). Slashes survive, so an encoded path
//! mirrors the remote directory structure under a cache root.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

static CACHE_KEY_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'=')
    .remove(b'-')
    .remove(b'_')
    .remove(b'@')
    .remove(b'/');

/// `%` itself is always escaped, so every `%20` in the output was a space.
pub fn encode(path: &str) -> String {
    utf8_percent_encode(path, &CACHE_KEY_SET)
        .to_string()
        .replace("%20", "+")
}
