//! Strict percent-encoding for values embedded in rewritten proxy URLs.

use urlencoding::encode;

/// Percent-encode `value` as a full URI component: every byte outside the
/// unreserved set (`A-Za-z0-9-_.~`) is escaped. Mirrors JavaScript's
/// `encodeURIComponent`, which is what the manifest rewriter's `enc()`
/// targets bit-for-bit.
pub fn enc(value: &str) -> String {
    encode(value).into_owned()
}
