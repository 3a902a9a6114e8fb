//! Key and Tag Codec
//!
//! Validates and normalizes cache keys and tags before they reach any tier.

use std::fmt;

use crate::config::KeysConfig;
use crate::error::{CacheError, Result};

// == Public Constants ==
/// Default maximum length of a fully-qualified key
pub const DEFAULT_MAX_KEY_LENGTH: usize = 512;

/// Default maximum length of a tag
pub const DEFAULT_MAX_TAG_LENGTH: usize = 128;

/// Default maximum number of tags attached to one entry
pub const DEFAULT_MAX_TAGS: usize = 10;

// == Key Options ==
/// Parameters applied when building a [`CacheKey`].
#[derive(Debug, Clone)]
pub struct KeyOptions {
    pub prefix: String,
    pub version: Option<String>,
    pub separator: String,
    pub max_length: usize,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            version: None,
            separator: ":".to_string(),
            max_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }
}

impl From<&KeysConfig> for KeyOptions {
    fn from(config: &KeysConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            version: config.version.clone(),
            separator: config.separator.clone(),
            max_length: config.max_length,
        }
    }
}

// == Cache Key ==
/// Immutable, validated cache key.
///
/// `Display` yields the fully-qualified storage key:
/// `prefix`, `version` and the raw key joined by the separator, empty parts skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    raw: String,
    qualified: String,
}

impl CacheKey {
    /// Validates `raw` and builds the fully-qualified key.
    ///
    /// # Arguments
    /// * `raw` - Caller-supplied key, checked for length and charset
    /// * `options` - Prefix, version, separator and length limit
    pub fn create(raw: &str, options: &KeyOptions) -> Result<Self> {
        let normalized = raw.trim();
        check_charset(normalized).map_err(|reason| CacheError::InvalidKey {
            key: raw.to_string(),
            reason,
        })?;

        let mut qualified = String::with_capacity(
            options.prefix.len() + normalized.len() + 2 * options.separator.len() + 8,
        );
        for part in [
            options.prefix.as_str(),
            options.version.as_deref().unwrap_or(""),
            normalized,
        ] {
            if part.is_empty() {
                continue;
            }
            if !qualified.is_empty() {
                qualified.push_str(&options.separator);
            }
            qualified.push_str(part);
        }

        if qualified.len() > options.max_length {
            return Err(CacheError::InvalidKey {
                key: raw.to_string(),
                reason: format!(
                    "qualified key is {} bytes, maximum is {}",
                    qualified.len(),
                    options.max_length
                ),
            });
        }

        Ok(Self {
            raw: normalized.to_string(),
            qualified,
        })
    }

    /// Builds a key with extra partition dimensions appended to the raw part.
    pub fn with_vary(raw: &str, vary_by: &[String], options: &KeyOptions) -> Result<Self> {
        if vary_by.is_empty() {
            return Self::create(raw, options);
        }
        let mut combined = raw.trim().to_string();
        for value in vary_by {
            combined.push_str(&options.separator);
            combined.push_str(value.trim());
        }
        Self::create(&combined, options)
    }

    /// The normalized key as given by the caller.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The fully-qualified storage key.
    pub fn as_str(&self) -> &str {
        &self.qualified
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified)
    }
}

// == Tag ==
/// Immutable, lowercase-normalized tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    pub fn create(raw: &str, max_length: usize) -> Result<Self> {
        let normalized = raw.trim().to_lowercase();
        check_charset(&normalized).map_err(|reason| CacheError::InvalidTag {
            tag: raw.to_string(),
            reason,
        })?;
        if normalized.len() > max_length {
            return Err(CacheError::InvalidTag {
                tag: raw.to_string(),
                reason: format!(
                    "tag is {} bytes, maximum is {}",
                    normalized.len(),
                    max_length
                ),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// == Tag Set ==
/// Deduplicated tags in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(Vec<Tag>);

impl TagSet {
    /// Validates every tag and drops duplicates.
    ///
    /// The count limit applies to the input as given, before deduplication.
    pub fn create<S: AsRef<str>>(values: &[S], max_tags: usize, max_length: usize) -> Result<Self> {
        if values.len() > max_tags {
            return Err(CacheError::TooManyTags {
                count: values.len(),
                max: max_tags,
            });
        }

        let mut tags: Vec<Tag> = Vec::with_capacity(values.len());
        for value in values {
            let tag = Tag::create(value.as_ref(), max_length)?;
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        Ok(Self(tags))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t.as_str() == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }
}

// == Validation ==
fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')
}

fn check_charset(value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Err("must not be empty".to_string());
    }
    if value.chars().any(char::is_whitespace) {
        return Err("must not contain whitespace".to_string());
    }
    if let Some(bad) = value.chars().find(|c| !is_allowed_char(*c)) {
        return Err(format!("character '{}' is not allowed", bad));
    }
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn versioned() -> KeyOptions {
        KeyOptions {
            prefix: "app".to_string(),
            version: Some("v2".to_string()),
            ..KeyOptions::default()
        }
    }

    #[test]
    fn test_key_plain() {
        let key = CacheKey::create("user:42", &KeyOptions::default()).unwrap();
        assert_eq!(key.as_str(), "user:42");
        assert_eq!(key.raw(), "user:42");
    }

    #[test]
    fn test_key_qualified_with_prefix_and_version() {
        let key = CacheKey::create("  user:42 ", &versioned()).unwrap();
        assert_eq!(key.to_string(), "app:v2:user:42");
        assert_eq!(key.raw(), "user:42");
    }

    #[test]
    fn test_key_rejects_empty() {
        let result = CacheKey::create("   ", &KeyOptions::default());
        assert!(matches!(result, Err(CacheError::InvalidKey { .. })));
    }

    #[test]
    fn test_key_rejects_inner_whitespace() {
        let result = CacheKey::create("user 42", &KeyOptions::default());
        assert!(matches!(result, Err(CacheError::InvalidKey { .. })));
    }

    #[test]
    fn test_key_rejects_bad_charset() {
        for raw in ["user/42", "user*", "caf\u{e9}", "a{b}"] {
            let result = CacheKey::create(raw, &KeyOptions::default());
            assert!(
                matches!(result, Err(CacheError::InvalidKey { .. })),
                "{} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_key_length_counts_qualified_form() {
        let options = KeyOptions {
            prefix: "prefix".to_string(),
            max_length: 12,
            ..KeyOptions::default()
        };
        // "prefix:abcde" is exactly 12 bytes
        assert!(CacheKey::create("abcde", &options).is_ok());
        assert!(CacheKey::create("abcdef", &options).is_err());
    }

    #[test]
    fn test_key_with_vary() {
        let vary = vec!["en-US".to_string(), "tenant-7".to_string()];
        let key = CacheKey::with_vary("page:home", &vary, &KeyOptions::default()).unwrap();
        assert_eq!(key.as_str(), "page:home:en-US:tenant-7");

        let bad = vec!["en US".to_string()];
        assert!(CacheKey::with_vary("page:home", &bad, &KeyOptions::default()).is_err());
    }

    #[test]
    fn test_key_normalization_idempotent() {
        let options = KeyOptions::default();
        let first = CacheKey::create(" product.99 ", &options).unwrap();
        let second = CacheKey::create(first.raw(), &options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tag_lowercases() {
        let tag = Tag::create("Users", DEFAULT_MAX_TAG_LENGTH).unwrap();
        assert_eq!(tag.as_str(), "users");
    }

    #[test]
    fn test_tag_length_limit() {
        assert!(Tag::create(&"t".repeat(8), 8).is_ok());
        assert!(matches!(
            Tag::create(&"t".repeat(9), 8),
            Err(CacheError::InvalidTag { .. })
        ));
    }

    #[test]
    fn test_tag_set_dedup_case_insensitive() {
        let set = TagSet::create(&["A", "a", "A"], DEFAULT_MAX_TAGS, DEFAULT_MAX_TAG_LENGTH).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("a"));
    }

    #[test]
    fn test_tag_set_preserves_first_seen_order() {
        let set = TagSet::create(&["b", "A", "B", "c"], DEFAULT_MAX_TAGS, DEFAULT_MAX_TAG_LENGTH)
            .unwrap();
        let order: Vec<&str> = set.iter().map(Tag::as_str).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_tag_set_count_checked_before_contents() {
        // Eleven copies of an invalid tag still report the count first
        let values = vec!["bad tag"; 11];
        let result = TagSet::create(&values, 10, DEFAULT_MAX_TAG_LENGTH);
        assert!(matches!(
            result,
            Err(CacheError::TooManyTags { count: 11, max: 10 })
        ));
    }

    #[test]
    fn test_tag_set_invalid_member() {
        let result = TagSet::create(&["ok", "not ok"], DEFAULT_MAX_TAGS, DEFAULT_MAX_TAG_LENGTH);
        assert!(matches!(result, Err(CacheError::InvalidTag { .. })));
    }
}
