// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tag key/value validation.
//!
//! Keys must start with a letter and may continue with letters, digits and
//! `_ - . /`. Values may additionally contain `:` and may be empty. Both are
//! capped at 200 characters. Colons are forbidden in keys so that a
//! `key=value` serialization is never ambiguous.

use std::collections::BTreeMap;

use crate::error::MetricsError;

const MAX_TAG_LEN: usize = 200;

/// Check a tag key against the character and length rules.
///
/// Accepts exactly the strings matching `[A-Za-z][A-Za-z0-9_\-./]{0,199}`.
pub fn validate_tag_key(key: &str) -> Result<(), MetricsError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(MetricsError::validation("tag key must not be empty"));
    }
    if key.len() > MAX_TAG_LEN {
        return Err(MetricsError::validation(format!(
            "tag key `{key}` exceeds {MAX_TAG_LEN} characters"
        )));
    }
    let mut chars = key.chars();
    let first = chars.next().expect("non-empty after trim check");
    if !first.is_ascii_alphabetic() {
        return Err(MetricsError::validation(format!(
            "tag key `{key}` must start with a letter"
        )));
    }
    for c in chars {
        if !is_key_char(c) {
            return Err(MetricsError::validation(format!(
                "tag key `{key}` contains forbidden character `{c}`"
            )));
        }
    }
    Ok(())
}

/// Check a tag value against the character and length rules.
///
/// Accepts exactly the strings matching `[A-Za-z0-9_\-:./]{0,200}`; the
/// empty string is allowed.
pub fn validate_tag_value(value: &str) -> Result<(), MetricsError> {
    if value.len() > MAX_TAG_LEN {
        return Err(MetricsError::validation(format!(
            "tag value `{value}` exceeds {MAX_TAG_LEN} characters"
        )));
    }
    for c in value.chars() {
        if !is_value_char(c) {
            return Err(MetricsError::validation(format!(
                "tag value `{value}` contains forbidden character `{c}`"
            )));
        }
    }
    Ok(())
}

/// Validate a whole key/value pair.
pub fn validate_tag(key: &str, value: &str) -> Result<(), MetricsError> {
    validate_tag_key(key)?;
    validate_tag_value(value)
}

/// Validate every pair in `tags`, leaving acceptance all-or-nothing for the
/// caller.
pub(crate) fn validate_tags(tags: &BTreeMap<String, String>) -> Result<(), MetricsError> {
    for (key, value) in tags {
        validate_tag(key, value)?;
    }
    Ok(())
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')
}

fn is_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_keys() {
        for key in ["region", "a", "x9", "app_name", "host-1", "a.b/c"] {
            assert!(validate_tag_key(key).is_ok(), "rejected `{key}`");
        }
    }

    #[test]
    fn rejects_bad_keys() {
        for key in ["", "   ", "9region", "_lead", "has space", "has:colon", "käse"] {
            assert!(validate_tag_key(key).is_err(), "accepted `{key}`");
        }
        assert!(validate_tag_key(&"a".repeat(201)).is_err());
        assert!(validate_tag_key(&"a".repeat(200)).is_ok());
    }

    #[test]
    fn accepts_values_including_empty_and_colon() {
        for value in ["", "us-east-1", "10.0.0.1:8125", "a_b/c.d"] {
            assert!(validate_tag_value(value).is_ok(), "rejected `{value}`");
        }
        assert!(validate_tag_value(&"v".repeat(200)).is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        for value in ["has space", "semi;colon", "tab\tval", "naïve"] {
            assert!(validate_tag_value(value).is_err(), "accepted `{value}`");
        }
        assert!(validate_tag_value(&"v".repeat(201)).is_err());
    }
}
