//! Object-name validation.

use crate::EngineError;

/// Checks that an object name is usable both as a store URL path and as a
/// relative path beneath the batch's base or target directory.
///
/// A name is a non-empty sequence of slash-separated segments. Empty
/// segments (leading, trailing or doubled slashes), `.` and `..` segments,
/// backslashes and NUL bytes are rejected, so a validated name can never
/// resolve outside the directory it is joined to.
pub fn validate_object_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidState("empty object name".into()));
    }
    if name.contains('\0') || name.contains('\\') {
        return Err(EngineError::InvalidState(format!(
            "forbidden character in object name: {name:?}"
        )));
    }
    for segment in name.split('/') {
        match segment {
            "" => {
                return Err(EngineError::InvalidState(format!(
                    "empty path segment in object name: {name}"
                )))
            }
            "." | ".." => {
                return Err(EngineError::InvalidState(format!(
                    "directory reference in object name: {name}"
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_absolute_names() {
        assert!(validate_object_name("").is_err());
        assert!(validate_object_name("..").is_err());
        assert!(validate_object_name("../../../etc/passwd").is_err());
        assert!(validate_object_name("sub/../escape").is_err());
        assert!(validate_object_name("/tmp/malicious").is_err());
    }

    #[test]
    fn rejects_malformed_segments() {
        assert!(validate_object_name("a//b").is_err());
        assert!(validate_object_name("a/").is_err());
        assert!(validate_object_name("./a").is_err());
        assert!(validate_object_name("dir\\file").is_err());
        assert!(validate_object_name("a\0b").is_err());
    }

    #[test]
    fn accepts_plain_and_nested_names() {
        assert!(validate_object_name("run1.dat").is_ok());
        assert!(validate_object_name("data/sub/run1.dat").is_ok());
        assert!(validate_object_name(".meta/tags.json").is_ok());
    }
}
