//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_BRANCH_CODE_LEN: usize = 32;

/// Validates that a branch code is 1 to 32 characters of lowercase ASCII letters, digits, `-`
/// or `_`.
///
/// # Examples
///
/// ```ignore
/// validate_branch_code("sisa")       // Ok
/// validate_branch_code("SM Seaside") // Err - uppercase and space
/// validate_branch_code("")           // Err - empty
/// ```
pub fn validate_branch_code(code: &str) -> Result<(), ValidationError> {
    if code.is_empty() || code.len() > MAX_BRANCH_CODE_LEN {
        let mut err = ValidationError::new("branch_code_length");
        err.message = Some(
            format!(
                "Branch code must be 1 to {MAX_BRANCH_CODE_LEN} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("branch_code_format");
        err.message = Some(
            "Branch code must contain only lowercase letters, digits, '-' or '_'".into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that a display name has visible characters.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Name must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_branch_code_valid() {
        assert!(validate_branch_code("sisa").is_ok());
        assert!(validate_branch_code("sm-jmall_2").is_ok());
    }

    #[test]
    fn test_validate_branch_code_invalid_length() {
        assert!(validate_branch_code("").is_err());
        assert!(validate_branch_code(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_branch_code_invalid_format() {
        assert!(validate_branch_code("Sisa").is_err()); // uppercase
        assert!(validate_branch_code("sm jmall").is_err()); // space
        assert!(validate_branch_code("sisa/1").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("ada").is_ok());
        assert!(validate_display_name("   ").is_err());
    }
}
