//! Character name and password validation for the login flow.

pub const MAX_NAME_LENGTH: usize = 16;
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Name validation errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("Name cannot be empty")]
    Empty,

    #[error("Name is too long (maximum {max} letters)")]
    TooLong { max: usize },

    #[error("Name contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },

    #[error("Name may contain at most one apostrophe")]
    TooManyApostrophes,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("Password cannot be empty")]
    Empty,

    #[error("Password is too long (maximum {max} characters)")]
    TooLong { max: usize },
}

/// Validate a character name: ASCII letters plus at most one apostrophe,
/// no more than [`MAX_NAME_LENGTH`] characters.
pub fn validate_name(name: &str) -> Result<String, NameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NameError::Empty);
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(NameError::TooLong {
            max: MAX_NAME_LENGTH,
        });
    }

    let invalid: String = trimmed
        .chars()
        .filter(|c| !c.is_ascii_alphabetic() && *c != '\'')
        .collect();
    if !invalid.is_empty() {
        return Err(NameError::InvalidCharacters { chars: invalid });
    }
    if trimmed.matches('\'').count() > 1 {
        return Err(NameError::TooManyApostrophes);
    }
    Ok(trimmed.to_string())
}

pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    if password.is_empty() {
        return Err(PasswordError::Empty);
    }
    if password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(PasswordError::TooLong {
            max: MAX_PASSWORD_LENGTH,
        });
    }
    Ok(())
}
