//! Bounded collector for validation errors

use crate::error::{ResolveError, Result, ValidationError};

pub const DEFAULT_MAX_ERRORS: usize = 10;
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 500;

/// Collects validation errors until a checkpoint raises them together
///
/// Identical messages are kept once, each message is truncated to
/// `max_message_length` characters and anything beyond `max_errors` is dropped.
#[derive(Debug, Clone)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
    max_errors: usize,
    max_message_length: usize,
    dropped: usize,
}

impl Default for ValidationErrors {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ERRORS, DEFAULT_MAX_MESSAGE_LENGTH)
    }
}

impl ValidationErrors {
    pub fn new(max_errors: usize, max_message_length: usize) -> Self {
        Self {
            errors: Vec::new(),
            max_errors,
            max_message_length,
            dropped: 0,
        }
    }

    /// Empty collector with the same limits
    pub fn fresh(&self) -> Self {
        Self::new(self.max_errors, self.max_message_length)
    }

    pub fn add(&mut self, message: impl Into<String>) {
        let mut message: String = message.into();
        if message.chars().count() > self.max_message_length {
            message = message.chars().take(self.max_message_length).collect();
        }
        if self.errors.iter().any(|e| e.message == message) {
            return;
        }
        if self.errors.len() >= self.max_errors {
            self.dropped += 1;
            return;
        }
        self.errors.push(ValidationError { message });
    }

    pub fn extend<I: IntoIterator<Item = ValidationError>>(&mut self, errors: I) {
        for error in errors {
            self.add(error.message);
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Messages rejected because the collector was full
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// Raise the collected errors, if any
    pub fn check(&self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ResolveError::Validation(self.errors.clone()))
        }
    }

    pub fn into_result<T>(self, value: T) -> Result<T> {
        self.check().map(|_| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_collapsed() {
        let mut errors = ValidationErrors::default();
        errors.add("same");
        errors.add("same");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_error_count_is_capped() {
        let mut errors = ValidationErrors::new(2, 100);
        errors.add("one");
        errors.add("two");
        errors.add("three");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.dropped(), 1);
    }

    #[test]
    fn test_messages_are_truncated() {
        let mut errors = ValidationErrors::new(10, 5);
        errors.add("abcdefghij");
        assert_eq!(errors.iter().next().unwrap().message, "abcde");
    }

    #[test]
    fn test_check_raises_collected_errors() {
        let mut errors = ValidationErrors::default();
        assert!(errors.check().is_ok());
        errors.add("missing parameter");
        let err = errors.check().unwrap_err();
        assert_eq!(err.messages(), vec!["missing parameter".to_string()]);
    }
}
