//! Secret wrapper for credential material held in memory

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value (decrypted token, encryption key, client secret).
///
/// Renders as `[REDACTED]` through `Debug` and `Display`, so it is safe to
/// pass to `tracing` fields by accident. The inner value is zeroed on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the plaintext. Call at the point of use only.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Whether the wrapped string is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl<T: Zeroize> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_is_redacted_in_debug_and_display() {
        let token = Secret::new(String::from("x-access-token-abc"));
        assert_eq!(format!("{token:?}"), "[REDACTED]");
        assert_eq!(format!("{token}"), "[REDACTED]");
    }

    #[test]
    fn expose_returns_plaintext() {
        let token: Secret<String> = String::from("x-access-token-abc").into();
        assert_eq!(token.expose(), "x-access-token-abc");
    }

    #[test]
    fn blank_detection_ignores_whitespace() {
        assert!(Secret::new(String::from("  \n")).is_blank());
        assert!(!Secret::new(String::from("k")).is_blank());
    }
}
