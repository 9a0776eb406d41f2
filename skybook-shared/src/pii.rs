use serde::{Serialize, Deserialize, Serializer};
use std::fmt;

/// A wrapper for payer contact data that masks its value in Debug and Display output.
///
/// Serialization passes the real value through: the wrapper exists so that
/// `tracing::info!(payer = %Masked(&email))` never writes an address to the logs.
#[derive(Clone, Deserialize)]
pub struct Masked<T>(pub T);

/// `traveller@example.com` -> `t***@example.com`. Anything that is not an
/// address is masked entirely.
pub fn mask_email(value: &str) -> String {
    match value.split_once('@') {
        Some((local, domain)) if !domain.is_empty() => match local.chars().next() {
            Some(first) => format!("{}***@{}", first, domain),
            None => format!("***@{}", domain),
        },
        _ => "********".to_string(),
    }
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", mask_email(self.0.as_ref()))
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", mask_email(self.0.as_ref()))
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}
