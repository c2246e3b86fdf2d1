//! Credential lookup for the text-generation service

use shorui_core::config::PLACEHOLDER_API_KEY;
use shorui_core::{Result, ShoruiError};
use std::env;

/// Read the bearer credential from the environment variable `var_name`.
///
/// Unset, blank and placeholder values are all treated as missing.
pub fn resolve_api_key(var_name: &str) -> Result<String> {
    resolve_with(var_name, |key| env::var(key).ok())
}

pub(crate) fn resolve_with<F>(var_name: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var_name) {
        Some(value) => {
            let value = value.trim();
            if value.is_empty() || value == PLACEHOLDER_API_KEY {
                Err(ShoruiError::Auth(format!(
                    "{} is set to a placeholder value",
                    var_name
                )))
            } else {
                Ok(value.to_string())
            }
        }
        None => Err(ShoruiError::Auth(format!("{} is not set", var_name))),
    }
}
