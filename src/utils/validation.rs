use crate::utils::error::{LibraryError, Result};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_store_uri(field_name: &str, uri: &str) -> Result<()> {
    if uri.is_empty() {
        return Err(LibraryError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: uri.to_string(),
            reason: "URI cannot be empty".to_string(),
        });
    }

    match Url::parse(uri) {
        Ok(url) => match url.scheme() {
            "memory" => Ok(()),
            scheme => Err(LibraryError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: uri.to_string(),
                reason: format!("Unsupported URI scheme: {}", scheme),
            }),
        },
        Err(e) => Err(LibraryError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: uri.to_string(),
            reason: format!("Invalid URI format: {}", e),
        }),
    }
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(LibraryError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(LibraryError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_store_uri() {
        assert!(validate_store_uri("store.uri", "memory://library").is_ok());
        assert!(validate_store_uri("store.uri", "mongodb://localhost:27017").is_err());
        assert!(validate_store_uri("store.uri", "").is_err());
        assert!(validate_store_uri("store.uri", "library").is_err());
        assert!(validate_store_uri("store.uri", "https://example.com").is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("borrow.max_retries", 3, 1).is_ok());
        assert!(validate_positive_number("borrow.max_retries", 0, 1).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("borrow.loan_period_days", 14, 1, 365).is_ok());
        assert!(validate_range("borrow.loan_period_days", 0, 1, 365).is_err());
        assert!(validate_range("borrow.loan_period_days", 366, 1, 365).is_err());
    }
}
