//! Pre-flight checks shared by the gateway adapters. Everything here runs
//! before any network call so a bad request never reaches a provider.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{CountryPolicy, GatewayName, PaymentDetails};
use regex::Regex;
use std::sync::OnceLock;

/// International dialing prefix and national significant number length.
fn dialing_plan(country: &str) -> Option<(&'static str, usize)> {
    match country {
        "KE" => Some(("254", 9)),
        "TZ" => Some(("255", 9)),
        "UG" => Some(("256", 9)),
        "RW" => Some(("250", 9)),
        "ZM" => Some(("260", 9)),
        "MW" => Some(("265", 9)),
        "GH" => Some(("233", 9)),
        "NG" => Some(("234", 10)),
        "CM" => Some(("237", 9)),
        "CI" => Some(("225", 10)),
        "SN" => Some(("221", 9)),
        "ML" => Some(("223", 8)),
        "BF" => Some(("226", 8)),
        "GN" => Some(("224", 9)),
        "BJ" => Some(("229", 8)),
        "CD" => Some(("243", 9)),
        "MG" => Some(("261", 9)),
        "GM" => Some(("220", 7)),
        "CG" => Some(("242", 9)),
        _ => None,
    }
}

fn digits_only() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9]{6,15}$").expect("static regex"))
}

/// Rejects countries outside the rail's footprint with a distinguishable
/// error so callers can ask for another payment method.
pub fn ensure_country(
    gateway: GatewayName,
    policy: CountryPolicy,
    details: &PaymentDetails,
) -> PaymentResult<String> {
    let country = details.require_country()?;
    if !policy.permits(&country) {
        return Err(PaymentError::UnsupportedCountry {
            gateway: gateway.to_string(),
            country,
        });
    }
    Ok(country)
}

pub fn ensure_currency(
    gateway: GatewayName,
    supported: &[&str],
    currency: &str,
) -> PaymentResult<()> {
    if supported.is_empty() || supported.iter().any(|c| c.eq_ignore_ascii_case(currency)) {
        return Ok(());
    }
    Err(PaymentError::ValidationError {
        message: format!("{} does not support currency {}", gateway, currency),
        field: Some("currency".to_string()),
    })
}

/// Normalizes a handset number to international format without `+`
/// (e.g. `0712 345 678` in KE becomes `254712345678`).
pub fn normalize_msisdn(phone: &str, country: &str) -> PaymentResult<String> {
    let compact: String = phone
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
        .collect();
    if !digits_only().is_match(&compact) {
        return Err(PaymentError::validation(
            format!("invalid phone number format: {}", phone),
            "phone",
        ));
    }
    let digits = compact.trim_start_matches('+');

    let (prefix, national_len) = dialing_plan(country).ok_or_else(|| {
        PaymentError::validation(
            format!("mobile money numbers are not supported for country {}", country),
            "phone",
        )
    })?;

    let national = if let Some(rest) = digits.strip_prefix(prefix) {
        rest.to_string()
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest.to_string()
    } else {
        digits.to_string()
    };

    if national.len() != national_len {
        return Err(PaymentError::validation(
            format!(
                "phone number must have {} digits after the {} country code",
                national_len, prefix
            ),
            "phone",
        ));
    }

    Ok(format!("{}{}", prefix, national))
}

/// National significant number (no country code), as some rails expect.
pub fn national_number(msisdn: &str, country: &str) -> String {
    match dialing_plan(country) {
        Some((prefix, _)) => msisdn.strip_prefix(prefix).unwrap_or(msisdn).to_string(),
        None => msisdn.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_kenyan_numbers() {
        assert_eq!(normalize_msisdn("0712 345 678", "KE").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("+254712345678", "KE").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("712345678", "KE").unwrap(), "254712345678");
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(normalize_msisdn("07123", "KE").is_err());
        assert!(normalize_msisdn("abc12345678", "KE").is_err());
        assert!(normalize_msisdn("0712345678", "US").is_err());
    }

    #[test]
    fn unsupported_country_is_typed() {
        let details = PaymentDetails {
            country: Some("NG".to_string()),
            ..Default::default()
        };
        let err = ensure_country(GatewayName::Mpesa, CountryPolicy::Allow(&["KE"]), &details)
            .unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedCountry { .. }));
    }

    #[test]
    fn missing_country_is_a_validation_error() {
        let err = ensure_country(
            GatewayName::Stripe,
            CountryPolicy::Deny(&[]),
            &PaymentDetails::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
    }

    #[test]
    fn national_number_strips_prefix() {
        assert_eq!(national_number("256772123456", "UG"), "772123456");
    }
}
