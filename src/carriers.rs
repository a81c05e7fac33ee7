//! Carrier classification and phone number normalization.
//!
//! Destination numbers arrive in any of the `+254…`, `254…` or `0…` forms.
//! Everything is first coerced into the ten-digit national form (`07XXXXXXXX`
//! or `01XXXXXXXX`); the three digits after the leading zero select the
//! carrier. Prefix allocations change rarely enough to ship as constants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const COUNTRY_CODE: &str = "254";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Carrier {
    Safaricom,
    Airtel,
    Telkom,
    Equitel,
    Faiba,
}

impl Carrier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Carrier::Safaricom => "safaricom",
            Carrier::Airtel => "airtel",
            Carrier::Telkom => "telkom",
            Carrier::Equitel => "equitel",
            Carrier::Faiba => "faiba",
        }
    }

    /// The home telco is the one whose payment rail collects the money and
    /// whose dealer API dispatches first.
    pub fn is_home(&self) -> bool {
        matches!(self, Carrier::Safaricom)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "safaricom" => Some(Carrier::Safaricom),
            "airtel" => Some(Carrier::Airtel),
            "telkom" => Some(Carrier::Telkom),
            "equitel" => Some(Carrier::Equitel),
            "faiba" => Some(Carrier::Faiba),
            _ => None,
        }
    }
}

impl std::fmt::Display for Carrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum CarrierError {
    #[error("cannot normalize msisdn '{input}' to a ten-digit national number")]
    InvalidMsisdn { input: String },
}

/// Coerce a subscriber number into the national `0XXXXXXXXX` form.
///
/// Accepts `+254712345678`, `254712345678` and `0712345678`. Anything that
/// does not land on exactly ten digits with a leading zero is rejected.
pub fn national(msisdn: &str) -> Result<String, CarrierError> {
    let cleaned: String = msisdn
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(CarrierError::InvalidMsisdn {
            input: msisdn.to_string(),
        });
    }

    let normalized = if let Some(rest) = digits.strip_prefix(COUNTRY_CODE) {
        if rest.len() == 9 {
            format!("0{rest}")
        } else {
            return Err(CarrierError::InvalidMsisdn {
                input: msisdn.to_string(),
            });
        }
    } else if digits.starts_with('0') && digits.len() == 10 {
        digits.to_string()
    } else {
        return Err(CarrierError::InvalidMsisdn {
            input: msisdn.to_string(),
        });
    };

    Ok(normalized)
}

/// Nine national digits without the leading zero, the dealer API form
/// (`712345678`).
pub fn dealer_format(msisdn: &str) -> Result<String, CarrierError> {
    let national = national(msisdn)?;
    Ok(national[1..].to_string())
}

/// E.164 with a leading `+`, the aggregator form (`+254712345678`).
pub fn aggregator_format(msisdn: &str) -> Result<String, CarrierError> {
    let national = national(msisdn)?;
    Ok(format!("+{}{}", COUNTRY_CODE, &national[1..]))
}

/// Twelve digits without a plus, the form the payment rail expects for
/// `PartyA`/`PhoneNumber` (`254712345678`).
pub fn rail_format(msisdn: &str) -> Result<String, CarrierError> {
    let national = national(msisdn)?;
    Ok(format!("{}{}", COUNTRY_CODE, &national[1..]))
}

/// Classify a destination number. Returns `None` for numbers that do not
/// normalize or whose prefix is not in any allocation.
pub fn classify(msisdn: &str) -> Option<Carrier> {
    let national = national(msisdn).ok()?;
    let prefix: u16 = national[1..4].parse().ok()?;
    carrier_for_prefix(prefix)
}

fn carrier_for_prefix(prefix: u16) -> Option<Carrier> {
    match prefix {
        700..=729 | 740..=743 | 745 | 746 | 748 | 757..=759 | 768 | 769 | 790..=799
        | 110..=115 => Some(Carrier::Safaricom),
        730..=739 | 750..=756 | 785..=789 | 100..=106 => Some(Carrier::Airtel),
        770..=779 => Some(Carrier::Telkom),
        763..=765 => Some(Carrier::Equitel),
        747 => Some(Carrier::Faiba),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_all_three_input_forms() {
        for input in ["+254712345678", "254712345678", "0712345678"] {
            assert_eq!(national(input).unwrap(), "0712345678");
            assert_eq!(dealer_format(input).unwrap(), "712345678");
            assert_eq!(aggregator_format(input).unwrap(), "+254712345678");
            assert_eq!(rail_format(input).unwrap(), "254712345678");
        }
    }

    #[test]
    fn rejects_inputs_that_do_not_coerce() {
        for input in ["71234567", "07123456789", "25471234567", "07-not-digits", ""] {
            assert!(national(input).is_err(), "should reject {input:?}");
        }
    }

    #[test]
    fn classifies_known_prefixes() {
        assert_eq!(classify("0712345678"), Some(Carrier::Safaricom));
        assert_eq!(classify("0110345678"), Some(Carrier::Safaricom));
        assert_eq!(classify("0733345678"), Some(Carrier::Airtel));
        assert_eq!(classify("0100345678"), Some(Carrier::Airtel));
        assert_eq!(classify("0772345678"), Some(Carrier::Telkom));
        assert_eq!(classify("0764345678"), Some(Carrier::Equitel));
        assert_eq!(classify("0747345678"), Some(Carrier::Faiba));
    }

    #[test]
    fn unallocated_prefixes_are_unknown() {
        assert_eq!(classify("0744345678"), None);
        assert_eq!(classify("0120345678"), None);
        assert_eq!(classify("0780345678"), None);
    }

    #[test]
    fn home_telco_flag() {
        assert!(Carrier::Safaricom.is_home());
        assert!(!Carrier::Airtel.is_home());
        assert!(!Carrier::Equitel.is_home());
    }
}
