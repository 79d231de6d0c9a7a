//! Validation of a single raw reading against its catalog parameter.
//!
//! Pure and stateless. Rules are checked in a fixed order (empty, numeric,
//! negative, precision, bound) so a value breaking several rules always
//! reports the same one.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::catalog::Parameter;

/// Why a reading was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    /// Nothing was entered.
    #[error("a value is required")]
    Empty,

    /// The input is not a plain decimal number.
    #[error("'{input}' is not a number")]
    NotNumeric {
        /// The trimmed input.
        input: String,
    },

    /// Readings cannot be negative.
    #[error("value {value} is negative")]
    Negative {
        /// The parsed value.
        value: f64,
    },

    /// More decimal digits than the parameter allows.
    #[error("value has {decimals} decimal digits, at most {max_decimals} allowed")]
    TooManyDecimals {
        /// Significant decimal digits in the input.
        decimals: u32,
        /// The parameter's limit.
        max_decimals: u32,
    },

    /// Above the parameter's upper bound.
    #[error("value {value} exceeds the maximum of {max_value} for {kind}")]
    ExceedsMax {
        /// The parsed value.
        value: f64,
        /// The parameter's bound.
        max_value: f64,
        /// The parameter's kind.
        kind: String,
    },
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d+(?:\.(?P<frac>\d*))?|\.(?P<lead>\d+))$")
            .unwrap_or_else(|e| unreachable!("number pattern is valid: {e}"))
    })
}

/// Validate a raw reading for `parameter`.
///
/// Trailing zeros in the fractional part do not count towards precision, so
/// `"1.50"` and `"1.500"` are both two significant digits at most.
///
/// # Errors
///
/// Returns the first [`Rejection`] the input violates.
pub fn validate(raw: &str, parameter: &Parameter) -> Result<f64, Rejection> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(Rejection::Empty);
    }

    let Some(captures) = number_pattern().captures(input) else {
        return Err(Rejection::NotNumeric {
            input: input.to_string(),
        });
    };

    let value: f64 = input.parse().map_err(|_| Rejection::NotNumeric {
        input: input.to_string(),
    })?;

    if value < 0.0 {
        return Err(Rejection::Negative { value });
    }

    let fraction = captures
        .name("frac")
        .or_else(|| captures.name("lead"))
        .map_or("", |m| m.as_str());
    let decimals = u32::try_from(fraction.trim_end_matches('0').len()).unwrap_or(u32::MAX);
    if decimals > parameter.max_decimals {
        return Err(Rejection::TooManyDecimals {
            decimals,
            max_decimals: parameter.max_decimals,
        });
    }

    if value > parameter.max_value {
        return Err(Rejection::ExceedsMax {
            value,
            max_value: parameter.max_value,
            kind: parameter.kind.clone(),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn velocity() -> Parameter {
        Parameter::new("V1", "Vertical velocity", "velocity", 20.0)
    }

    fn acceleration() -> Parameter {
        Parameter::new("GV1", "Vertical acceleration", "acceleration", 2.0)
    }

    #[test]
    fn test_accepts_values_in_range() {
        for (raw, expected) in [
            ("0", 0.0),
            ("20", 20.0),
            ("19.99", 19.99),
            ("3.5", 3.5),
            (" 7.25 ", 7.25),
            (".5", 0.5),
            ("4.", 4.0),
            ("+1.1", 1.1),
        ] {
            let value = validate(raw, &velocity()).unwrap();
            assert!((value - expected).abs() < 1e-9, "{raw} parsed as {value}");
        }
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(validate("", &velocity()), Err(Rejection::Empty));
        assert_eq!(validate("   ", &velocity()), Err(Rejection::Empty));
    }

    #[test]
    fn test_rejects_non_numeric() {
        for raw in ["abc", "1,5", "12abc", "1e1", "NaN", "inf", "1.2.3", "--1"] {
            assert!(
                matches!(validate(raw, &velocity()), Err(Rejection::NotNumeric { .. })),
                "{raw} should be non-numeric"
            );
        }
    }

    #[test]
    fn test_rejects_negative() {
        assert!(matches!(
            validate("-0.5", &velocity()),
            Err(Rejection::Negative { .. })
        ));
    }

    #[test]
    fn test_negative_zero_is_zero() {
        assert_eq!(validate("-0", &velocity()), Ok(-0.0));
    }

    #[test]
    fn test_precision_checked_before_magnitude() {
        assert_eq!(
            validate("20.001", &velocity()),
            Err(Rejection::TooManyDecimals {
                decimals: 3,
                max_decimals: 2
            })
        );
        assert!(matches!(
            validate("0.123", &acceleration()),
            Err(Rejection::TooManyDecimals { .. })
        ));
    }

    #[test]
    fn test_trailing_zeros_do_not_count() {
        assert_eq!(validate("1.500", &velocity()), Ok(1.5));
        assert_eq!(validate("2.000", &acceleration()), Ok(2.0));
    }

    #[test]
    fn test_bound_comes_from_parameter() {
        assert!(matches!(
            validate("20.01", &velocity()),
            Err(Rejection::ExceedsMax { .. })
        ));
        assert!(matches!(
            validate("2.01", &acceleration()),
            Err(Rejection::ExceedsMax { .. })
        ));
        assert_eq!(validate("2", &acceleration()), Ok(2.0));

        let temperature = Parameter {
            max_decimals: 1,
            ..Parameter::new("T1", "Bearing temperature", "temperature", 120.0)
        };
        assert_eq!(validate("119.5", &temperature), Ok(119.5));
        assert!(matches!(
            validate("119.55", &temperature),
            Err(Rejection::TooManyDecimals { .. })
        ));
    }

    #[test]
    fn test_rejection_messages_name_the_rule() {
        let err = validate("25", &velocity()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("maximum"));
        assert!(msg.contains("velocity"));

        let err = validate("x", &velocity()).unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }
}
