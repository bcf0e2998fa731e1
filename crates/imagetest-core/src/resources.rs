//! CPU and memory quantity parsing.
//!
//! Quantities use the Kubernetes notation: a decimal number followed by an
//! optional binary (`Ki`, `Mi`, ...), decimal (`m`, `k`, `M`, ...), or
//! exponent (`e3`) suffix. Values are held as integer milli-units, so
//! `"500m"` CPUs and `"0.5"` CPUs compare equal. The milli-unit count is a
//! `u64`, so the largest accepted quantity is a little over 18P; `1E` and
//! `1Ei` are out of range and fail with [`QuantityError::Overflow`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a single quantity string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("quantity must not be negative")]
    Negative,

    #[error("malformed number {0:?}")]
    Malformed(String),

    #[error("unknown suffix {0:?}")]
    UnknownSuffix(String),

    #[error("quantity is too large")]
    Overflow,
}

/// The field of a [`ResourceSpec`] a parse error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceField {
    CpuRequest,
    CpuLimit,
    MemoryRequest,
    MemoryLimit,
}

impl fmt::Display for ResourceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CpuRequest => "resources.cpu.request",
            Self::CpuLimit => "resources.cpu.limit",
            Self::MemoryRequest => "resources.memory.request",
            Self::MemoryLimit => "resources.memory.limit",
        };
        f.write_str(s)
    }
}

/// Errors returned by [`parse_resources`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceParseError {
    #[error("invalid {field} {value:?}: {reason}")]
    InvalidQuantity {
        field: ResourceField,
        value: String,
        #[source]
        reason: QuantityError,
    },

    #[error("{resource} request {request} exceeds limit {limit}")]
    RequestExceedsLimit {
        resource: &'static str,
        request: Quantity,
        limit: Quantity,
    },
}

/// A non-negative resource quantity stored in milli-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quantity {
    millis: u64,
}

impl Quantity {
    /// Build a quantity from a milli-unit count (`1000` == one whole unit).
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// The quantity in milli-units.
    pub const fn milli_value(&self) -> u64 {
        self.millis
    }

    /// The quantity in whole units, rounded up.
    pub const fn value(&self) -> u64 {
        self.millis.div_ceil(1000)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 == 0 {
            write!(f, "{}", self.millis / 1000)
        } else {
            write!(f, "{}m", self.millis)
        }
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let unsigned = match s.as_bytes()[0] {
            b'-' => return Err(QuantityError::Negative),
            b'+' => &s[1..],
            _ => s,
        };

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
            return Err(QuantityError::Malformed(s.to_string()));
        }

        let (scale_num, scale_den) = suffix_scale(suffix)?;

        let mantissa: u128 = format!("{int_part}{frac_part}")
            .parse()
            .map_err(|_| QuantityError::Overflow)?;
        let frac_den = 10u128
            .checked_pow(frac_part.len() as u32)
            .ok_or(QuantityError::Overflow)?;

        let num = mantissa
            .checked_mul(scale_num)
            .ok_or(QuantityError::Overflow)?;
        let den = frac_den
            .checked_mul(scale_den)
            .ok_or(QuantityError::Overflow)?;

        let millis = u64::try_from(num.div_ceil(den)).map_err(|_| QuantityError::Overflow)?;
        Ok(Self { millis })
    }
}

/// Return the `(numerator, denominator)` that converts one unit of `suffix`
/// into milli-units.
fn suffix_scale(suffix: &str) -> Result<(u128, u128), QuantityError> {
    const KI: u128 = 1024;
    let scale = match suffix {
        "" => (1_000, 1),
        "n" => (1, 1_000_000),
        "u" => (1, 1_000),
        "m" => (1, 1),
        "k" => (1_000_000, 1),
        "M" => (1_000_000_000, 1),
        "G" => (1_000_000_000_000, 1),
        "T" => (1_000_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000_000, 1),
        "Ki" => (KI * 1_000, 1),
        "Mi" => (KI.pow(2) * 1_000, 1),
        "Gi" => (KI.pow(3) * 1_000, 1),
        "Ti" => (KI.pow(4) * 1_000, 1),
        "Pi" => (KI.pow(5) * 1_000, 1),
        "Ei" => (KI.pow(6) * 1_000, 1),
        s if s.starts_with(['e', 'E']) => {
            let exp: i32 = s[1..]
                .parse()
                .map_err(|_| QuantityError::UnknownSuffix(s.to_string()))?;
            // Shift by three to land in milli-units.
            let shifted = exp.checked_add(3).ok_or(QuantityError::Overflow)?;
            let pow = |p: i32| {
                10u128
                    .checked_pow(p.unsigned_abs())
                    .ok_or(QuantityError::Overflow)
            };
            if shifted >= 0 {
                (pow(shifted)?, 1)
            } else {
                (1, pow(shifted)?)
            }
        }
        other => return Err(QuantityError::UnknownSuffix(other.to_string())),
    };
    Ok(scale)
}

/// Optional request/limit strings for one resource kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
}

/// Declarative resource block of a harness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<ResourceBounds>,
    /// The CPU limit is parsed but not applied to the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<ResourceBounds>,
}

/// Validated CPU and memory requests and limits.
///
/// Memory is in bytes (`value()`), CPU in cores (`milli_value()` is
/// millicores).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_request: Option<Quantity>,
    pub cpu_limit: Option<Quantity>,
    pub memory_request: Option<Quantity>,
    pub memory_limit: Option<Quantity>,
}

/// Parse a [`ResourceSpec`] into a [`ResourceRequest`].
///
/// Fails when any quantity is malformed or a request exceeds its limit.
pub fn parse_resources(spec: &ResourceSpec) -> Result<ResourceRequest, ResourceParseError> {
    let memory = spec.memory.clone().unwrap_or_default();
    let cpu = spec.cpu.clone().unwrap_or_default();

    let request = ResourceRequest {
        cpu_request: parse_field(ResourceField::CpuRequest, cpu.request.as_deref())?,
        cpu_limit: parse_field(ResourceField::CpuLimit, cpu.limit.as_deref())?,
        memory_request: parse_field(ResourceField::MemoryRequest, memory.request.as_deref())?,
        memory_limit: parse_field(ResourceField::MemoryLimit, memory.limit.as_deref())?,
    };

    check_bounds("memory", request.memory_request, request.memory_limit)?;
    check_bounds("cpu", request.cpu_request, request.cpu_limit)?;

    Ok(request)
}

fn parse_field(
    field: ResourceField,
    value: Option<&str>,
) -> Result<Option<Quantity>, ResourceParseError> {
    value
        .map(|v| {
            v.parse::<Quantity>()
                .map_err(|reason| ResourceParseError::InvalidQuantity {
                    field,
                    value: v.to_string(),
                    reason,
                })
        })
        .transpose()
}

fn check_bounds(
    resource: &'static str,
    request: Option<Quantity>,
    limit: Option<Quantity>,
) -> Result<(), ResourceParseError> {
    match (request, limit) {
        (Some(request), Some(limit)) if request > limit => {
            Err(ResourceParseError::RequestExceedsLimit {
                resource,
                request,
                limit,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    fn bounds(request: Option<&str>, limit: Option<&str>) -> Option<ResourceBounds> {
        Some(ResourceBounds {
            request: request.map(str::to_string),
            limit: limit.map(str::to_string),
        })
    }

    #[test]
    fn parses_cpu_notations() {
        assert_eq!(q("1").milli_value(), 1_000);
        assert_eq!(q("500m").milli_value(), 500);
        assert_eq!(q("0.5"), q("500m"));
        assert_eq!(q("+2.25").milli_value(), 2_250);
        assert_eq!(q(".5").milli_value(), 500);
    }

    #[test]
    fn parses_memory_notations() {
        assert_eq!(q("512Mi").value(), 512 * 1024 * 1024);
        assert_eq!(q("1Gi").value(), 1024 * 1024 * 1024);
        assert_eq!(q("1G").value(), 1_000_000_000);
        assert_eq!(q("128k").value(), 128_000);
        assert_eq!(q("1e3").value(), 1_000);
        assert_eq!(q("18P").value(), 18_000_000_000_000_000);
    }

    #[test]
    fn exa_quantities_are_out_of_range() {
        assert_eq!("1E".parse::<Quantity>(), Err(QuantityError::Overflow));
        assert_eq!("1Ei".parse::<Quantity>(), Err(QuantityError::Overflow));
    }

    #[test]
    fn huge_exponents_fail_without_panicking() {
        assert_eq!(
            "1e2147483647".parse::<Quantity>(),
            Err(QuantityError::Overflow)
        );
        assert_eq!(
            "1e-2147483648".parse::<Quantity>(),
            Err(QuantityError::Overflow)
        );
        assert_eq!("1e40".parse::<Quantity>(), Err(QuantityError::Overflow));
    }

    #[test]
    fn sub_milli_values_round_up() {
        assert_eq!(q("1n").milli_value(), 1);
        assert_eq!(q("1500u").milli_value(), 2);
    }

    #[test]
    fn rejects_malformed_quantities() {
        assert_eq!("".parse::<Quantity>(), Err(QuantityError::Empty));
        assert_eq!("-1".parse::<Quantity>(), Err(QuantityError::Negative));
        assert!(matches!(
            "abc".parse::<Quantity>(),
            Err(QuantityError::Malformed(_))
        ));
        assert!(matches!(
            "1.2.3".parse::<Quantity>(),
            Err(QuantityError::Malformed(_))
        ));
        assert!(matches!(
            "1Zi".parse::<Quantity>(),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert_eq!("99999999Ei".parse::<Quantity>(), Err(QuantityError::Overflow));
    }

    #[test]
    fn display_uses_whole_units_when_possible() {
        assert_eq!(q("2").to_string(), "2");
        assert_eq!(q("250m").to_string(), "250m");
    }

    #[test]
    fn empty_spec_yields_empty_request() {
        let req = parse_resources(&ResourceSpec::default()).unwrap();
        assert_eq!(req, ResourceRequest::default());
    }

    #[test]
    fn request_below_or_equal_limit_succeeds() {
        let below = ResourceSpec {
            memory: bounds(Some("1Gi"), Some("2Gi")),
            cpu: bounds(Some("500m"), Some("1")),
        };
        let req = parse_resources(&below).unwrap();
        assert_eq!(req.memory_request, Some(q("1Gi")));
        assert_eq!(req.cpu_limit, Some(q("1")));

        let equal = ResourceSpec {
            memory: bounds(Some("1Gi"), Some("1024Mi")),
            cpu: bounds(Some("1"), Some("1000m")),
        };
        assert!(parse_resources(&equal).is_ok());
    }

    #[test]
    fn request_above_limit_fails() {
        let spec = ResourceSpec {
            memory: bounds(Some("2Gi"), Some("1Gi")),
            cpu: None,
        };
        let err = parse_resources(&spec).unwrap_err();
        assert!(matches!(
            err,
            ResourceParseError::RequestExceedsLimit {
                resource: "memory",
                ..
            }
        ));

        let spec = ResourceSpec {
            memory: None,
            cpu: bounds(Some("2"), Some("1")),
        };
        assert!(parse_resources(&spec).is_err());
    }

    #[test]
    fn parse_error_names_the_field() {
        let spec = ResourceSpec {
            memory: bounds(None, Some("lots")),
            cpu: None,
        };
        let err = parse_resources(&spec).unwrap_err();
        assert!(
            err.to_string().contains("resources.memory.limit"),
            "unexpected error: {err}"
        );
    }
}
