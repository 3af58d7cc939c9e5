//! Attribute validators
//!
//! Every validator has the `fn(&Value) -> Result<(), String>` shape so it
//! can back an `AttributeType::Custom`.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use azrm_core::resource::Value;
use azrm_core::schema::AttributeType;
use regex::Regex;

pub type Validator = fn(&Value) -> Result<(), String>;

/// String attribute checked by `validate`
pub fn string(name: &str, validate: Validator) -> AttributeType {
    AttributeType::Custom {
        name: name.to_string(),
        base: Box::new(AttributeType::String),
        validate,
    }
}

/// Integer attribute checked by `validate`
pub fn int(name: &str, validate: Validator) -> AttributeType {
    AttributeType::Custom {
        name: name.to_string(),
        base: Box::new(AttributeType::Int),
        validate,
    }
}

// Patterns are compile-time constants; a failure here is a programming error.
macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(&$re).expect(concat!("invalid pattern ", stringify!($name))));
    };
}

pattern!(SERVICE_NAME, r"^[a-zA-Z](?:[a-zA-Z0-9-]{0,48}[a-zA-Z0-9])?$");
pattern!(CHILD_NAME, r"^[^*#&+:<>?]+$");
// ASCII classes: a Unicode `\w` repeated this many times blows the regex size limit
pattern!(API_PATH, r"^(?:|[A-Za-z0-9_.][A-Za-z0-9_\-/.]{0,398}[A-Za-z0-9_\-])$");
pattern!(EMAIL, r"^[^@\s]+@[^@\s]+\.[^@\s]+$");
pattern!(
    SKU_NAME,
    r"^(?:Consumption_0|Developer_1|Basic_[12]|Standard_[1-4]|Premium_(?:[1-9]|[12][0-9]|3[01])|(?:BasicV2|StandardV2)_(?:[1-9]|10))$"
);
pattern!(HTTP_URL, r"^https?://[^\s/?#]+[^\s]*$");
pattern!(ZONE_NAME, format!(r"^{DNS_LABEL}(?:\.{DNS_LABEL})+\.?$"));
pattern!(RECORD_NAME, format!(r"^(?:\*|{DNS_LABEL})(?:\.{DNS_LABEL})*$"));
pattern!(ARM_ID, r"(?i)^/subscriptions/[^/]+(?:/[^/]+/[^/]+)*$");
pattern!(
    DURATION,
    r"^P(?:\d+Y)?(?:\d+M)?(?:\d+W)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+(?:\.\d+)?S)?)?$"
);

const DNS_LABEL: &str = r"[a-zA-Z0-9_](?:[a-zA-Z0-9_-]{0,61}[a-zA-Z0-9_])?";

fn expect_str(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string, got {}", value))
}

fn expect_int(value: &Value) -> Result<i64, String> {
    value
        .as_int()
        .ok_or_else(|| format!("expected an integer, got {}", value))
}

fn int_in_range(value: &Value, what: &str, min: i64, max: i64) -> Result<(), String> {
    let n = expect_int(value)?;
    if (min..=max).contains(&n) {
        Ok(())
    } else {
        Err(format!(
            "expected {} to be in the range ({} - {}), got {}",
            what, min, max, n
        ))
    }
}

// =============================================================================
// API Management
// =============================================================================

pub fn service_name(value: &Value) -> Result<(), String> {
    let name = expect_str(value)?;
    if SERVICE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "{:?} can contain only letters, numbers and hyphens, must start with a letter, \
             end with a letter or number, and be at most 50 characters long",
            name
        ))
    }
}

/// Name of an API or backend inside a service
pub fn child_name(value: &Value) -> Result<(), String> {
    let name = expect_str(value)?;
    if name.is_empty() || name.chars().count() > 256 {
        return Err(format!(
            "{:?} must be between 1 and 256 characters long",
            name
        ));
    }
    if CHILD_NAME.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "{:?} must not contain any of the characters `*#&+:<>?`",
            name
        ))
    }
}

/// URL suffix of an API; may be empty
pub fn api_path(value: &Value) -> Result<(), String> {
    let path = expect_str(value)?;
    if API_PATH.is_match(path) {
        Ok(())
    } else {
        Err(format!(
            "{:?} must be empty or start with a letter, number, underscore or dot, \
             and end with a letter, number, underscore or hyphen",
            path
        ))
    }
}

pub fn publisher_name(value: &Value) -> Result<(), String> {
    let name = expect_str(value)?;
    if name.trim().is_empty() || name.chars().count() > 100 {
        Err(format!(
            "{:?} must not be blank and at most 100 characters long",
            name
        ))
    } else {
        Ok(())
    }
}

pub fn email(value: &Value) -> Result<(), String> {
    let address = expect_str(value)?;
    if EMAIL.is_match(address) {
        Ok(())
    } else {
        Err(format!("{:?} is not a valid email address", address))
    }
}

/// `<Tier>_<capacity>`, e.g. `Developer_1` or `Consumption_0`
pub fn sku_name(value: &Value) -> Result<(), String> {
    let sku = expect_str(value)?;
    if SKU_NAME.is_match(sku) {
        Ok(())
    } else {
        Err(format!(
            "{:?} is not a valid SKU; expected the tier and capacity separated by an underscore \
             (e.g. `Developer_1`, `Premium_3`, `Consumption_0`)",
            sku
        ))
    }
}

/// Absolute http or https URL
pub fn http_url(value: &Value) -> Result<(), String> {
    let url = expect_str(value)?;
    if HTTP_URL.is_match(url) {
        Ok(())
    } else {
        Err(format!("{:?} must be an http or https URL", url))
    }
}

pub fn backend_description(value: &Value) -> Result<(), String> {
    let description = expect_str(value)?;
    let len = description.chars().count();
    if (1..=2000).contains(&len) {
        Ok(())
    } else {
        Err(format!(
            "expected the description to be between 1 and 2000 characters, got {}",
            len
        ))
    }
}

/// Priority of a backend in a load-balanced pool
pub fn pool_priority(value: &Value) -> Result<(), String> {
    int_in_range(value, "priority", 0, 100)
}

pub fn pool_weight(value: &Value) -> Result<(), String> {
    int_in_range(value, "weight", 0, 100)
}

pub fn failure_count(value: &Value) -> Result<(), String> {
    int_in_range(value, "count", 1, i64::MAX)
}

pub fn failure_percentage(value: &Value) -> Result<(), String> {
    int_in_range(value, "percentage", 1, 100)
}

/// Bound of a circuit breaker failure status code range
pub fn status_code(value: &Value) -> Result<(), String> {
    int_in_range(value, "status code", 200, 599)
}

// =============================================================================
// Private DNS
// =============================================================================

pub fn zone_name(value: &Value) -> Result<(), String> {
    let name = expect_str(value)?;
    if name.len() <= 253 && ZONE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "{:?} must be a DNS name with at least two labels and at most 253 characters",
            name
        ))
    }
}

/// Relative record set name; `@` is the zone apex
pub fn record_name(value: &Value) -> Result<(), String> {
    let name = expect_str(value)?;
    if name == "@" {
        return Ok(());
    }
    if name.len() <= 253 && RECORD_NAME.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "{:?} must be `@`, a wildcard label or a relative DNS name",
            name
        ))
    }
}

pub fn ttl(value: &Value) -> Result<(), String> {
    int_in_range(value, "ttl", 1, 2_147_483_647)
}

pub fn ipv4_address(value: &Value) -> Result<(), String> {
    let address = expect_str(value)?;
    address
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| format!("{:?} is not a valid IPv4 address", address))
}

pub fn ipv6_address(value: &Value) -> Result<(), String> {
    let address = expect_str(value)?;
    address
        .parse::<Ipv6Addr>()
        .map(|_| ())
        .map_err(|_| format!("{:?} is not a valid IPv6 address", address))
}

pub fn mx_preference(value: &Value) -> Result<(), String> {
    int_in_range(value, "preference", 0, 65535)
}

/// SRV priority, weight and port share the same range
pub fn srv_field(value: &Value) -> Result<(), String> {
    int_in_range(value, "value", 0, 65535)
}

pub fn txt_value(value: &Value) -> Result<(), String> {
    let text = expect_str(value)?;
    let len = text.chars().count();
    if (1..=1024).contains(&len) {
        Ok(())
    } else {
        Err(format!(
            "expected a TXT value between 1 and 1024 characters, got {}",
            len
        ))
    }
}

// =============================================================================
// Generic
// =============================================================================

/// Anything shaped like `/subscriptions/<id>/...`
pub fn arm_id(value: &Value) -> Result<(), String> {
    let id = expect_str(value)?;
    if ARM_ID.is_match(id) {
        Ok(())
    } else {
        Err(format!("{:?} is not a valid Azure resource ID", id))
    }
}

/// ISO 8601 duration such as `PT1M` or `P1DT12H`
pub fn iso8601_duration(value: &Value) -> Result<(), String> {
    let duration = expect_str(value)?;
    // "P" and "P1DT" match the pattern but carry no time component
    if DURATION.is_match(duration) && duration.len() > 1 && !duration.ends_with('T') {
        Ok(())
    } else {
        Err(format!("{:?} is not a valid ISO 8601 duration", duration))
    }
}
