//! Typed Azure resource IDs
//!
//! An ID type is declared from a template such as
//! `/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}`.
//! Literal segments must match (exactly, or ignoring case with
//! `parse_insensitively`), `{placeholders}` capture user values.

use thiserror::Error;

mod api_management;
mod network;

pub use api_management::{
    ApiManagementApiId, ApiManagementBackendId, ApiManagementServiceId, DeletedServiceId,
};
pub use network::{
    PrivateDnsRecordId, PrivateDnsZoneId, ResourceGroupId, VirtualNetworkId,
    VirtualNetworkLinkId,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    #[error("parsing {kind} ID {input:?}: the ID must start with '/'")]
    MissingLeadingSlash { kind: &'static str, input: String },

    #[error(
        "parsing {kind} ID {input:?}: expected {expected} segments in the format {template:?} but got {found}"
    )]
    SegmentCount {
        kind: &'static str,
        input: String,
        template: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(
        "parsing {kind} ID {input:?}: expected the segment {expected:?} in the format {template:?} but got {found:?}"
    )]
    UnexpectedSegment {
        kind: &'static str,
        input: String,
        template: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("parsing {kind} ID {input:?}: the segment {segment:?} must not be empty")]
    EmptyValue {
        kind: &'static str,
        input: String,
        segment: &'static str,
    },

    #[error("parsing {kind} ID {input:?}: {message}")]
    Invalid {
        kind: &'static str,
        input: String,
        message: String,
    },
}

enum Segment {
    Literal(&'static str),
    Placeholder(&'static str),
}

fn template_segments(template: &'static str) -> Vec<Segment> {
    template
        .trim_start_matches('/')
        .split('/')
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => Segment::Placeholder(name),
            None => Segment::Literal(s),
        })
        .collect()
}

/// Match `input` against `template` and return the placeholder values in order
pub(crate) fn parse_template(
    kind: &'static str,
    template: &'static str,
    input: &str,
    insensitive: bool,
) -> Result<Vec<String>, IdParseError> {
    let Some(rest) = input.strip_prefix('/') else {
        return Err(IdParseError::MissingLeadingSlash {
            kind,
            input: input.to_string(),
        });
    };

    let expected = template_segments(template);
    let found: Vec<&str> = rest.trim_end_matches('/').split('/').collect();

    for (segment, value) in expected.iter().zip(found.iter()) {
        match segment {
            Segment::Literal(literal) => {
                let matches = if insensitive {
                    literal.eq_ignore_ascii_case(value)
                } else {
                    literal == value
                };
                if !matches {
                    return Err(IdParseError::UnexpectedSegment {
                        kind,
                        input: input.to_string(),
                        template,
                        expected: *literal,
                        found: value.to_string(),
                    });
                }
            }
            Segment::Placeholder(name) => {
                if value.is_empty() {
                    return Err(IdParseError::EmptyValue {
                        kind,
                        input: input.to_string(),
                        segment: *name,
                    });
                }
            }
        }
    }

    if expected.len() != found.len() {
        return Err(IdParseError::SegmentCount {
            kind,
            input: input.to_string(),
            template,
            expected: expected.len(),
            found: found.len(),
        });
    }

    Ok(expected
        .iter()
        .zip(found)
        .filter_map(|(segment, value)| match segment {
            Segment::Placeholder(_) => Some(value.to_string()),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Substitute `values` into the placeholders of `template`, in order
pub(crate) fn format_template(template: &'static str, values: &[&str]) -> String {
    let mut values = values.iter();
    let mut out = String::new();
    for segment in template_segments(template) {
        out.push('/');
        match segment {
            Segment::Literal(literal) => out.push_str(literal),
            Segment::Placeholder(_) => out.push_str(values.next().copied().unwrap_or_default()),
        }
    }
    out
}

/// Common surface of every typed ID
pub trait ResourceIdentifier: Sized + std::fmt::Display {
    const KIND: &'static str;
    const TEMPLATE: &'static str;

    fn parse(input: &str) -> Result<Self, IdParseError>;
    fn parse_insensitively(input: &str) -> Result<Self, IdParseError>;

    /// Placeholder names paired with their values
    fn segments(&self) -> Vec<(&'static str, String)>;
}

/// Declare an ID type; field order must follow the template's placeholders
macro_rules! resource_id {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal, $template:literal {
            $( $field:ident ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name {
            $( pub $field: String, )+
        }

        impl $name {
            #[allow(clippy::too_many_arguments)]
            pub fn new($( $field: impl Into<String> ),+) -> Self {
                Self { $( $field: $field.into(), )+ }
            }

            fn from_values(values: Vec<String>) -> Self {
                let mut values = values.into_iter();
                Self { $( $field: values.next().unwrap_or_default(), )+ }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let values = [$( self.$field.as_str() ),+];
                write!(f, "{}", $crate::ids::format_template($template, &values))
            }
        }

        impl $crate::ids::ResourceIdentifier for $name {
            const KIND: &'static str = $kind;
            const TEMPLATE: &'static str = $template;

            fn parse(input: &str) -> Result<Self, $crate::ids::IdParseError> {
                $crate::ids::parse_template($kind, $template, input, false).map(Self::from_values)
            }

            fn parse_insensitively(input: &str) -> Result<Self, $crate::ids::IdParseError> {
                $crate::ids::parse_template($kind, $template, input, true).map(Self::from_values)
            }

            fn segments(&self) -> Vec<(&'static str, String)> {
                vec![$( (stringify!($field), self.$field.clone()) ),+]
            }
        }
    };
}

pub(crate) use resource_id;

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}";

    #[test]
    fn parse_and_format_template() {
        let values = parse_template("Test", TEMPLATE, "/subscriptions/s1/resourceGroups/rg1", false)
            .unwrap();
        assert_eq!(values, vec!["s1", "rg1"]);
        assert_eq!(
            format_template(TEMPLATE, &["s1", "rg1"]),
            "/subscriptions/s1/resourceGroups/rg1"
        );
    }

    #[test]
    fn literal_case_matters_unless_insensitive() {
        let input = "/Subscriptions/s1/ResourceGroups/rg1";
        let err = parse_template("Test", TEMPLATE, input, false).unwrap_err();
        assert!(matches!(
            err,
            IdParseError::UnexpectedSegment {
                expected: "subscriptions",
                ..
            }
        ));
        assert!(parse_template("Test", TEMPLATE, input, true).is_ok());
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        assert!(matches!(
            parse_template("Test", TEMPLATE, "subscriptions/s1/resourceGroups/rg1", false),
            Err(IdParseError::MissingLeadingSlash { .. })
        ));
        assert!(matches!(
            parse_template("Test", TEMPLATE, "/subscriptions/s1", false),
            Err(IdParseError::SegmentCount { found: 2, .. })
        ));
        assert!(matches!(
            parse_template("Test", TEMPLATE, "/subscriptions/s1/resourceGroups/rg1/extra/x", false),
            Err(IdParseError::SegmentCount { found: 6, .. })
        ));
        assert!(matches!(
            parse_template("Test", TEMPLATE, "/subscriptions//resourceGroups/rg1", false),
            Err(IdParseError::EmptyValue { .. })
        ));
    }

    #[test]
    fn trailing_slash_is_tolerated() {
        assert!(
            parse_template("Test", TEMPLATE, "/subscriptions/s1/resourceGroups/rg1/", false)
                .is_ok()
        );
    }

    #[test]
    fn error_names_template() {
        let err = parse_template("Test", TEMPLATE, "/subscriptions/s1/groups/rg1", false)
            .unwrap_err()
            .to_string();
        assert!(err.contains(TEMPLATE));
        assert!(err.contains("\"groups\""));
    }
}
