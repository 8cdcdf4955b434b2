//! Audience targeting: evaluates a test's predicate tree against the
//! profile, session, and device context supplied at assignment time.

use split_core::types::{
    AudienceSegment, ComparisonOperator, DeviceInfo, LogicalOperator, Predicate, PredicateGroup,
    PropertyValue, SessionInfo, UserProfile,
};

/// Check whether a user matches a test's audience. Tests with no audience
/// accept everyone.
pub fn matches_audience(
    audience: Option<&AudienceSegment>,
    profile: &UserProfile,
    session: &SessionInfo,
    device: &DeviceInfo,
) -> bool {
    match audience {
        None => true,
        Some(segment) => matches_group(&segment.criteria, profile, session, device),
    }
}

fn matches_group(
    group: &PredicateGroup,
    profile: &UserProfile,
    session: &SessionInfo,
    device: &DeviceInfo,
) -> bool {
    match group.operator {
        LogicalOperator::And => {
            group
                .predicates
                .iter()
                .all(|p| evaluate(p, profile, session, device))
                && group
                    .groups
                    .iter()
                    .all(|g| matches_group(g, profile, session, device))
        }
        LogicalOperator::Or => {
            group
                .predicates
                .iter()
                .any(|p| evaluate(p, profile, session, device))
                || group
                    .groups
                    .iter()
                    .any(|g| matches_group(g, profile, session, device))
        }
    }
}

fn evaluate(
    predicate: &Predicate,
    profile: &UserProfile,
    session: &SessionInfo,
    device: &DeviceInfo,
) -> bool {
    match predicate {
        Predicate::Attribute {
            key,
            operator,
            value,
        } => match profile.attributes.get(key) {
            Some(actual) => compare_values(actual, operator, value),
            // Missing attribute never matches, except for explicit IsNotSet.
            None => matches!(operator, ComparisonOperator::IsNotSet),
        },
        Predicate::Device { device_type } => device.device_type == *device_type,
        Predicate::Os { operator, value } => compare_optional_str(device.os.as_deref(), operator, value),
        Predicate::Browser { operator, value } => {
            compare_optional_str(device.browser.as_deref(), operator, value)
        }
        Predicate::Referrer { operator, value } => {
            compare_optional_str(session.referrer.as_deref(), operator, value)
        }
        Predicate::LandingPage { operator, value } => {
            compare_optional_str(session.landing_page.as_deref(), operator, value)
        }
    }
}

pub fn compare_values(
    actual: &PropertyValue,
    operator: &ComparisonOperator,
    expected: &PropertyValue,
) -> bool {
    use ComparisonOperator::*;
    match operator {
        Equals => actual == expected,
        NotEquals => actual != expected,
        GreaterThan => numeric_pair(actual, expected).is_some_and(|(a, e)| a > e),
        GreaterThanOrEqual => numeric_pair(actual, expected).is_some_and(|(a, e)| a >= e),
        LessThan => numeric_pair(actual, expected).is_some_and(|(a, e)| a < e),
        LessThanOrEqual => numeric_pair(actual, expected).is_some_and(|(a, e)| a <= e),
        Contains => string_pair(actual, expected).is_some_and(|(a, e)| a.contains(e)),
        NotContains => string_pair(actual, expected).map_or(true, |(a, e)| !a.contains(e)),
        StartsWith => string_pair(actual, expected).is_some_and(|(a, e)| a.starts_with(e)),
        EndsWith => string_pair(actual, expected).is_some_and(|(a, e)| a.ends_with(e)),
        IsSet => true,
        IsNotSet => false,
    }
}

fn compare_optional_str(
    actual: Option<&str>,
    operator: &ComparisonOperator,
    expected: &str,
) -> bool {
    match actual {
        Some(actual) => compare_values(
            &PropertyValue::String(actual.to_string()),
            operator,
            &PropertyValue::String(expected.to_string()),
        ),
        None => matches!(operator, ComparisonOperator::IsNotSet),
    }
}

fn numeric_pair(a: &PropertyValue, b: &PropertyValue) -> Option<(f64, f64)> {
    Some((a.as_number()?, b.as_number()?))
}

fn string_pair<'a>(a: &'a PropertyValue, b: &'a PropertyValue) -> Option<(&'a str, &'a str)> {
    Some((a.as_str()?, b.as_str()?))
}
