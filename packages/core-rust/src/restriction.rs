//! Two-level restriction rules over [`EndpointAttributes`].
//!
//! A rule is an ordered list of AND-groups. A request satisfies the rule when
//! it carries every flag of at least one group. A rule with no groups is
//! unrestricted.
//!
//! The distinction between the two constructors matters:
//!
//! - `RestrictionRule::all_of(SECURE | INTERNAL)` requires both flags at once.
//! - `RestrictionRule::any_of([SECURE, INTERNAL])` accepts either one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::EndpointAttributes;

/// Any-of(all-of(..)) gate controlling which requests may invoke an operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawRestrictionRule")]
pub struct RestrictionRule {
    groups: Vec<EndpointAttributes>,
}

/// Wire shape of a rule; normalised through [`RestrictionRule::any_of`].
#[derive(Deserialize)]
struct RawRestrictionRule {
    #[serde(default)]
    groups: Vec<EndpointAttributes>,
}

impl From<RawRestrictionRule> for RestrictionRule {
    fn from(raw: RawRestrictionRule) -> Self {
        Self::any_of(raw.groups)
    }
}

/// One AND-group that a request failed, with the flags it lacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmetGroup {
    pub required: EndpointAttributes,
    pub missing: EndpointAttributes,
}

impl RestrictionRule {
    /// A rule that allows every request.
    #[must_use]
    pub const fn none() -> Self {
        Self { groups: Vec::new() }
    }

    /// A single group: every flag in `required` must be present.
    #[must_use]
    pub fn all_of(required: EndpointAttributes) -> Self {
        Self::any_of([required])
    }

    /// Several groups: satisfying any one of them is sufficient.
    ///
    /// Empty groups are dropped; an empty group would otherwise make the
    /// whole rule vacuously true.
    #[must_use]
    pub fn any_of(groups: impl IntoIterator<Item = EndpointAttributes>) -> Self {
        Self {
            groups: groups.into_iter().filter(|g| !g.is_empty()).collect(),
        }
    }

    /// Adds another alternative group.
    #[must_use]
    pub fn or(mut self, group: EndpointAttributes) -> Self {
        if !group.is_empty() {
            self.groups.push(group);
        }
        self
    }

    #[must_use]
    pub fn groups(&self) -> &[EndpointAttributes] {
        &self.groups
    }

    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.groups.is_empty()
    }

    /// Evaluates the rule against a request's attributes.
    #[must_use]
    pub fn is_allowed(&self, request: EndpointAttributes) -> bool {
        self.is_unrestricted() || self.groups.iter().any(|group| request.has_all(*group))
    }

    /// Lists, per group, the flags the request was missing.
    ///
    /// Empty when the rule is satisfied.
    #[must_use]
    pub fn unmet(&self, request: EndpointAttributes) -> Vec<UnmetGroup> {
        if self.is_allowed(request) {
            return Vec::new();
        }
        self.groups
            .iter()
            .map(|group| UnmetGroup {
                required: *group,
                missing: group.difference(request),
            })
            .collect()
    }

    /// Whether some group permits the given format flag.
    ///
    /// A group that names no format at all places no constraint on format.
    #[must_use]
    pub fn allows_format(&self, format: EndpointAttributes) -> bool {
        self.is_unrestricted()
            || self.groups.iter().any(|group| {
                !group.has_any(EndpointAttributes::ANY_FORMAT) || group.has_all(format)
            })
    }
}

impl From<EndpointAttributes> for RestrictionRule {
    fn from(required: EndpointAttributes) -> Self {
        Self::all_of(required)
    }
}

impl fmt::Display for RestrictionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unrestricted() {
            return f.write_str("unrestricted");
        }
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            write!(f, "[{group}]")?;
        }
        Ok(())
    }
}

impl fmt::Display for UnmetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-[{}]", self.missing)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    type A = EndpointAttributes;

    fn attrs() -> impl Strategy<Value = A> {
        any::<u32>().prop_map(A::from_bits_truncate)
    }

    proptest! {
        #[test]
        fn empty_rule_allows_everything(request in attrs()) {
            prop_assert!(RestrictionRule::none().is_allowed(request));
        }

        #[test]
        fn single_group_is_subset_test(request in attrs(), group in attrs()) {
            let rule = RestrictionRule::all_of(group);
            prop_assert_eq!(rule.is_allowed(request), request.has_all(group));
        }

        #[test]
        fn two_groups_are_disjunction(request in attrs(), g1 in attrs(), g2 in attrs()) {
            prop_assume!(!g1.is_empty() && !g2.is_empty());
            let rule = RestrictionRule::any_of([g1, g2]);
            prop_assert_eq!(
                rule.is_allowed(request),
                request.has_all(g1) || request.has_all(g2)
            );
        }

        #[test]
        fn unmet_is_empty_iff_allowed(request in attrs(), g1 in attrs(), g2 in attrs()) {
            let rule = RestrictionRule::any_of([g1, g2]);
            prop_assert_eq!(rule.unmet(request).is_empty(), rule.is_allowed(request));
        }
    }

    #[test]
    fn combined_flags_require_all_simultaneously() {
        let rule = RestrictionRule::all_of(A::SECURE | A::INTERNAL);
        assert!(!rule.is_allowed(A::SECURE | A::EXTERNAL));
        assert!(!rule.is_allowed(A::IN_SECURE | A::INTERNAL));
        assert!(rule.is_allowed(A::SECURE | A::INTERNAL | A::JSON));
    }

    #[test]
    fn separate_groups_accept_either() {
        let rule = RestrictionRule::any_of([A::SECURE, A::INTERNAL]);
        assert!(rule.is_allowed(A::SECURE | A::EXTERNAL));
        assert!(rule.is_allowed(A::IN_SECURE | A::INTERNAL));
        assert!(!rule.is_allowed(A::IN_SECURE | A::EXTERNAL));
    }

    #[test]
    fn empty_groups_are_dropped() {
        let rule = RestrictionRule::any_of([A::NONE, A::SECURE]);
        assert_eq!(rule.groups(), &[A::SECURE]);
        assert!(!rule.is_allowed(A::IN_SECURE));
        assert!(RestrictionRule::all_of(A::NONE).is_unrestricted());
    }

    #[test]
    fn deserialized_rules_drop_empty_groups() {
        let rule: RestrictionRule = serde_json::from_str(r#"{"groups":[0]}"#).unwrap();
        assert!(rule.is_unrestricted());

        let secure = A::SECURE.bits();
        let json = format!(r#"{{"groups":[0,{secure}]}}"#);
        let rule: RestrictionRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, RestrictionRule::all_of(A::SECURE));
        assert!(!rule.is_allowed(A::IN_SECURE));
    }

    #[test]
    fn unmet_reports_missing_flags_per_group() {
        let rule = RestrictionRule::all_of(A::SECURE | A::INTERNAL).or(A::MESSAGE_QUEUE);
        let unmet = rule.unmet(A::SECURE | A::EXTERNAL);
        assert_eq!(unmet.len(), 2);
        assert_eq!(unmet[0].missing, A::INTERNAL);
        assert_eq!(unmet[1].missing, A::MESSAGE_QUEUE);
        assert_eq!(unmet[0].to_string(), "-[Internal]");
    }

    #[test]
    fn allows_format_checks_format_bearing_groups() {
        let rule = RestrictionRule::any_of([A::JSON | A::SECURE, A::XML]);
        assert!(rule.allows_format(A::JSON));
        assert!(rule.allows_format(A::XML));
        assert!(!rule.allows_format(A::SOAP11));

        let format_free = RestrictionRule::all_of(A::SECURE);
        assert!(format_free.allows_format(A::SOAP12));
    }

    #[test]
    fn display_shows_groups() {
        assert_eq!(RestrictionRule::none().to_string(), "unrestricted");
        let rule = RestrictionRule::any_of([A::SECURE, A::INTERNAL | A::JSON]);
        assert_eq!(rule.to_string(), "[Secure] OR [Json, Internal]");
    }
}
