//! SQL-backed report fields and the set of fields a query must fetch.

use std::fmt;

/// A field with its own SELECT expression and, for most, a JOIN fragment.
///
/// Variants are declared in the order their SELECT blocks are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Id,
    Alias,
    Assigned,
    Attachments,
    Blocks,
    Cc,
    Closed,
    Component,
    Created,
    Deadline,
    Depends,
    Flag,
    QuickFlag,
    Estimated,
    From,
    Hardware,
    Keywords,
    Milestone,
    LastComment,
    Modified,
    Os,
    Priority,
    Product,
    Qa,
    Remaining,
    Reopened,
    Resolution,
    Resolved,
    Severity,
    Status,
    Summary,
    To,
    Url,
    Verified,
    Version,
    Votes,
    Whiteboard,
    Work,
}

impl Field {
    /// Every field, in declaration order.
    pub const ALL: [Field; 38] = [
        Field::Id,
        Field::Alias,
        Field::Assigned,
        Field::Attachments,
        Field::Blocks,
        Field::Cc,
        Field::Closed,
        Field::Component,
        Field::Created,
        Field::Deadline,
        Field::Depends,
        Field::Flag,
        Field::QuickFlag,
        Field::Estimated,
        Field::From,
        Field::Hardware,
        Field::Keywords,
        Field::Milestone,
        Field::LastComment,
        Field::Modified,
        Field::Os,
        Field::Priority,
        Field::Product,
        Field::Qa,
        Field::Remaining,
        Field::Reopened,
        Field::Resolution,
        Field::Resolved,
        Field::Severity,
        Field::Status,
        Field::Summary,
        Field::To,
        Field::Url,
        Field::Verified,
        Field::Version,
        Field::Votes,
        Field::Whiteboard,
        Field::Work,
    ];

    /// Report name of the field, as used in parameters and columns.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Alias => "alias",
            Self::Assigned => "assigned",
            Self::Attachments => "attachments",
            Self::Blocks => "blocks",
            Self::Cc => "cc",
            Self::Closed => "closed",
            Self::Component => "component",
            Self::Created => "created",
            Self::Deadline => "deadline",
            Self::Depends => "depends",
            Self::Flag => "flag",
            Self::QuickFlag => "quickflag",
            Self::Estimated => "estimated",
            Self::From => "from",
            Self::Hardware => "hardware",
            Self::Keywords => "keywords",
            Self::Milestone => "milestone",
            Self::LastComment => "lastcomment",
            Self::Modified => "modified",
            Self::Os => "os",
            Self::Priority => "priority",
            Self::Product => "product",
            Self::Qa => "qa",
            Self::Remaining => "remaining",
            Self::Reopened => "reopened",
            Self::Resolution => "resolution",
            Self::Resolved => "resolved",
            Self::Severity => "severity",
            Self::Status => "status",
            Self::Summary => "summary",
            Self::To => "to",
            Self::Url => "url",
            Self::Verified => "verified",
            Self::Version => "version",
            Self::Votes => "votes",
            Self::Whiteboard => "status_whiteboard",
            Self::Work => "work",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Status literal recorded in the activity log when a bug enters the
    /// state this field tracks.
    #[must_use]
    pub fn transition_status(self) -> Option<&'static str> {
        match self {
            Self::Assigned => Some("ASSIGNED"),
            Self::Closed => Some("CLOSED"),
            Self::Reopened => Some("REOPENED"),
            Self::Resolved => Some("RESOLVED"),
            Self::Verified => Some("VERIFIED"),
            _ => None,
        }
    }

    fn bit(self) -> u64 {
        1 << (self as u32)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitmask over [`Field`]. Grows monotonically during a compile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequiredFieldSet(u64);

impl RequiredFieldSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    /// Require a field by report name. Names without an SQL block (derived
    /// columns such as `flagname`, or custom fields) are ignored.
    pub fn require(&mut self, name: &str) -> bool {
        match Field::from_name(name) {
            Some(field) => {
                tracing::debug!(field = %field, "field required");
                self.insert(field);
                true
            }
            None => {
                tracing::debug!(name, "no SQL block for required name");
                false
            }
        }
    }

    #[must_use]
    pub fn contains(&self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Required fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_for_every_field() {
        for field in Field::ALL {
            assert_eq!(Field::from_name(field.name()), Some(field));
        }
        assert_eq!(Field::from_name("flagname"), None);
    }

    #[test]
    fn declaration_order_matches_discriminants() {
        for (i, field) in Field::ALL.iter().enumerate() {
            assert_eq!(*field as usize, i);
        }
    }

    #[test]
    fn required_set_grows_and_iterates_in_order() {
        let mut set = RequiredFieldSet::new();
        assert!(set.is_empty());
        assert!(set.require("status"));
        assert!(set.require("alias"));
        assert!(!set.require("cf_team"));
        set.insert(Field::Status);

        let fields: Vec<Field> = set.iter().collect();
        assert_eq!(fields, vec![Field::Alias, Field::Status]);
        assert!(!set.contains(Field::Work));
    }

    #[test]
    fn transition_fields_carry_status_literals() {
        assert_eq!(Field::Verified.transition_status(), Some("VERIFIED"));
        assert_eq!(Field::Modified.transition_status(), None);
    }
}
