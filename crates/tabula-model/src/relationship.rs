use serde::{Deserialize, Serialize};

/// Cardinality of a link field, seen from the side that owns the field.
///
/// The first half names the local side, the second half the foreign side: a `ManyOne` link lets
/// many local records point at the same foreign record, and each local record points at one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relationship {
    OneOne,
    OneMany,
    ManyOne,
    ManyMany,
}

impl Relationship {
    /// Whether a local cell holds a collection of foreign records.
    #[must_use]
    pub const fn is_multiple_value(self) -> bool {
        matches!(self, Self::OneMany | Self::ManyMany)
    }

    /// The same relationship as seen from the symmetric field on the foreign table.
    #[must_use]
    pub const fn symmetric(self) -> Self {
        match self {
            Self::OneOne => Self::OneOne,
            Self::OneMany => Self::ManyOne,
            Self::ManyOne => Self::OneMany,
            Self::ManyMany => Self::ManyMany,
        }
    }

    /// Whether a foreign record may be claimed by at most one local record.
    ///
    /// This holds even for one-way links, where no symmetric cell exists to enforce it.
    #[must_use]
    pub const fn foreign_is_unique(self) -> bool {
        matches!(self, Self::OneOne | Self::OneMany)
    }
}

#[cfg(test)]
mod tests {
    use super::Relationship::*;

    #[test]
    fn symmetric_is_an_involution() {
        for rel in [OneOne, OneMany, ManyOne, ManyMany] {
            assert_eq!(rel.symmetric().symmetric(), rel);
        }
        assert_eq!(OneMany.symmetric(), ManyOne);
    }

    #[test]
    fn uniqueness_follows_the_foreign_side() {
        assert!(OneOne.foreign_is_unique());
        assert!(OneMany.foreign_is_unique());
        assert!(!ManyOne.foreign_is_unique());
        assert!(!ManyMany.foreign_is_unique());
        // The foreign side of a one-many link is single-valued.
        assert!(!OneMany.symmetric().is_multiple_value());
    }
}
