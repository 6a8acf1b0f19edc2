use crate::schema::AttributeKind;
use std::fmt;

/// How many operands an operator takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// No operand, the value is ignored (`isnull`)
    Unary,
    Binary,
    /// Non-empty list of operands (`in`, `hasall`)
    List,
    /// Exactly two bounds (`range`)
    Range,
    /// Function applied to the attribute (`func`, `sfunc`)
    Function,
}

/// A named comparison that can appear as a `__<name>` suffix or a JSON key suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Exact,
    NotExact,
    Gt,
    Lt,
    Gte,
    Lte,
    Range,
    NotRange,
    In,
    NotIn,
    Contains,
    NotContains,
    IContains,
    NotIContains,
    Match,
    NotMatch,
    IExact,
    NotIExact,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    IStartsWith,
    NotIStartsWith,
    IEndsWith,
    NotIEndsWith,
    HasAll,
    HasAny,
    HasKey,
    Overlap,
    IsNull,
    IsNotNull,
    Year,
    Month,
    Day,
    Func,
    SFunc,
}

const ALL_KINDS: &[AttributeKind] = &[
    AttributeKind::Scalar,
    AttributeKind::String,
    AttributeKind::Numeric,
    AttributeKind::Boolean,
    AttributeKind::Date,
    AttributeKind::DateTime,
    AttributeKind::Uuid,
    AttributeKind::Collection,
    AttributeKind::Json,
];

const ORDERED_KINDS: &[AttributeKind] = &[
    AttributeKind::Scalar,
    AttributeKind::String,
    AttributeKind::Numeric,
    AttributeKind::Date,
    AttributeKind::DateTime,
    AttributeKind::Uuid,
];

const TEXT_KINDS: &[AttributeKind] = &[AttributeKind::String];
const CONTAINER_KINDS: &[AttributeKind] = &[AttributeKind::Collection, AttributeKind::Json];
const DOCUMENT_KINDS: &[AttributeKind] = &[AttributeKind::Json];
const ARRAY_KINDS: &[AttributeKind] = &[AttributeKind::Collection];
const TEMPORAL_KINDS: &[AttributeKind] = &[AttributeKind::Date, AttributeKind::DateTime];

/// Every operator, in lookup order
pub const OPERATORS: [Operator; 37] = [
    Operator::Exact,
    Operator::NotExact,
    Operator::Gt,
    Operator::Lt,
    Operator::Gte,
    Operator::Lte,
    Operator::Range,
    Operator::NotRange,
    Operator::In,
    Operator::NotIn,
    Operator::Contains,
    Operator::NotContains,
    Operator::IContains,
    Operator::NotIContains,
    Operator::Match,
    Operator::NotMatch,
    Operator::IExact,
    Operator::NotIExact,
    Operator::StartsWith,
    Operator::NotStartsWith,
    Operator::EndsWith,
    Operator::NotEndsWith,
    Operator::IStartsWith,
    Operator::NotIStartsWith,
    Operator::IEndsWith,
    Operator::NotIEndsWith,
    Operator::HasAll,
    Operator::HasAny,
    Operator::HasKey,
    Operator::Overlap,
    Operator::IsNull,
    Operator::IsNotNull,
    Operator::Year,
    Operator::Month,
    Operator::Day,
    Operator::Func,
    Operator::SFunc,
];

impl Operator {
    /// Find an operator by its suffix name
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        OPERATORS.iter().copied().find(|op| op.name() == name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::NotExact => "notexact",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::Range => "range",
            Self::NotRange => "notrange",
            Self::In => "in",
            Self::NotIn => "notin",
            Self::Contains => "contains",
            Self::NotContains => "notcontains",
            Self::IContains => "icontains",
            Self::NotIContains => "noticontains",
            Self::Match => "match",
            Self::NotMatch => "notmatch",
            Self::IExact => "iexact",
            Self::NotIExact => "notiexact",
            Self::StartsWith => "startswith",
            Self::NotStartsWith => "notstartswith",
            Self::EndsWith => "endswith",
            Self::NotEndsWith => "notendswith",
            Self::IStartsWith => "istartswith",
            Self::NotIStartsWith => "notistartswith",
            Self::IEndsWith => "iendswith",
            Self::NotIEndsWith => "notiendswith",
            Self::HasAll => "hasall",
            Self::HasAny => "hasany",
            Self::HasKey => "haskey",
            Self::Overlap => "overlap",
            Self::IsNull => "isnull",
            Self::IsNotNull => "isnotnull",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Func => "func",
            Self::SFunc => "sfunc",
        }
    }

    #[must_use]
    pub const fn arity(self) -> Arity {
        match self {
            Self::IsNull | Self::IsNotNull => Arity::Unary,
            Self::Range | Self::NotRange => Arity::Range,
            Self::In
            | Self::NotIn
            | Self::Contains
            | Self::NotContains
            | Self::HasAll
            | Self::HasAny
            | Self::Overlap => Arity::List,
            Self::Func | Self::SFunc => Arity::Function,
            _ => Arity::Binary,
        }
    }

    /// The `not`-prefixed variants
    #[must_use]
    pub const fn is_negated(self) -> bool {
        matches!(
            self,
            Self::NotExact
                | Self::NotRange
                | Self::NotIn
                | Self::NotContains
                | Self::NotIContains
                | Self::NotMatch
                | Self::NotIExact
                | Self::NotStartsWith
                | Self::NotEndsWith
                | Self::NotIStartsWith
                | Self::NotIEndsWith
        )
    }

    /// The operator a negated variant negates; identity for the others.
    ///
    /// Backends compile the positive form and wrap it in their negation construct.
    #[must_use]
    pub const fn positive(self) -> Self {
        match self {
            Self::NotExact => Self::Exact,
            Self::NotRange => Self::Range,
            Self::NotIn => Self::In,
            Self::NotContains => Self::Contains,
            Self::NotIContains => Self::IContains,
            Self::NotMatch => Self::Match,
            Self::NotIExact => Self::IExact,
            Self::NotStartsWith => Self::StartsWith,
            Self::NotEndsWith => Self::EndsWith,
            Self::NotIStartsWith => Self::IStartsWith,
            Self::NotIEndsWith => Self::IEndsWith,
            other => other,
        }
    }

    /// Attribute kinds this operator may be applied to
    #[must_use]
    pub const fn compatible_kinds(self) -> &'static [AttributeKind] {
        match self.positive() {
            Self::Exact | Self::In | Self::IsNull | Self::IsNotNull | Self::Func | Self::SFunc => {
                ALL_KINDS
            }
            Self::Gt | Self::Lt | Self::Gte | Self::Lte | Self::Range => ORDERED_KINDS,
            Self::Contains => CONTAINER_KINDS,
            Self::HasAll | Self::HasAny | Self::HasKey => DOCUMENT_KINDS,
            Self::Overlap => ARRAY_KINDS,
            Self::Year | Self::Month | Self::Day => TEMPORAL_KINDS,
            _ => TEXT_KINDS,
        }
    }

    #[must_use]
    pub fn accepts(self, kind: AttributeKind) -> bool {
        self.compatible_kinds().contains(&kind)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_operator_round_trips_through_lookup() {
        for op in OPERATORS {
            assert_eq!(Operator::lookup(op.name()), Some(op));
        }
        let names: HashSet<_> = OPERATORS.iter().map(|op| op.name()).collect();
        assert_eq!(names.len(), OPERATORS.len());
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(Operator::lookup("efunc"), None);
        assert_eq!(Operator::lookup("EXACT"), None);
        assert_eq!(Operator::lookup(""), None);
    }

    #[test]
    fn test_negated_variants_share_kinds_and_arity_with_positive() {
        for op in OPERATORS.iter().copied().filter(|op| op.is_negated()) {
            let positive = op.positive();
            assert!(!positive.is_negated());
            assert_eq!(op.arity(), positive.arity(), "{op}");
            assert_eq!(op.compatible_kinds(), positive.compatible_kinds(), "{op}");
            assert_eq!(op.name(), format!("not{}", positive.name()));
        }
    }

    #[test]
    fn test_isnotnull_is_its_own_operator() {
        assert!(!Operator::IsNotNull.is_negated());
        assert_eq!(Operator::IsNotNull.arity(), Arity::Unary);
    }

    #[test]
    fn test_arity() {
        assert_eq!(Operator::Range.arity(), Arity::Range);
        assert_eq!(Operator::NotIn.arity(), Arity::List);
        assert_eq!(Operator::HasKey.arity(), Arity::Binary);
        assert_eq!(Operator::Year.arity(), Arity::Binary);
        assert_eq!(Operator::SFunc.arity(), Arity::Function);
    }

    #[test]
    fn test_kind_compatibility() {
        assert!(Operator::Gt.accepts(AttributeKind::Numeric));
        assert!(!Operator::Gt.accepts(AttributeKind::Boolean));
        assert!(Operator::IContains.accepts(AttributeKind::String));
        assert!(!Operator::IContains.accepts(AttributeKind::Numeric));
        assert!(Operator::Contains.accepts(AttributeKind::Collection));
        assert!(!Operator::Contains.accepts(AttributeKind::String));
        assert!(Operator::HasKey.accepts(AttributeKind::Json));
        assert!(Operator::Overlap.accepts(AttributeKind::Collection));
        assert!(!Operator::Overlap.accepts(AttributeKind::Json));
        assert!(Operator::Year.accepts(AttributeKind::DateTime));
        assert!(!Operator::Year.accepts(AttributeKind::String));
        assert!(Operator::IsNull.accepts(AttributeKind::Json));
        assert!(Operator::NotIExact.accepts(AttributeKind::String));
    }
}
