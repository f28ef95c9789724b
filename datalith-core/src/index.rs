//! Covering index kinds
//!
//! Datalith maintains 3 covering index orderings to serve different query
//! patterns:
//!
//! | Index | Order | Use case |
//! |-------|-------|----------|
//! | EAV | e, aid, v | Entity lookups |
//! | AVE | aid, v, e | Attribute/value lookups |
//! | VEA | v, e, aid | Reverse reference lookups (refs only) |
//!
//! Each kind names one sub-database in the K/V layer. All ordering semantics
//! live in the key codec; the sub-databases use a plain byte comparator.

use std::fmt;

/// Index kind enumeration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Index {
    /// Entity-Attribute-Value
    Eav,
    /// Attribute-Value-Entity
    Ave,
    /// Value-Entity-Attribute (refs only)
    Vea,
}

impl Index {
    /// Get all index kinds
    pub fn all() -> &'static [Index] {
        &[Index::Eav, Index::Ave, Index::Vea]
    }

    /// Get the short name of this index (also its sub-database name)
    pub fn name(&self) -> &'static str {
        match self {
            Index::Eav => "eav",
            Index::Ave => "ave",
            Index::Vea => "vea",
        }
    }

    /// Select the natural index for a query based on bound components
    ///
    /// - EAV: entity bound (most selective)
    /// - AVE: attribute bound, entity unbound
    /// - VEA: only the value bound, and it is a reference
    /// - EAV: default fallback
    pub fn for_pattern(e_bound: bool, a_bound: bool, v_bound: bool, v_is_ref: bool) -> Index {
        if e_bound {
            Index::Eav
        } else if a_bound {
            Index::Ave
        } else if v_bound && v_is_ref {
            Index::Vea
        } else {
            Index::Eav
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Index {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eav" => Ok(Index::Eav),
            "ave" => Ok(Index::Ave),
            "vea" => Ok(Index::Vea),
            _ => Err(format!("Unknown index: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for idx in Index::all() {
            assert_eq!(idx.name().parse::<Index>().unwrap(), *idx);
        }
    }

    #[test]
    fn test_for_pattern() {
        assert_eq!(Index::for_pattern(true, true, true, false), Index::Eav);
        assert_eq!(Index::for_pattern(false, true, false, false), Index::Ave);
        assert_eq!(Index::for_pattern(false, false, true, true), Index::Vea);
        // Non-ref value alone cannot use VEA
        assert_eq!(Index::for_pattern(false, false, true, false), Index::Eav);
    }
}
