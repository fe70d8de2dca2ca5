//! Unique identifiers for plotloom entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier correlating a Plan to one generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(Ulid);

impl PlanId {
    /// Generate a new PlanId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for PlanId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_id_roundtrips_through_display() {
        let id = PlanId::new();
        let parsed: PlanId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_plan_ids_are_unique() {
        assert_ne!(PlanId::new(), PlanId::new());
    }
}
