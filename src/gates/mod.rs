//! Gate keys and the fixed pipelines they belong to.
//!
//! Initiatives move through `l0..l5` in order. Evaluations have a single
//! implicit interview gate. Advancement only ever moves forward one gate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKey {
    L0,
    L1,
    L2,
    L3,
    L4,
    L5,
    Interview,
}

const INITIATIVE_GATES: [GateKey; 6] = [
    GateKey::L0,
    GateKey::L1,
    GateKey::L2,
    GateKey::L3,
    GateKey::L4,
    GateKey::L5,
];

const EVALUATION_GATES: [GateKey; 1] = [GateKey::Interview];

impl GateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L0 => "l0",
            Self::L1 => "l1",
            Self::L2 => "l2",
            Self::L3 => "l3",
            Self::L4 => "l4",
            Self::L5 => "l5",
            Self::Interview => "interview",
        }
    }
}

impl fmt::Display for GateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l0" => Ok(Self::L0),
            "l1" => Ok(Self::L1),
            "l2" => Ok(Self::L2),
            "l3" => Ok(Self::L3),
            "l4" => Ok(Self::L4),
            "l5" => Ok(Self::L5),
            "interview" => Ok(Self::Interview),
            _ => Err(format!(
                "Invalid gate '{}'. Valid values: l0, l1, l2, l3, l4, l5, interview",
                s
            )),
        }
    }
}

/// The kind of governed entity, which fixes its gate pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Initiative,
    Evaluation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiative => "initiative",
            Self::Evaluation => "evaluation",
        }
    }

    /// Ordered gates for this kind of entity.
    pub fn gates(&self) -> &'static [GateKey] {
        match self {
            Self::Initiative => &INITIATIVE_GATES,
            Self::Evaluation => &EVALUATION_GATES,
        }
    }

    pub fn first_gate(&self) -> GateKey {
        self.gates()[0]
    }

    /// The gate after `gate`, or `None` when `gate` is the last one (or foreign).
    pub fn next_gate(&self, gate: GateKey) -> Option<GateKey> {
        let gates = self.gates();
        let pos = gates.iter().position(|g| *g == gate)?;
        gates.get(pos + 1).copied()
    }

    pub fn contains(&self, gate: GateKey) -> bool {
        self.gates().contains(&gate)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiative_pipeline_is_ordered() {
        let gates = EntityKind::Initiative.gates();
        assert_eq!(gates.len(), 6);
        assert!(gates.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(EntityKind::Initiative.first_gate(), GateKey::L0);
    }

    #[test]
    fn test_next_gate_moves_one_step() {
        assert_eq!(
            EntityKind::Initiative.next_gate(GateKey::L2),
            Some(GateKey::L3)
        );
        assert_eq!(EntityKind::Initiative.next_gate(GateKey::L5), None);
        assert_eq!(EntityKind::Evaluation.next_gate(GateKey::Interview), None);
        assert_eq!(EntityKind::Evaluation.next_gate(GateKey::L0), None);
    }

    #[test]
    fn test_contains_rejects_foreign_gates() {
        assert!(EntityKind::Evaluation.contains(GateKey::Interview));
        assert!(!EntityKind::Evaluation.contains(GateKey::L1));
        assert!(!EntityKind::Initiative.contains(GateKey::Interview));
    }

    #[test]
    fn test_gate_key_parse_and_display() {
        assert_eq!("L3".parse::<GateKey>().unwrap(), GateKey::L3);
        assert_eq!(GateKey::Interview.to_string(), "interview");
        assert!("l6".parse::<GateKey>().is_err());
    }

    #[test]
    fn test_gate_key_serde_matches_display() {
        let json = serde_json::to_string(&GateKey::L4).unwrap();
        assert_eq!(json, "\"l4\"");
        let back: GateKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GateKey::L4);
    }
}
