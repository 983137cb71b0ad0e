//! Configuration for the `stagegate` binary, read from `stagegate.toml`.
//!
//! ```toml
//! [engine]
//! auto_approve_empty_gates = false
//! per_requirement = "any-of"
//! allow_resubmission = true
//!
//! [storage]
//! database = ".stagegate/stagegate.db"
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [directory.roles]
//! finance = ["carol", "dave"]
//!
//! [[workstreams]]
//! id = "growth"
//! name = "Growth"
//!
//! [[workstreams.gates.l0]]
//! rule = "any"
//! approvers = [{ account = "alice" }, { role = "finance" }]
//! ```
//!
//! `STAGEGATE_DATABASE` overrides `[storage] database`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::directory::StaticDirectory;
use crate::engine::EngineOptions;
use crate::evaluation::EvaluationConfig;
use crate::gates::{EntityKind, GateKey};
use crate::rule::{ApprovalRule, RequirementPolicy};
use crate::workstream::{ApprovalRound, ApproverRequirement, GateConfiguration, Workstream};

pub const CONFIG_FILE: &str = "stagegate.toml";
pub const DATABASE_ENV: &str = "STAGEGATE_DATABASE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub directory: DirectorySection,
    #[serde(default)]
    pub workstreams: Vec<WorkstreamSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default)]
    pub auto_approve_empty_gates: bool,
    #[serde(default)]
    pub per_requirement: RequirementPolicy,
    #[serde(default = "default_allow_resubmission")]
    pub allow_resubmission: bool,
}

fn default_allow_resubmission() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            auto_approve_empty_gates: false,
            per_requirement: RequirementPolicy::default(),
            allow_resubmission: default_allow_resubmission(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    /// SQLite file, relative to the project directory unless absolute.
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from(".stagegate").join("stagegate.db")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Also write a daily-rotated log file at this path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectorySection {
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkstreamSection {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Gate key (`l0`..`l5`) to its ordered rounds.
    #[serde(default)]
    pub gates: BTreeMap<String, Vec<RoundSection>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub rule: ApprovalRule,
    #[serde(default)]
    pub approvers: Vec<ApproverSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApproverSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stagegate.toml")
    }

    /// Load `stagegate.toml` from `dir`, or defaults if there is none.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize stagegate.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Configuration written by `stagegate init`.
    pub fn starter() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert("portfolio".to_string(), vec!["pm-lead".to_string()]);
        let mut gates = BTreeMap::new();
        gates.insert(
            "l0".to_string(),
            vec![RoundSection {
                id: None,
                rule: ApprovalRule::Any,
                approvers: vec![ApproverSection {
                    role: Some("portfolio".into()),
                    ..Default::default()
                }],
            }],
        );
        Self {
            engine: EngineSection {
                auto_approve_empty_gates: true,
                ..Default::default()
            },
            directory: DirectorySection { roles },
            workstreams: vec![WorkstreamSection {
                id: "default".into(),
                name: Some("Default".into()),
                gates,
            }],
            ..Default::default()
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            auto_approve_empty_gates: self.engine.auto_approve_empty_gates,
            per_requirement: self.engine.per_requirement,
            allow_resubmission: self.engine.allow_resubmission,
        }
    }

    pub fn directory(&self) -> StaticDirectory {
        StaticDirectory::from_roles(
            self.directory
                .roles
                .iter()
                .map(|(role, accounts)| (role.clone(), accounts.clone()))
                .collect::<HashMap<_, _>>(),
        )
    }

    /// Database path: `STAGEGATE_DATABASE` if set, else `[storage] database`,
    /// resolved against `dir` when relative.
    pub fn database_path(&self, dir: &Path) -> PathBuf {
        let configured = std::env::var(DATABASE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.storage.database.clone());
        if configured.is_absolute() {
            configured
        } else {
            dir.join(configured)
        }
    }

    /// Build the engine's workstreams. Round and approver ids that are not
    /// given are derived from their position (`l0-r1`, `l0-r1-a1`).
    pub fn workstreams(&self) -> Result<Vec<Workstream>> {
        self.workstreams
            .iter()
            .map(|section| -> Result<Workstream> {
                let mut gates = GateConfiguration::new();
                for (key, rounds) in &section.gates {
                    let gate = parse_initiative_gate(key)
                        .with_context(|| format!("In workstream '{}'", section.id))?;
                    gates.set_gate(gate, build_rounds(gate, rounds));
                }
                let name = section.name.clone().unwrap_or_else(|| section.id.clone());
                Ok(Workstream::new(&section.id, name, gates))
            })
            .collect()
    }

    /// Check the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.logging.level) {
            warnings.push(format!("Invalid logging level '{}': {}", self.logging.level, e));
        }

        let mut seen = HashSet::new();
        for section in &self.workstreams {
            if !seen.insert(section.id.as_str()) {
                warnings.push(format!("Workstream '{}' is defined more than once", section.id));
            }

            for (key, rounds) in &section.gates {
                if let Err(e) = parse_initiative_gate(key) {
                    warnings.push(format!("Workstream '{}': {}", section.id, e));
                    continue;
                }
                for (i, round) in rounds.iter().enumerate() {
                    let label = format!("Workstream '{}' gate {} round {}", section.id, key, i + 1);
                    if round.approvers.is_empty() {
                        warnings.push(format!("{} has no approvers", label));
                    }
                    for approver in &round.approvers {
                        match (&approver.account, &approver.role) {
                            (None, None) => warnings.push(format!(
                                "{} has an approver with neither account nor role",
                                label
                            )),
                            (Some(account), Some(role)) => warnings.push(format!(
                                "{}: approver sets both account '{}' and role '{}'; the account wins",
                                label, account, role
                            )),
                            (None, Some(role)) if !self.directory.roles.contains_key(role) => {
                                warnings.push(format!(
                                    "{}: role '{}' is not in [directory.roles]",
                                    label, role
                                ))
                            }
                            _ => {}
                        }
                    }
                }
            }

            if !self.engine.auto_approve_empty_gates {
                for gate in EntityKind::Initiative.gates() {
                    let configured = section.gates.iter().any(|(k, rounds)| {
                        k.eq_ignore_ascii_case(gate.as_str()) && !rounds.is_empty()
                    });
                    if !configured {
                        warnings.push(format!(
                            "Workstream '{}' gate {} has no rounds and auto_approve_empty_gates is off",
                            section.id, gate
                        ));
                    }
                }
            }
        }

        warnings
    }
}

fn parse_initiative_gate(key: &str) -> Result<GateKey> {
    let gate = GateKey::from_str(key).map_err(|e| anyhow::anyhow!(e))?;
    if !EntityKind::Initiative.contains(gate) {
        anyhow::bail!("gate '{}' is not an initiative gate", key);
    }
    Ok(gate)
}

fn build_rounds(gate: GateKey, rounds: &[RoundSection]) -> Vec<ApprovalRound> {
    rounds
        .iter()
        .enumerate()
        .map(|(i, section)| {
            let round_id = section
                .id
                .clone()
                .unwrap_or_else(|| format!("{}-r{}", gate, i + 1));
            let approvers = section
                .approvers
                .iter()
                .enumerate()
                .map(|(j, a)| ApproverRequirement {
                    id: a
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("{}-a{}", round_id, j + 1)),
                    account_id: a.account.clone(),
                    role: a.role.clone(),
                })
                .collect();
            ApprovalRound {
                id: round_id,
                rule: section.rule,
                approvers,
            }
        })
        .collect()
}

/// Read an interview roster (candidate, criteria, rounds) from a TOML file.
pub fn load_roster(path: &Path) -> Result<EvaluationConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read roster file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse roster file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[engine]
per_requirement = "all-of"

[directory.roles]
finance = ["carol", "dave"]

[[workstreams]]
id = "growth"
name = "Growth"

[[workstreams.gates.l0]]
rule = "any"
approvers = [{ account = "alice" }, { role = "finance" }]

[[workstreams.gates.l0]]
id = "l0-exec"
rule = "majority"
approvers = [{ account = "erin" }, { account = "frank" }, { account = "gina" }]
"#;

    #[test]
    fn test_defaults() {
        let settings = Settings::parse("").unwrap();
        assert!(!settings.engine.auto_approve_empty_gates);
        assert!(settings.engine.allow_resubmission);
        assert_eq!(settings.engine.per_requirement, RequirementPolicy::AnyOf);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(
            settings.storage.database,
            PathBuf::from(".stagegate/stagegate.db")
        );
    }

    #[test]
    fn test_parse_workstreams_with_derived_ids() {
        let settings = Settings::parse(SAMPLE).unwrap();
        assert_eq!(settings.engine_options().per_requirement, RequirementPolicy::AllOf);

        let workstreams = settings.workstreams().unwrap();
        let rounds = workstreams[0].gates.rounds(GateKey::L0);
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].id, "l0-r1");
        assert_eq!(rounds[0].approvers[1].id, "l0-r1-a2");
        assert_eq!(rounds[0].approvers[1].role.as_deref(), Some("finance"));
        assert_eq!(rounds[1].id, "l0-exec");
        assert_eq!(rounds[1].rule, ApprovalRule::Majority);
    }

    #[test]
    fn test_interview_gate_in_workstream_is_rejected() {
        let settings = Settings::parse(
            r#"
[[workstreams]]
id = "growth"
[[workstreams.gates.interview]]
rule = "any"
"#,
        )
        .unwrap();
        assert!(settings.workstreams().is_err());
        assert!(
            settings
                .validate()
                .iter()
                .any(|w| w.contains("not an initiative gate"))
        );
    }

    #[test]
    fn test_validate_warns_about_gaps() {
        let settings = Settings::parse(
            r#"
[[workstreams]]
id = "growth"
[[workstreams.gates.l0]]
rule = "all"
approvers = [{ role = "legal" }, {}]
"#,
        )
        .unwrap();
        let warnings = settings.validate();
        assert!(warnings.iter().any(|w| w.contains("role 'legal'")));
        assert!(warnings.iter().any(|w| w.contains("neither account nor role")));
        assert!(warnings.iter().any(|w| w.contains("gate l5 has no rounds")));
    }

    #[test]
    fn test_starter_round_trips_and_validates_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let starter = Settings::starter();
        starter.save(&path).unwrap();

        let loaded = Settings::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, starter);
        assert!(loaded.validate().is_empty(), "{:?}", loaded.validate());
    }

    #[test]
    fn test_relative_database_resolves_against_dir() {
        let settings = Settings::default();
        let dir = Path::new("/srv/project");
        if std::env::var(DATABASE_ENV).is_err() {
            assert_eq!(
                settings.database_path(dir),
                PathBuf::from("/srv/project/.stagegate/stagegate.db")
            );
        }
    }

    #[test]
    fn test_load_roster() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(
            &path,
            r#"
candidate = "Grace Hopper"
position = "Staff Engineer"

[[criteria]]
key = "design"
label = "System design"

[[rounds]]
id = "onsite"
rule = "all"
interviewers = [
  { id = "s1", account_id = "ivan" },
  { id = "s2", account_id = "judy", invitation = "accepted" },
]
"#,
        )
        .unwrap();

        let roster = load_roster(&path).unwrap();
        assert_eq!(roster.candidate, "Grace Hopper");
        assert_eq!(roster.rounds[0].interviewers.len(), 2);
        assert_eq!(roster.approval_rounds()[0].approvers.len(), 2);
    }
}
