use crate::error::{Result, VellumError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A single command operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Query,
}

impl Operation {
    const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::Query,
    ];

    fn bit(self) -> u8 {
        match self {
            Operation::Create => 0b0001,
            Operation::Update => 0b0010,
            Operation::Delete => 0b0100,
            Operation::Query => 0b1000,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Set of operations permitted on a record type
///
/// Serialized as a list of operation names, e.g. `["Create", "Query"]`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Operation>", into = "Vec<Operation>")]
pub struct CommandOperations(u8);

impl CommandOperations {
    pub const NONE: CommandOperations = CommandOperations(0);
    pub const CREATE: CommandOperations = CommandOperations(0b0001);
    pub const UPDATE: CommandOperations = CommandOperations(0b0010);
    pub const DELETE: CommandOperations = CommandOperations(0b0100);
    pub const QUERY: CommandOperations = CommandOperations(0b1000);
    pub const ALL: CommandOperations = CommandOperations(0b1111);

    pub fn allows(self, op: Operation) -> bool {
        self.0 & op.bit() != 0
    }

    /// Fail fast with `Forbidden` when `op` is not permitted
    pub fn require(self, op: Operation, type_name: &str) -> Result<()> {
        if self.allows(op) {
            Ok(())
        } else {
            Err(VellumError::Forbidden(format!(
                "{op} is not permitted for {type_name}"
            )))
        }
    }
}

impl Default for CommandOperations {
    fn default() -> Self {
        CommandOperations::ALL
    }
}

impl BitOr for CommandOperations {
    type Output = CommandOperations;

    fn bitor(self, rhs: Self) -> Self::Output {
        CommandOperations(self.0 | rhs.0)
    }
}

impl BitOrAssign for CommandOperations {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<Vec<Operation>> for CommandOperations {
    fn from(ops: Vec<Operation>) -> Self {
        CommandOperations(ops.into_iter().fold(0, |bits, op| bits | op.bit()))
    }
}

impl From<CommandOperations> for Vec<Operation> {
    fn from(ops: CommandOperations) -> Self {
        Operation::ALL
            .into_iter()
            .filter(|op| ops.allows(*op))
            .collect()
    }
}

impl fmt::Debug for CommandOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(Vec::<Operation>::from(*self))
            .finish()
    }
}

/// How much of a mutation is written to the audit log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EventPolicy {
    /// No events are persisted
    None,
    /// Events list changes to tracked fields only (default)
    #[default]
    TrackedOnly,
    /// Events list changes to every declared field, tracked or not
    AllChanges,
}

/// Binding of one logical record type to its physical location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeConfig {
    /// Logical type name, matches `Record::TYPE_NAME`
    pub type_name: String,

    /// Physical table / container holding records and events of this type
    pub location: String,

    /// Permitted operations (default: all)
    #[serde(default)]
    pub operations: CommandOperations,

    /// Reference to the secret backing field encryption, resolved by the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_secret: Option<String>,

    /// Event retention in seconds; events expire, records never do
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_ttl_secs: Option<u64>,

    #[serde(default)]
    pub event_policy: EventPolicy,
}

impl TypeConfig {
    pub fn new(type_name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            location: location.into(),
            operations: CommandOperations::default(),
            encryption_secret: None,
            event_ttl_secs: None,
            event_policy: EventPolicy::default(),
        }
    }

    pub fn with_operations(mut self, operations: CommandOperations) -> Self {
        self.operations = operations;
        self
    }

    pub fn with_encryption_secret(mut self, secret: impl Into<String>) -> Self {
        self.encryption_secret = Some(secret.into());
        self
    }

    pub fn with_event_ttl(mut self, ttl_secs: u64) -> Self {
        self.event_ttl_secs = Some(ttl_secs);
        self
    }

    pub fn with_event_policy(mut self, policy: EventPolicy) -> Self {
        self.event_policy = policy;
        self
    }
}

/// Type bindings consumed by a provider factory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub types: Vec<TypeConfig>,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, binding: TypeConfig) -> Self {
        self.types.push(binding);
        self
    }

    /// Check that every logical type name maps to exactly one location
    ///
    /// All problems are collected and reported together.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut seen: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for binding in &self.types {
            if binding.type_name.trim().is_empty() {
                problems.push("type binding with empty type name".to_string());
                continue;
            }
            if binding.location.trim().is_empty() {
                problems.push(format!("{} has an empty location", binding.type_name));
            }
            seen.entry(binding.type_name.as_str())
                .or_default()
                .push(binding.location.as_str());
        }

        for (type_name, locations) in seen {
            if locations.len() > 1 {
                problems.push(format!(
                    "{} is bound to {} locations: {}",
                    type_name,
                    locations.len(),
                    locations.join(", ")
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(VellumError::Config(problems.join("; ")))
        }
    }

    /// Look up the binding for a logical type
    pub fn binding(&self, type_name: &str) -> Result<&TypeConfig> {
        let mut matches = self.types.iter().filter(|t| t.type_name == type_name);
        match (matches.next(), matches.next()) {
            (Some(binding), None) => Ok(binding),
            (None, _) => Err(VellumError::Config(format!(
                "no location configured for {type_name}"
            ))),
            (Some(_), Some(_)) => Err(VellumError::Config(format!(
                "{type_name} is bound to more than one location"
            ))),
        }
    }

    /// Distinct physical locations, in configuration order
    pub fn locations(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for binding in &self.types {
            if !out.contains(&binding.location.as_str()) {
                out.push(binding.location.as_str());
            }
        }
        out
    }
}
