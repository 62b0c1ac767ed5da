//! Core configuration surface (spec.md §6).
//!
//! Mirrors the teacher's `ImacRoot`/`DefaultsConfig` idiom — a
//! serde-deserializable struct with `#[serde(default = "fn")]` defaults
//! for every optional field — generalized from project/codegen settings
//! to the verification core's own configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Configuration an external HTTP binary loads and passes to the core.
/// The core itself never reads this from disk or the environment; it is
/// a plain data type, loaded and owned by the collaborator that wires up
/// the HTTP surface (spec.md §6, Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CoreConfig {
    /// Directory scanned by the [`crate::registry::Registry`] for
    /// `*.json` ontology documents.
    pub ontology_dir: String,

    /// Port the external HTTP binary should bind. Unused by the core
    /// itself; carried here because it is part of the configuration
    /// surface named in spec.md §6.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins the external HTTP binary should allow via CORS.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Enables verbose `tracing` output for request-level spans.
    #[serde(default)]
    pub debug: bool,

    /// Wall-clock bound on a single constraint's SMT discharge, per
    /// spec.md §5 "Blocking and cancellation".
    #[serde(default = "default_solver_timeout_ms")]
    pub solver_timeout_ms: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_solver_timeout_ms() -> u64 {
    5_000
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ontology_dir: "ontologies".to_string(),
            port: default_port(),
            cors_origins: Vec::new(),
            debug: false,
            solver_timeout_ms: default_solver_timeout_ms(),
        }
    }
}

impl CoreConfig {
    pub fn from_json(data: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn verifier_config(&self) -> crate::verify::VerifierConfig {
        crate::verify::VerifierConfig {
            solver_timeout_ms: self.solver_timeout_ms,
        }
    }
}
