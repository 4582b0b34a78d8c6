//! Scope, actor, and mode coordinates.
//!
//! Every event and command is tagged with a `Scope`: which exchange, venue,
//! account, (optionally) symbol, and trading mode it belongs to. The scope is
//! stored flattened into `scope_*` columns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::DomainError;

/// Trading mode the engine runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingMode {
    Testnet,
    Production,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Testnet => "TESTNET",
            TradingMode::Production => "PRODUCTION",
        }
    }
}

impl FromStr for TradingMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TESTNET" => Ok(TradingMode::Testnet),
            "PRODUCTION" => Ok(TradingMode::Production),
            other => Err(DomainError::InvalidEnum {
                kind: "trading mode",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange venue a balance or order lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Venue {
    Futures,
    Spot,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Futures => "FUTURES",
            Venue::Spot => "SPOT",
        }
    }
}

impl FromStr for Venue {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FUTURES" => Ok(Venue::Futures),
            "SPOT" => Ok(Venue::Spot),
            other => Err(DomainError::InvalidEnum {
                kind: "venue",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine run mode, persisted under the `engine` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineMode {
    /// Normal operation
    Running,
    /// All trading commands blocked
    Paused,
    /// Only reduce-only orders allowed
    Safe,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Running => "RUNNING",
            EngineMode::Paused => "PAUSED",
            EngineMode::Safe => "SAFE",
        }
    }
}

impl FromStr for EngineMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(EngineMode::Running),
            "PAUSED" => Ok(EngineMode::Paused),
            "SAFE" => Ok(EngineMode::Safe),
            other => Err(DomainError::InvalidEnum {
                kind: "engine mode",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinate tagging every event and command.
///
/// `symbol` is optional because engine-wide events (lifecycle, capital,
/// balance) are not tied to a single trading pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub exchange: String,
    pub venue: Venue,
    pub account_id: String,
    pub symbol: Option<String>,
    pub mode: TradingMode,
}

impl Scope {
    pub fn new(
        exchange: impl Into<String>,
        venue: Venue,
        account_id: impl Into<String>,
        symbol: Option<String>,
        mode: TradingMode,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            venue,
            account_id: account_id.into(),
            symbol,
            mode,
        }
    }

    /// Same scope with the symbol replaced.
    pub fn with_symbol(&self, symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            ..self.clone()
        }
    }

    /// Same scope moved to another venue, symbol cleared.
    pub fn for_venue(&self, venue: Venue) -> Self {
        Self {
            venue,
            symbol: None,
            ..self.clone()
        }
    }
}

/// Kind of actor originating a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorKind {
    Strategy,
    User,
    System,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Strategy => "STRATEGY",
            ActorKind::User => "USER",
            ActorKind::System => "SYSTEM",
        }
    }
}

impl FromStr for ActorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STRATEGY" => Ok(ActorKind::Strategy),
            "USER" => Ok(ActorKind::User),
            "SYSTEM" => Ok(ActorKind::System),
            other => Err(DomainError::InvalidEnum {
                kind: "actor kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Originator of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn strategy(name: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Strategy,
            id: name.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::User,
            id: id.into(),
        }
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::System,
            id: id.into(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

// =============================================================================
// Tests
// =============================================================================
