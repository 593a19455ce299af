//! Agent state machine (C11).
//!
//! Transitions outside the table are rejected, leaving both the state and
//! the history unchanged. Only WAKEUP→WORK is automatic, gated on the
//! `wakeup_complete` flag; every other transition is explicit.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// The agent's operating states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Wakeup,
    Work,
    Play,
    Solitude,
    Dream,
    Shutdown,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wakeup => "wakeup",
            Self::Work => "work",
            Self::Play => "play",
            Self::Solitude => "solitude",
            Self::Dream => "dream",
            Self::Shutdown => "shutdown",
        }
    }

    pub fn all() -> &'static [AgentState] {
        &[
            Self::Wakeup,
            Self::Work,
            Self::Play,
            Self::Solitude,
            Self::Dream,
            Self::Shutdown,
        ]
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full transition table
///
/// SHUTDOWN → any; any → SHUTDOWN; WAKEUP → {WORK, DREAM};
/// WORK → {DREAM, PLAY, SOLITUDE}; DREAM → {WORK}; PLAY → {WORK, SOLITUDE};
/// SOLITUDE → {WORK}.
pub const VALID_TRANSITIONS: &[(AgentState, AgentState)] = &[
    (AgentState::Shutdown, AgentState::Wakeup),
    (AgentState::Shutdown, AgentState::Work),
    (AgentState::Shutdown, AgentState::Dream),
    (AgentState::Shutdown, AgentState::Play),
    (AgentState::Shutdown, AgentState::Solitude),
    (AgentState::Wakeup, AgentState::Shutdown),
    (AgentState::Work, AgentState::Shutdown),
    (AgentState::Dream, AgentState::Shutdown),
    (AgentState::Play, AgentState::Shutdown),
    (AgentState::Solitude, AgentState::Shutdown),
    (AgentState::Wakeup, AgentState::Work),
    (AgentState::Wakeup, AgentState::Dream),
    (AgentState::Work, AgentState::Dream),
    (AgentState::Work, AgentState::Play),
    (AgentState::Work, AgentState::Solitude),
    (AgentState::Dream, AgentState::Work),
    (AgentState::Play, AgentState::Work),
    (AgentState::Play, AgentState::Solitude),
    (AgentState::Solitude, AgentState::Work),
];

/// Metadata flag set once the wakeup ritual completes
pub const WAKEUP_COMPLETE_FLAG: &str = "wakeup_complete";

/// Per-state metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    pub entered_at: DateTime<Utc>,
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

/// One accepted transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub from_state: Option<AgentState>,
    pub to_state: AgentState,
    pub timestamp: DateTime<Utc>,
}

/// The state machine
pub struct StateMachine {
    current: AgentState,
    history: Vec<StateHistoryEntry>,
    metadata: HashMap<AgentState, StateMetadata>,
    transitions: HashMap<AgentState, Vec<AgentState>>,
    clock: Arc<dyn Clock>,
}

impl StateMachine {
    /// New machine in the initial SHUTDOWN state
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let mut transitions: HashMap<AgentState, Vec<AgentState>> = HashMap::new();
        for (from, to) in VALID_TRANSITIONS {
            transitions.entry(*from).or_default().push(*to);
        }

        let mut machine = Self {
            current: AgentState::Shutdown,
            history: Vec::new(),
            metadata: HashMap::new(),
            transitions,
            clock,
        };
        machine.record_entry(AgentState::Shutdown, None);
        machine
    }

    pub fn current_state(&self) -> AgentState {
        self.current
    }

    pub fn history(&self) -> &[StateHistoryEntry] {
        &self.history
    }

    /// Whether the transition is in the table
    pub fn can_transition_to(&self, target: AgentState) -> bool {
        self.transitions
            .get(&self.current)
            .map(|targets| targets.contains(&target))
            .unwrap_or(false)
    }

    /// Attempt a transition; rejected transitions change nothing
    pub fn transition_to(&mut self, target: AgentState) -> bool {
        if !self.can_transition_to(target) {
            warn!(
                from = self.current.as_str(),
                to = target.as_str(),
                "Invalid state transition attempted"
            );
            return false;
        }

        let from = self.current;
        self.current = target;
        self.record_entry(target, Some(from));
        info!(from = from.as_str(), to = target.as_str(), "State transition");
        true
    }

    fn record_entry(&mut self, state: AgentState, from: Option<AgentState>) {
        let now = self.clock.now();
        self.history.push(StateHistoryEntry {
            from_state: from,
            to_state: state,
            timestamp: now,
        });
        self.metadata.entry(state).or_insert_with(|| StateMetadata {
            entered_at: now,
            counters: BTreeMap::new(),
            flags: BTreeMap::new(),
        });
        // Re-entering a state restarts its clock
        if let Some(meta) = self.metadata.get_mut(&state) {
            meta.entered_at = now;
        }
    }

    /// Metadata for the current state
    pub fn state_metadata(&self) -> Option<&StateMetadata> {
        self.metadata.get(&self.current)
    }

    /// Set a flag on the current state's metadata
    pub fn set_flag(&mut self, key: &str, value: bool) {
        if let Some(meta) = self.metadata.get_mut(&self.current) {
            meta.flags.insert(key.to_string(), value);
        }
    }

    /// Read a flag from the current state's metadata
    pub fn flag(&self, key: &str) -> bool {
        self.state_metadata()
            .and_then(|meta| meta.flags.get(key).copied())
            .unwrap_or(false)
    }

    /// Increment a counter on the current state's metadata
    pub fn increment_counter(&mut self, key: &str) {
        if let Some(meta) = self.metadata.get_mut(&self.current) {
            *meta.counters.entry(key.to_string()).or_insert(0) += 1;
        }
    }

    /// Seconds spent in the current state
    pub fn state_duration_secs(&self) -> f64 {
        self.state_metadata()
            .map(|meta| {
                (self.clock.now() - meta.entered_at)
                    .num_milliseconds()
                    .max(0) as f64
                    / 1000.0
            })
            .unwrap_or(0.0)
    }

    /// Automatic transition check, consulted each round
    ///
    /// Only WAKEUP→WORK is automatic, on the `wakeup_complete` flag.
    pub fn should_auto_transition(&self) -> Option<AgentState> {
        if self.current == AgentState::Wakeup && self.flag(WAKEUP_COMPLETE_FLAG) {
            return Some(AgentState::Work);
        }
        None
    }
}
