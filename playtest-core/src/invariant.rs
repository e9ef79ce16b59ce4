use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::vision::VisionSnapshot;

type InvariantCheck = Arc<dyn Fn(&VisionSnapshot) -> bool + Send + Sync + 'static>;

/// Named predicate over a snapshot that is expected to always hold.
#[derive(Clone)]
pub struct Invariant {
    name: String,
    message: String,
    check: InvariantCheck,
}

impl fmt::Debug for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invariant")
            .field("name", &self.name)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl Invariant {
    #[must_use]
    pub fn new<F>(name: impl Into<String>, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&VisionSnapshot) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            message: message.into(),
            check: Arc::new(check),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn holds(&self, snapshot: &VisionSnapshot) -> bool {
        (self.check)(snapshot)
    }
}

/// A failed invariant; a non-fatal finding attached to the current step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub name: String,
    pub message: String,
}

/// Invariants registered at harness setup, evaluated after every step.
#[derive(Debug, Clone, Default)]
pub struct InvariantRegistry {
    invariants: Vec<Invariant>,
}

impl InvariantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with checks that apply to every game.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(health_not_negative());
        registry.register(health_within_max());
        registry.register(position_finite());
        registry.register(entity_ids_unique());
        registry
    }

    /// Register an invariant. A second registration under the same name
    /// replaces the first.
    pub fn register(&mut self, invariant: Invariant) {
        if let Some(existing) = self
            .invariants
            .iter_mut()
            .find(|existing| existing.name == invariant.name)
        {
            log::warn!("replacing invariant `{}`", invariant.name);
            *existing = invariant;
        } else {
            self.invariants.push(invariant);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.invariants.iter().map(Invariant::name)
    }

    /// Violations in registration order; empty when healthy.
    #[must_use]
    pub fn evaluate(&self, snapshot: &VisionSnapshot) -> Vec<Violation> {
        self.invariants
            .iter()
            .filter(|invariant| !invariant.holds(snapshot))
            .map(|invariant| Violation {
                name: invariant.name.clone(),
                message: invariant.message.clone(),
            })
            .collect()
    }
}

#[must_use]
pub fn health_not_negative() -> Invariant {
    Invariant::new(
        "healthNotNegative",
        "player health dropped below zero",
        |snapshot| {
            snapshot
                .player
                .as_ref()
                .and_then(|player| player.health)
                .is_none_or(|hp| hp >= 0.0)
        },
    )
}

#[must_use]
pub fn health_within_max() -> Invariant {
    Invariant::new(
        "healthWithinMax",
        "player health exceeds its maximum",
        |snapshot| match snapshot.player.as_ref() {
            Some(player) => match (player.health, player.max_health) {
                (Some(hp), Some(max)) => hp <= max,
                _ => true,
            },
            None => true,
        },
    )
}

#[must_use]
pub fn position_finite() -> Invariant {
    Invariant::new(
        "positionFinite",
        "a position is NaN or infinite",
        |snapshot| {
            snapshot
                .player_position()
                .is_none_or(crate::vision::Position::is_finite)
                && snapshot
                    .visible_entities
                    .iter()
                    .all(|entity| entity.position.is_finite())
        },
    )
}

#[must_use]
pub fn entity_ids_unique() -> Invariant {
    Invariant::new(
        "entityIdsUnique",
        "two visible entities share an id",
        |snapshot| {
            let mut seen = HashSet::new();
            snapshot
                .visible_entities
                .iter()
                .all(|entity| seen.insert(entity.id.as_str()))
        },
    )
}
