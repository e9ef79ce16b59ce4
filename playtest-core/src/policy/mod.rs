//! Priority-ordered rule evaluation for automated play.
//!
//! A [`PriorityPolicy`] walks its guarded rules top to bottom and builds the
//! action of the first rule whose predicate holds. A fallback rule always
//! matches, so every snapshot yields exactly one [`Decision`].

pub mod rules;

use std::fmt;
use std::str::FromStr;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::action::{Action, Direction};
use crate::vision::{Position, VisionSnapshot};

/// Action chosen for one step, tagged with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub intent: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Policy interface for automated play.
pub trait DecisionPolicy: Send {
    /// Name used for logging and recordings.
    fn name(&self) -> &str;

    /// Choose the next action. Must return for every snapshot.
    fn decide(&mut self, snapshot: &VisionSnapshot) -> Decision;

    /// Drop all local state (stuck counters, targets, exploration heading).
    fn reset(&mut self);
}

/// Tunables shared by the standard rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub hostile_types: Vec<String>,
    pub pickup_types: Vec<String>,
    pub objective_types: Vec<String>,
    pub clickable_types: Vec<String>,
    /// Flee when health falls below this fraction of its maximum.
    pub flee_health_ratio: f64,
    pub flee_range: f64,
    pub engage_range: f64,
    pub pickup_radius: f64,
    /// Within this distance a pickup or objective is interacted with directly.
    pub touch_radius: f64,
    /// Steps before exploration picks a new heading.
    pub explore_period: u32,
    pub stuck_epsilon: f64,
    pub stuck_steps: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| (*s).to_string()).collect();
        Self {
            hostile_types: names(&["enemy", "monster", "boss"]),
            pickup_types: names(&["coin", "medkit", "item", "loot", "pickup"]),
            objective_types: names(&["door", "exit", "stairs", "shop", "extraction"]),
            clickable_types: names(&["button", "clickable", "upgrade"]),
            flee_health_ratio: 0.3,
            flee_range: 4.0,
            engage_range: 8.0,
            pickup_radius: 6.0,
            touch_radius: 1.0,
            explore_period: 12,
            stuck_epsilon: 0.05,
            stuck_steps: 4,
        }
    }
}

/// Tracks player movement between decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct StuckDetector {
    epsilon: f64,
    max_still_steps: u32,
    last: Option<Position>,
    still_steps: u32,
}

impl StuckDetector {
    #[must_use]
    pub const fn new(epsilon: f64, max_still_steps: u32) -> Self {
        Self {
            epsilon,
            max_still_steps,
            last: None,
            still_steps: 0,
        }
    }

    #[must_use]
    pub const fn still_steps(&self) -> u32 {
        self.still_steps
    }

    /// Record the current position. Returns `true` once movement has stayed
    /// under epsilon for more than the step limit, and resets the counter.
    pub fn observe(&mut self, position: Position) -> bool {
        match self.last {
            Some(prev) if prev.distance(position) < self.epsilon => self.still_steps += 1,
            _ => self.still_steps = 0,
        }
        self.last = Some(position);
        if self.still_steps > self.max_still_steps {
            self.still_steps = 0;
            true
        } else {
            false
        }
    }

    /// Forget history; used when the chosen action is not a movement.
    pub const fn clear(&mut self) {
        self.last = None;
        self.still_steps = 0;
    }
}

/// Mutable per-iteration state owned by a policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyState {
    seed: u64,
    pub rng: ChaCha8Rng,
    pub explore_direction: Direction,
    pub explore_age: u32,
    pub target_lock: Option<String>,
    pub stuck: StuckDetector,
    pub stuck_escapes: u32,
}

impl PolicyState {
    #[must_use]
    pub fn new(seed: u64, config: &PolicyConfig) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            explore_direction: Direction::Right,
            explore_age: 0,
            target_lock: None,
            stuck: StuckDetector::new(config.stuck_epsilon, config.stuck_steps),
            stuck_escapes: 0,
        }
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }
}

type Predicate = Box<dyn Fn(&VisionSnapshot, &PolicyState) -> bool + Send + Sync>;
type Builder = Box<dyn Fn(&VisionSnapshot, &mut PolicyState) -> RuleAction + Send + Sync>;

/// Action produced by a rule, with an optional explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleAction {
    pub action: Action,
    pub rationale: Option<String>,
}

impl RuleAction {
    #[must_use]
    pub fn because(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

impl From<Action> for RuleAction {
    fn from(action: Action) -> Self {
        Self {
            action,
            rationale: None,
        }
    }
}

/// Guarded rule: `predicate` decides whether `build` runs.
pub struct Rule {
    name: String,
    predicate: Predicate,
    build: Builder,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Rule {
    pub fn new<P, B>(name: impl Into<String>, predicate: P, build: B) -> Self
    where
        P: Fn(&VisionSnapshot, &PolicyState) -> bool + Send + Sync + 'static,
        B: Fn(&VisionSnapshot, &mut PolicyState) -> RuleAction + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            build: Box::new(build),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn matches(&self, snapshot: &VisionSnapshot, state: &PolicyState) -> bool {
        (self.predicate)(snapshot, state)
    }

    fn build(&self, snapshot: &VisionSnapshot, state: &mut PolicyState) -> RuleAction {
        (self.build)(snapshot, state)
    }
}

/// Ordered rule list with a fallback and a stuck-escape override.
#[derive(Debug)]
pub struct PriorityPolicy {
    name: String,
    config: PolicyConfig,
    rules: Vec<Rule>,
    fallback: Rule,
    state: PolicyState,
}

impl PriorityPolicy {
    /// `fallback` runs when no rule matches; its predicate is ignored.
    #[must_use]
    pub fn new(name: impl Into<String>, config: PolicyConfig, seed: u64, fallback: Rule) -> Self {
        let state = PolicyState::new(seed, &config);
        Self {
            name: name.into(),
            config,
            rules: Vec::new(),
            fallback,
            state,
        }
    }

    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub const fn state(&self) -> &PolicyState {
        &self.state
    }

    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules
            .iter()
            .chain(std::iter::once(&self.fallback))
            .map(Rule::name)
            .collect()
    }

    /// Replace a movement action with a forced turn when the player has not
    /// moved for too long.
    fn escape_if_stuck(&mut self, snapshot: &VisionSnapshot, decision: Decision) -> Decision {
        let Some(position) = snapshot.player_position() else {
            return decision;
        };
        if !decision.action.is_movement() {
            self.state.stuck.clear();
            return decision;
        }
        if !self.state.stuck.observe(position) {
            return decision;
        }

        let heading = match &decision.action {
            Action::MoveDir { direction } => *direction,
            _ => self.state.explore_direction,
        };
        // Alternate +90° and -135°.
        let turn = if self.state.stuck_escapes % 2 == 0 { 2 } else { -3 };
        let forced = heading.rotate(turn);
        self.state.stuck_escapes += 1;
        self.state.explore_direction = forced;
        self.state.explore_age = 0;
        self.state.target_lock = None;
        log::debug!(
            "{}: stuck while `{}`, forcing {forced}",
            self.name,
            decision.intent
        );
        Decision {
            intent: "stuck-escape".to_string(),
            action: Action::move_dir(forced),
            rationale: Some(format!("no movement while {}", decision.intent)),
        }
    }
}

impl DecisionPolicy for PriorityPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&mut self, snapshot: &VisionSnapshot) -> Decision {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.matches(snapshot, &self.state))
            .unwrap_or(&self.fallback);
        let RuleAction { action, rationale } = rule.build(snapshot, &mut self.state);
        let decision = Decision {
            intent: rule.name().to_string(),
            action,
            rationale,
        };
        self.escape_if_stuck(snapshot, decision)
    }

    fn reset(&mut self) {
        self.state = PolicyState::new(self.state.seed(), &self.config);
    }
}

/// Ready-made rule stacks for the broad game families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPreset {
    /// Real-time action: resume > flee > fight > loot > navigate > explore.
    Shooter,
    /// Non-combat exploration: resume > flee > loot > navigate > explore.
    Explorer,
    /// Incremental clickers: resume > click > idle.
    Clicker,
}

impl PolicyPreset {
    pub const ALL: [Self; 3] = [Self::Shooter, Self::Explorer, Self::Clicker];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Shooter => "shooter",
            Self::Explorer => "explorer",
            Self::Clicker => "clicker",
        }
    }

    #[must_use]
    pub fn create_policy(self, config: &PolicyConfig, seed: u64) -> Box<dyn DecisionPolicy> {
        let name = self.label();
        let policy = match self {
            Self::Shooter => PriorityPolicy::new(name, config.clone(), seed, rules::explore(config))
                .with_rule(rules::resume_on_screen())
                .with_rule(rules::flee_when_low(config))
                .with_rule(rules::engage_nearest(config))
                .with_rule(rules::pickup_nearby(config))
                .with_rule(rules::navigate_to_objective(config)),
            Self::Explorer => {
                PriorityPolicy::new(name, config.clone(), seed, rules::explore(config))
                    .with_rule(rules::resume_on_screen())
                    .with_rule(rules::flee_when_low(config))
                    .with_rule(rules::pickup_nearby(config))
                    .with_rule(rules::navigate_to_objective(config))
            }
            Self::Clicker => PriorityPolicy::new(name, config.clone(), seed, rules::idle())
                .with_rule(rules::resume_on_screen())
                .with_rule(rules::click_clickable(config)),
        };
        Box::new(policy)
    }
}

impl fmt::Display for PolicyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PolicyPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown policy `{s}` (expected one of: shooter, explorer, clicker)")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{PlayerRecord, VisibleEntity};

    fn player_at(x: f64, y: f64) -> VisionSnapshot {
        VisionSnapshot::new("playing").with_player(PlayerRecord {
            x,
            y,
            health: Some(10.0),
            max_health: Some(10.0),
            ..PlayerRecord::default()
        })
    }

    fn entity(id: &str, kind: &str, x: f64, y: f64) -> VisibleEntity {
        VisibleEntity {
            id: id.into(),
            kind: kind.into(),
            subtype: None,
            position: Position::new(x, y),
            health: None,
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut policy = PolicyPreset::Shooter.create_policy(&PolicyConfig::default(), 7);
        let snapshot = player_at(0.0, 0.0)
            .with_entity(entity("c1", "coin", 1.0, 0.0))
            .with_entity(entity("e1", "enemy", 3.0, 0.0));
        let decision = policy.decide(&snapshot);
        assert_eq!(decision.intent, "engage-nearest");
        assert_eq!(decision.action, Action::shoot_at(Position::new(3.0, 0.0)));
    }

    #[test]
    fn decision_is_total_for_odd_snapshots() {
        let snapshots = [
            VisionSnapshot::new("menu"),
            VisionSnapshot::new("cutscene"),
            VisionSnapshot::new("playing"),
            player_at(f64::NAN, 0.0),
            VisionSnapshot::new("victory"),
        ];
        for preset in PolicyPreset::ALL {
            let mut policy = preset.create_policy(&PolicyConfig::default(), 1);
            for snapshot in &snapshots {
                let decision = policy.decide(snapshot);
                assert!(!decision.intent.is_empty());
            }
        }
    }

    #[test]
    fn stuck_movement_is_overridden() {
        let config = PolicyConfig {
            stuck_steps: 2,
            ..PolicyConfig::default()
        };
        let mut policy = PriorityPolicy::new("test", config, 3, rules::explore(&PolicyConfig::default()));
        let snapshot = player_at(5.0, 5.0);
        let intents: Vec<String> = (0..4).map(|_| policy.decide(&snapshot).intent).collect();
        assert_eq!(intents, vec!["explore", "explore", "explore", "stuck-escape"]);
        assert_eq!(policy.state().stuck_escapes, 1);
        assert_eq!(policy.state().stuck.still_steps(), 0);
    }

    #[test]
    fn reset_restores_initial_state() {
        let config = PolicyConfig::default();
        let mut policy = PriorityPolicy::new("test", config.clone(), 11, rules::explore(&config))
            .with_rule(rules::engage_nearest(&config));
        let snapshot = player_at(0.0, 0.0).with_entity(entity("e1", "enemy", 1.0, 1.0));
        policy.decide(&snapshot);
        for _ in 0..20 {
            policy.decide(&player_at(0.0, 0.0));
        }
        assert_ne!(policy.state(), &PolicyState::new(11, &config));
        policy.reset();
        assert_eq!(policy.state(), &PolicyState::new(11, &config));
    }

    #[test]
    fn preset_parses_case_insensitively() {
        assert_eq!("Shooter".parse::<PolicyPreset>(), Ok(PolicyPreset::Shooter));
        assert!("tactics".parse::<PolicyPreset>().is_err());
    }

    #[test]
    fn stuck_detector_counts_only_consecutive_stillness() {
        let mut detector = StuckDetector::new(0.1, 1);
        assert!(!detector.observe(Position::new(0.0, 0.0)));
        assert!(!detector.observe(Position::new(0.0, 0.0)));
        assert!(!detector.observe(Position::new(1.0, 0.0)));
        assert!(!detector.observe(Position::new(1.0, 0.0)));
        assert!(detector.observe(Position::new(1.0, 0.05)));
    }
}
