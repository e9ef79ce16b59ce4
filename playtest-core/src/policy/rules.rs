//! Standard rules, in the escalation order that avoids livelock:
//! safety > combat > economy > navigation > exploration.

use rand::Rng;

use super::{PolicyConfig, PolicyState, Rule, RuleAction};
use crate::action::Action;
use crate::vision::{GameStateTag, VisionSnapshot};

fn within(snapshot: &VisionSnapshot, kinds: &[String], range: f64) -> bool {
    snapshot
        .nearest_of(kinds)
        .is_some_and(|(_, distance)| distance <= range)
}

/// Confirm through title, pause and end screens.
#[must_use]
pub fn resume_on_screen() -> Rule {
    Rule::new(
        "resume-on-screen",
        |snapshot, _| {
            matches!(
                snapshot.game_state,
                GameStateTag::Menu | GameStateTag::Paused
            ) || snapshot.is_terminal()
        },
        |snapshot, _| {
            RuleAction::from(Action::MenuSelect).because(format!("on {} screen", snapshot.game_state))
        },
    )
}

/// Run directly away from the nearest hostile while health is critical.
#[must_use]
pub fn flee_when_low(config: &PolicyConfig) -> Rule {
    let hostiles = config.hostile_types.clone();
    let threshold = config.flee_health_ratio;
    let range = config.flee_range;
    let kinds = hostiles.clone();
    Rule::new(
        "flee-when-low",
        move |snapshot, _| {
            let critical = snapshot
                .player
                .as_ref()
                .and_then(|player| player.health_ratio())
                .is_some_and(|ratio| ratio < threshold);
            critical && within(snapshot, &hostiles, range)
        },
        move |snapshot, state| {
            let away = snapshot.player_position().and_then(|origin| {
                let (threat, _) = snapshot.nearest_of(&kinds)?;
                threat.position.direction_to(origin)
            });
            let direction = away.unwrap_or_else(|| state.explore_direction.opposite());
            state.target_lock = None;
            RuleAction::from(Action::move_dir(direction)).because("health critical")
        },
    )
}

/// Shoot the nearest hostile in range, sticking with a locked target while it
/// stays visible and in range.
#[must_use]
pub fn engage_nearest(config: &PolicyConfig) -> Rule {
    let hostiles = config.hostile_types.clone();
    let range = config.engage_range;
    let kinds = hostiles.clone();
    Rule::new(
        "engage-nearest",
        move |snapshot, _| within(snapshot, &hostiles, range),
        move |snapshot, state| {
            let origin = snapshot.player_position();
            let locked = state
                .target_lock
                .as_deref()
                .and_then(|id| snapshot.entity(id))
                .filter(|entity| {
                    origin.is_some_and(|o| o.distance(entity.position) <= range)
                });
            let target = locked.or_else(|| snapshot.nearest_of(&kinds).map(|(entity, _)| entity));
            match target {
                Some(entity) => {
                    state.target_lock = Some(entity.id.clone());
                    RuleAction::from(Action::shoot_at(entity.position))
                        .because(format!("target {}", entity.id))
                }
                None => {
                    state.target_lock = None;
                    RuleAction::from(Action::Wait).because("target lost")
                }
            }
        },
    )
}

/// Walk to the nearest pickup within the radius; interact when touching it.
#[must_use]
pub fn pickup_nearby(config: &PolicyConfig) -> Rule {
    let pickups = config.pickup_types.clone();
    let radius = config.pickup_radius;
    let touch = config.touch_radius;
    let kinds = pickups.clone();
    Rule::new(
        "pickup-nearby",
        move |snapshot, _| within(snapshot, &pickups, radius),
        move |snapshot, _| approach(snapshot, &kinds, touch),
    )
}

/// Head for the nearest known objective (door, exit, shop).
#[must_use]
pub fn navigate_to_objective(config: &PolicyConfig) -> Rule {
    let objectives = config.objective_types.clone();
    let touch = config.touch_radius;
    let kinds = objectives.clone();
    Rule::new(
        "navigate-to-objective",
        move |snapshot, _| snapshot.nearest_of(&objectives).is_some(),
        move |snapshot, _| approach(snapshot, &kinds, touch),
    )
}

fn approach(snapshot: &VisionSnapshot, kinds: &[String], touch: f64) -> RuleAction {
    match snapshot.nearest_of(kinds) {
        Some((entity, distance)) if distance <= touch => {
            RuleAction::from(Action::Interact).because(format!("touching {}", entity.id))
        }
        Some((entity, distance)) => RuleAction::from(Action::move_to(entity.position))
            .because(format!("{} at {distance:.1}", entity.id)),
        None => RuleAction::from(Action::Wait),
    }
}

/// Click the first clickable entity the game reports.
#[must_use]
pub fn click_clickable(config: &PolicyConfig) -> Rule {
    let clickable = config.clickable_types.clone();
    let kinds = clickable.clone();
    Rule::new(
        "click-clickable",
        move |snapshot, _| snapshot.entities_of(&clickable).next().is_some(),
        move |snapshot, _| match snapshot.entities_of(&kinds).next() {
            Some(entity) => RuleAction::from(Action::Click {
                x: entity.position.x,
                y: entity.position.y,
            })
            .because(format!("clicking {}", entity.id)),
            None => RuleAction::from(Action::Wait),
        },
    )
}

/// Keep a heading and pick a new one every `explore_period` steps.
#[must_use]
pub fn explore(config: &PolicyConfig) -> Rule {
    let period = config.explore_period.max(1);
    Rule::new(
        "explore",
        |_, _| true,
        move |_, state: &mut PolicyState| {
            if state.explore_age >= period {
                let turn = state.rng.gen_range(1_i32..8);
                state.explore_direction = state.explore_direction.rotate(turn);
                state.explore_age = 0;
            }
            state.explore_age += 1;
            RuleAction::from(Action::move_dir(state.explore_direction))
        },
    )
}

/// Do nothing for a step.
#[must_use]
pub fn idle() -> Rule {
    Rule::new("idle", |_, _| true, |_, _| RuleAction::from(Action::Wait))
}
