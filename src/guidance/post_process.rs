//! Step post-processing: roundabout accumulation, collapsing, lane
//! cleanup, intersection building and end trimming.
//!
//! The raw step list carries one step per traversed edge, most of them
//! silent. The passes here fold that list into announcements a driver can
//! follow: roundabout traversals become a single enter instruction with
//! an exit count, micro-steps around intersections collapse into their
//! neighbors, uninformative lane hints disappear, and the trip ends are
//! cleaned of zero-length artifacts. Running any pass twice is a no-op.

use crate::geo;
use crate::guidance::instruction::{
    angle_to_modifier, DirectionModifier, TurnInstruction, TurnType, NO_TURN,
};
use crate::guidance::step::{LegGeometry, RouteStep, WaypointType, NO_INDEX};
use crate::spatial::PhantomEndpoint;

const MAX_COLLAPSE_DISTANCE: f64 = 30.0;
const MIN_END_OF_ROAD_INTERSECTIONS: usize = 2;
const NAME_SEGMENT_CUTOFF_LENGTH: f64 = 100.0;
const MAX_STAGGERED_DISTANCE: f64 = 3.0;
/// Relative-location modifiers are only meaningful when the input sits
/// between these distances from the snap.
const MIN_RELATIVE_DISTANCE: f64 = 5.0;
const MAX_RELATIVE_DISTANCE: f64 = 300.0;

// ---------------------------------------------------------------------
// shared helpers
// ---------------------------------------------------------------------

fn invalidate(step: &mut RouteStep) {
    *step = RouteStep::invalid();
}

fn has_maneuver(first: &RouteStep, second: &RouteStep) -> bool {
    first.maneuver.instruction.turn_type != TurnType::Suppressed
        || second.maneuver.instruction.turn_type != TurnType::Suppressed
}

fn compatible(lhs: &RouteStep, rhs: &RouteStep) -> bool {
    lhs.mode == rhs.mode
}

/// Copy all signage from `origin` onto `destination`.
fn forward_signage(destination: &mut RouteStep, origin: &RouteStep) {
    destination.name_id = origin.name_id;
    destination.name = origin.name.clone();
    destination.road_ref = origin.road_ref.clone();
    destination.pronunciation = origin.pronunciation.clone();
    destination.destinations = origin.destinations.clone();
}

/// Name changes the user should hear about. "Name (Ref)" to "Name" is the
/// extractor's business; dropping to an unnamed road is not announced.
fn is_noticeable_name_change(lhs: &RouteStep, rhs: &RouteStep) -> bool {
    if rhs.name.is_empty() && rhs.road_ref.is_empty() {
        return false;
    }
    lhs.name != rhs.name || lhs.road_ref != rhs.road_ref
}

fn is_collapsable_instruction(instruction: TurnInstruction) -> bool {
    matches!(
        (instruction.turn_type, instruction.modifier),
        (TurnType::NewName, _)
            | (TurnType::Suppressed, DirectionModifier::Straight)
            | (TurnType::Turn, DirectionModifier::Straight)
            | (TurnType::Continue, DirectionModifier::Straight)
            | (TurnType::Merge, _)
    )
}

/// A step with at most one open entry leaves the driver no choice; longer
/// roads are then still collapsible.
fn choiceless(step: &RouteStep, previous: &RouteStep) -> bool {
    let open_entries = step
        .intersections
        .first()
        .map(|i| i.entry.iter().filter(|&&e| e).count())
        .unwrap_or(0);
    previous.distance < 4.0 * MAX_COLLAPSE_DISTANCE && open_entries <= 1
}

/// Whether `step` may fold into a neighbor, one-step lookahead.
fn collapsable(step: &RouteStep, next: &RouteStep) -> bool {
    let is_short = step.distance < MAX_COLLAPSE_DISTANCE;
    if is_short && is_collapsable_instruction(step.maneuver.instruction) {
        return true;
    }
    let is_use_lane = step.maneuver.instruction.turn_type == TurnType::UseLane;
    let lanes_dont_change = step
        .intersections
        .first()
        .map(|i| i.lanes)
        .eq(&next.intersections.first().map(|i| i.lanes));
    is_short && is_use_lane && lanes_dont_change
}

/// Length of the stretch sharing the name at `at`, walking forward until
/// the next noticeable change.
fn name_segment_length(at: usize, steps: &[RouteStep]) -> f64 {
    let mut result = steps[at].distance;
    let mut i = at;
    while i + 1 < steps.len() && !is_noticeable_name_change(&steps[i], &steps[i + 1]) {
        i += 1;
        result += steps[i].distance;
    }
    result
}

fn in_bearing(step: &RouteStep) -> f64 {
    let intersection = &step.intersections[0];
    if intersection.in_index == NO_INDEX {
        return f64::from(step.maneuver.bearing_before);
    }
    f64::from(intersection.bearings[intersection.in_index])
}

fn out_bearing(step: &RouteStep) -> f64 {
    let intersection = &step.intersections[0];
    if intersection.out_index == NO_INDEX {
        return f64::from(step.maneuver.bearing_after);
    }
    f64::from(intersection.bearings[intersection.out_index])
}

/// Nearly perfectly reversed bearings differ by ~180 degrees.
fn bearings_are_reversed(bearing_in: f64, bearing_out: f64) -> bool {
    let left_turn_angle = if (0.0..=bearing_in).contains(&bearing_out) {
        bearing_in - bearing_out
    } else {
        bearing_in + 360.0 - bearing_out
    };
    geo::angular_deviation(left_turn_angle, 180.0) <= 35.0
}

/// Append or prepend `by_step` onto `step` depending on which is
/// geometrically earlier, merging durations, distances and intersections.
pub fn elongate(mut step: RouteStep, by_step: &RouteStep) -> RouteStep {
    step.duration += by_step.duration;
    step.distance += by_step.distance;
    debug_assert!(step.mode == by_step.mode);

    if step.geometry_end == by_step.geometry_begin + 1 {
        // by_step comes after: append, the maneuver stays put
        step.geometry_end = by_step.geometry_end;
        step.intersections.extend(by_step.intersections.iter().cloned());
    } else {
        // by_step comes before: the maneuver location moves
        debug_assert!(by_step.geometry_end == step.geometry_begin + 1);
        step.geometry_begin = by_step.geometry_begin;
        step.maneuver = by_step.maneuver.clone();
        let mut merged = by_step.intersections.clone();
        merged.extend(step.intersections);
        step.intersections = merged;
    }
    step
}

/// Merge a silent roundabout step into its predecessor: sums the data and
/// keeps the exit counter of the consumed step.
fn forward_into(mut destination: RouteStep, source: &RouteStep) -> RouteStep {
    destination.duration += source.duration;
    destination.distance += source.distance;
    destination.maneuver.exit = source.maneuver.exit;
    if destination.geometry_begin < source.geometry_begin {
        destination
            .intersections
            .extend(source.intersections.iter().cloned());
    } else {
        let mut merged = source.intersections.clone();
        merged.extend(destination.intersections);
        destination.intersections = merged;
    }
    destination.geometry_begin = destination.geometry_begin.min(source.geometry_begin);
    destination.geometry_end = destination.geometry_end.max(source.geometry_end);
    destination
}

/// Drop every invalidated step. The two waypoint sentinels always stay.
pub fn remove_no_turn_instructions(mut steps: Vec<RouteStep>) -> Vec<RouteStep> {
    steps.retain(|step| !step.is_invalid());
    debug_assert!(steps.len() >= 2);
    steps
}

// ---------------------------------------------------------------------
// roundabout accumulation
// ---------------------------------------------------------------------

/// Normalize combined enter/exit types and seed the exit counter.
/// Returns false when the instruction enters and leaves in one go.
fn set_up_roundabout(step: &mut RouteStep) -> bool {
    let instruction = step.maneuver.instruction;
    if matches!(
        instruction.turn_type,
        TurnType::EnterRotaryAtExit
            | TurnType::EnterRoundaboutAtExit
            | TurnType::EnterRoundaboutIntersectionAtExit
    ) {
        step.maneuver.exit = 1;
        step.maneuver.instruction.turn_type = match instruction.turn_type {
            TurnType::EnterRotaryAtExit => TurnType::EnterRotary,
            TurnType::EnterRoundaboutAtExit => TurnType::EnterRoundabout,
            _ => TurnType::EnterRoundaboutIntersection,
        };
    }

    if instruction.leaves_roundabout() {
        step.maneuver.exit = 1;
        step.maneuver.instruction.turn_type = match instruction.turn_type {
            TurnType::EnterAndExitRotary => TurnType::EnterRotary,
            TurnType::EnterAndExitRoundabout => TurnType::EnterRoundabout,
            _ => TurnType::EnterRoundaboutIntersection,
        };
        false
    } else {
        true
    }
}

/// Propagate the collected exit count back onto the entering step and
/// blank out the silent traversal steps.
fn close_off_roundabout(on_roundabout: bool, steps: &mut [RouteStep], step_index: usize) {
    steps[step_index].maneuver.exit += 1;

    if !on_roundabout {
        // the leg started on the roundabout: synthesize the enter at the
        // step right after depart
        debug_assert!(step_index >= 1);
        steps[0].geometry_end = 1;
        steps[1].geometry_begin = 0;
        steps[1] = forward_into(steps[1].clone(), &steps[0]);
        steps[1].intersections.remove(0);
        if steps[1].maneuver.instruction.leaves_roundabout() {
            steps[1].maneuver.exit = 1;
        }
        steps[0].duration = 0.0;
        steps[0].distance = 0.0;
        let exit_type = steps[step_index].maneuver.instruction.turn_type;
        steps[1].maneuver.instruction.turn_type = match exit_type {
            TurnType::ExitRotary => TurnType::EnterRotary,
            _ => TurnType::EnterRoundabout,
        };
        if steps[1].maneuver.instruction.turn_type == TurnType::EnterRotary {
            steps[1].rotary_name = steps[0].name.clone();
            steps[1].rotary_pronunciation = steps[0].pronunciation.clone();
        }
    }

    if step_index > 1 {
        let exit_step = steps[step_index].clone();
        let exit_intersection = &exit_step.intersections[0];
        let exit_bearing = if exit_intersection.out_index != NO_INDEX {
            f64::from(exit_intersection.bearings[exit_intersection.out_index])
        } else {
            f64::from(exit_step.maneuver.bearing_after)
        };

        for propagation_index in (1..step_index).rev() {
            steps[propagation_index] =
                forward_into(steps[propagation_index].clone(), &steps[propagation_index + 1]);

            if steps[propagation_index].maneuver.instruction.enters_roundabout() {
                let entry_step = steps[propagation_index].clone();
                let entry_intersection = &entry_step.intersections[0];

                let turn_type = entry_step.maneuver.instruction.turn_type;
                if matches!(turn_type, TurnType::EnterRotary | TurnType::EnterRotaryAtExit) {
                    steps[propagation_index].rotary_name = entry_step.name.clone();
                    steps[propagation_index].rotary_pronunciation =
                        entry_step.pronunciation.clone();
                } else if matches!(
                    turn_type,
                    TurnType::EnterRoundaboutIntersection
                        | TurnType::EnterRoundaboutIntersectionAtExit
                ) && entry_intersection.in_index != NO_INDEX
                {
                    let entry_bearing =
                        f64::from(entry_intersection.bearings[entry_intersection.in_index]);
                    let angle = geo::turn_angle(geo::reverse_bearing(entry_bearing), exit_bearing);
                    steps[propagation_index].maneuver.instruction.modifier =
                        angle_to_modifier(angle);
                }

                forward_signage(&mut steps[propagation_index], &exit_step);
                invalidate(&mut steps[propagation_index + 1]);
                break;
            }
            invalidate(&mut steps[propagation_index + 1]);
        }
    }
}

/// A trip ending on the roundabout never sees the exit; clear the counter
/// and rewrite the enter type so nothing dangles.
fn fix_final_roundabout(steps: &mut [RouteStep]) {
    for propagation_index in (1..steps.len()).rev() {
        if steps[propagation_index]
            .maneuver
            .instruction
            .enters_roundabout()
        {
            steps[propagation_index].maneuver.exit = 0;
            let turn_type = steps[propagation_index].maneuver.instruction.turn_type;
            if matches!(turn_type, TurnType::EnterRotary | TurnType::EnterRotaryAtExit) {
                steps[propagation_index].rotary_name = steps[propagation_index].name.clone();
                steps[propagation_index].rotary_pronunciation =
                    steps[propagation_index].pronunciation.clone();
            } else if matches!(
                turn_type,
                TurnType::EnterRoundaboutIntersection
                    | TurnType::EnterRoundaboutIntersectionAtExit
            ) {
                steps[propagation_index].maneuver.instruction.turn_type =
                    TurnType::EnterRoundabout;
            }
            return;
        } else if steps[propagation_index].maneuver.instruction.stays_on_roundabout() {
            steps[propagation_index - 1] = forward_into(
                steps[propagation_index - 1].clone(),
                &steps[propagation_index],
            );
            invalidate(&mut steps[propagation_index]);
        }
    }
}

/// Forward scan counting exits; silent roundabout steps dissolve into the
/// entering instruction.
pub fn process_roundabouts(mut steps: Vec<RouteStep>) -> Vec<RouteStep> {
    if steps.len() <= 2 {
        return steps;
    }

    let mut on_roundabout = false;
    let mut has_entered = false;
    let mut last_enter_index = 0usize;

    // exit counters chain through roundabout steps but never onto the
    // waypoint sentinels
    let propagates = |step: &RouteStep| step.maneuver.waypoint_type == WaypointType::None;

    for step_index in 0..steps.len() {
        let instruction = steps[step_index].maneuver.instruction;
        if instruction.enters_roundabout() {
            has_entered = set_up_roundabout(&mut steps[step_index]);
            last_enter_index = step_index;
            if has_entered
                && step_index + 1 < steps.len()
                && propagates(&steps[step_index + 1])
            {
                steps[step_index + 1].maneuver.exit = steps[step_index].maneuver.exit;
            }
        } else if instruction.stays_on_roundabout() {
            on_roundabout = true;
            steps[step_index].maneuver.exit += 1;
            if step_index + 1 < steps.len() && propagates(&steps[step_index + 1]) {
                steps[step_index + 1].maneuver.exit = steps[step_index].maneuver.exit;
            }
        } else if instruction.leaves_roundabout() {
            close_off_roundabout(has_entered, &mut steps, step_index);
            has_entered = false;
            on_roundabout = false;
        } else if on_roundabout
            && step_index + 1 < steps.len()
            && propagates(&steps[step_index + 1])
        {
            steps[step_index + 1].maneuver.exit = steps[step_index].maneuver.exit;
        }
    }

    // an enter whose exits were already accumulated is a closed-off
    // roundabout from an earlier pass, not an unterminated one
    if on_roundabout
        || (has_entered && steps[last_enter_index].maneuver.exit == 0)
    {
        fix_final_roundabout(&mut steps);
    }

    remove_no_turn_instructions(steps)
}

// ---------------------------------------------------------------------
// collapsing
// ---------------------------------------------------------------------

/// Previous step that still carries an instruction.
fn previous_index(steps: &[RouteStep], mut index: usize) -> usize {
    debug_assert!(index > 0 && index < steps.len());
    index -= 1;
    while index > 0 && steps[index].maneuver.instruction.turn_type == TurnType::NoTurn {
        index -= 1;
    }
    index
}

/// Previous step that still carries a road name.
fn previous_name_index(steps: &[RouteStep], mut index: usize) -> usize {
    debug_assert!(index > 0 && index < steps.len());
    index -= 1;
    while index > 0 && steps[index].name_id == crate::graph::INVALID_NAME_ID {
        index -= 1;
    }
    index
}

/// A run is fully collapsible if it is nothing but name changes and
/// suppressed straights of compatible mode.
fn can_collapse_all(steps: &[RouteStep], mut index: usize, end_index: usize) -> bool {
    while index < end_index {
        if !matches!(
            steps[index].maneuver.instruction.turn_type,
            TurnType::Suppressed | TurnType::NewName
        ) {
            return false;
        }
        if index + 1 < end_index && !compatible(&steps[index], &steps[index + 1]) {
            return false;
        }
        index += 1;
    }
    true
}

/// The workhorse for neighboring-step folds.
fn collapse_turn_at(
    steps: &mut Vec<RouteStep>,
    two_back_index: usize,
    one_back_index: usize,
    step_index: usize,
) {
    let current_step = steps[step_index].clone();
    let one_back_step = steps[one_back_index].clone();

    if !has_maneuver(&one_back_step, &current_step) {
        return;
    }

    // very short new name or choiceless continuation
    if (collapsable(&one_back_step, &current_step)
        || (is_collapsable_instruction(one_back_step.maneuver.instruction)
            && choiceless(&current_step, &one_back_step)))
        && one_back_step.maneuver.instruction.turn_type != TurnType::Merge
    {
        if compatible(&one_back_step, &steps[two_back_index]) {
            let current_type = current_step.maneuver.instruction.turn_type;
            let current_modifier = current_step.maneuver.instruction.modifier;
            let back_bearing_count = one_back_step.intersections[0].bearings.len();
            if current_type == TurnType::Continue
                || (current_type == TurnType::Suppressed
                    && current_modifier != DirectionModifier::Straight)
            {
                steps[step_index].maneuver.instruction.turn_type = TurnType::Turn;
            } else if current_type == TurnType::Merge {
                steps[step_index].maneuver.instruction.modifier = current_modifier.mirror();
                steps[step_index].maneuver.instruction.turn_type = TurnType::Turn;
            } else if matches!(current_type, TurnType::NewName | TurnType::UseLane)
                && current_modifier != DirectionModifier::Straight
                && back_bearing_count > 2
            {
                steps[step_index].maneuver.instruction.turn_type = TurnType::Turn;
            }
            steps[two_back_index] = elongate(steps[two_back_index].clone(), &one_back_step);
            invalidate(&mut steps[one_back_index]);
        }
    }
    // very short segment after a turn
    else if one_back_step.distance <= MAX_COLLAPSE_DISTANCE
        && is_collapsable_instruction(current_step.maneuver.instruction)
    {
        if compatible(&one_back_step, &current_step) {
            steps[one_back_index] = elongate(steps[one_back_index].clone(), &current_step);

            let one_back_type = one_back_step.maneuver.instruction.turn_type;
            if matches!(one_back_type, TurnType::Continue | TurnType::Suppressed)
                && is_noticeable_name_change(&steps[two_back_index], &current_step)
            {
                steps[one_back_index].maneuver.instruction.turn_type = TurnType::Turn;
            } else if one_back_type == TurnType::Turn
                && !is_noticeable_name_change(&steps[two_back_index], &current_step)
            {
                steps[one_back_index].maneuver.instruction.turn_type = TurnType::Continue;
                // merging back onto the same street is a u-turn
                if bearings_are_reversed(
                    geo::reverse_bearing(in_bearing(&one_back_step)),
                    out_bearing(&current_step),
                ) {
                    steps[one_back_index].maneuver.instruction.modifier =
                        DirectionModifier::UTurn;
                }
            } else if one_back_type == TurnType::Merge
                && current_step.maneuver.instruction.turn_type != TurnType::Suppressed
            {
                steps[one_back_index].maneuver.instruction.modifier =
                    one_back_step.maneuver.instruction.modifier.mirror();
            }
            forward_signage(&mut steps[one_back_index], &current_step);
            invalidate(&mut steps[step_index]);
        }
    }
    // potential u-turn
    else if (one_back_step.distance <= MAX_COLLAPSE_DISTANCE
        || choiceless(&current_step, &one_back_step))
        && bearings_are_reversed(
            geo::reverse_bearing(in_bearing(&one_back_step)),
            out_bearing(&current_step),
        )
        && compatible(&one_back_step, &current_step)
    {
        let direct_u_turn = !is_noticeable_name_change(&steps[two_back_index], &current_step);

        let next_step_index = step_index + 1;
        let continues_with_name_change = next_step_index < steps.len()
            && (steps[next_step_index].maneuver.instruction.turn_type == TurnType::UseLane
                || is_collapsable_instruction(steps[next_step_index].maneuver.instruction));
        let u_turn_with_name_change = continues_with_name_change
            && !is_noticeable_name_change(&steps[two_back_index], &steps[next_step_index]);

        if direct_u_turn || u_turn_with_name_change {
            steps[one_back_index] = elongate(steps[one_back_index].clone(), &steps[step_index]);
            invalidate(&mut steps[step_index]);
            if u_turn_with_name_change
                && compatible(&steps[one_back_index], &steps[next_step_index])
            {
                steps[one_back_index] =
                    elongate(steps[one_back_index].clone(), &steps[next_step_index]);
                invalidate(&mut steps[next_step_index]);
                let two_back = steps[two_back_index].clone();
                forward_signage(&mut steps[one_back_index], &two_back);
            }
            if direct_u_turn {
                let two_back = steps[two_back_index].clone();
                forward_signage(&mut steps[one_back_index], &two_back);
            }
            steps[one_back_index].maneuver.instruction.turn_type = TurnType::Continue;
            steps[one_back_index].maneuver.instruction.modifier = DirectionModifier::UTurn;
        }
    }
}

/// Staggered intersections are short zig-zags (left-right or right-left,
/// each near 90 degrees) that work like one straight crossing.
fn is_staggered_intersection(previous: &RouteStep, current: &RouteStep) -> bool {
    let angle_of = |step: &RouteStep| geo::turn_angle(in_bearing(step), out_bearing(step));
    let is_right = |angle: f64| angle > 45.0 && angle < 135.0;
    let is_left = |angle: f64| angle > 225.0 && angle < 315.0;

    let previous_angle = angle_of(previous);
    let current_angle = angle_of(current);
    let left_right = is_left(previous_angle) && is_right(current_angle);
    let right_left = is_right(previous_angle) && is_left(current_angle);

    previous.distance < MAX_STAGGERED_DISTANCE && (left_right || right_left)
}

/// Collapse unnecessary sets of combined instructions into single ones.
pub fn collapse_turns(mut steps: Vec<RouteStep>) -> Vec<RouteStep> {
    if steps.len() <= 2 {
        return steps;
    }

    for step_index in 1..steps.len() - 1 {
        let current_step = steps[step_index].clone();
        let next_step_index = step_index + 1;
        if current_step.maneuver.instruction.turn_type == TurnType::NoTurn {
            continue;
        }
        let one_back_index = previous_index(&steps, step_index);
        let one_back_step = steps[one_back_index].clone();

        if !has_maneuver(&one_back_step, &current_step) {
            continue;
        }

        let is_basic_name_change = |step: &RouteStep| {
            step.intersections.len() == 1
                && step.intersections[0].bearings.len() == 2
                && step.maneuver.instruction.modifier == DirectionModifier::Straight
        };

        if one_back_step.maneuver.instruction.turn_type == TurnType::Sliproad {
            // sliproads from motorways in urban areas
            if current_step.maneuver.instruction.turn_type == TurnType::Suppressed
                && compatible(&one_back_step, &current_step)
            {
                // traffic light on the sliproad itself
                steps[one_back_index] = elongate(steps[one_back_index].clone(), &current_step);
                invalidate(&mut steps[step_index]);
            } else if compatible(&one_back_step, &current_step) {
                // same name before and after means a u-turn-ish sliproad
                let before_sliproad_index = previous_index(&steps, one_back_index);
                if !is_noticeable_name_change(&steps[before_sliproad_index], &current_step) {
                    steps[one_back_index].maneuver.instruction.turn_type = TurnType::Continue;
                } else {
                    steps[one_back_index].maneuver.instruction.turn_type = TurnType::Turn;
                }
                steps[one_back_index] = elongate(steps[one_back_index].clone(), &current_step);
                forward_signage(&mut steps[one_back_index], &current_step);
                // the lanes for this turn sit on the sliproad itself
                steps[one_back_index].intersections[0].lanes =
                    current_step.intersections[0].lanes;
                steps[one_back_index].intersections[0].lane_description =
                    current_step.intersections[0].lane_description.clone();

                let exit_bearing = out_bearing(&current_step);
                let entry_bearing = in_bearing(&steps[one_back_index]);
                let angle = geo::turn_angle(geo::reverse_bearing(entry_bearing), exit_bearing);
                steps[one_back_index].maneuver.instruction.modifier = angle_to_modifier(angle);
                invalidate(&mut steps[step_index]);
            } else {
                steps[one_back_index].maneuver.instruction.turn_type = TurnType::Turn;
            }
        } else if is_collapsable_instruction(current_step.maneuver.instruction)
            && current_step.maneuver.instruction.turn_type != TurnType::Suppressed
            && !is_noticeable_name_change(
                &steps[previous_name_index(&steps, step_index)],
                &current_step,
            )
            && can_collapse_all(
                &steps,
                previous_name_index(&steps, step_index) + 1,
                next_step_index,
            )
        {
            // empty segments produce A -> A name changes
            let last_name_index = previous_name_index(&steps, step_index);
            for index in last_name_index + 1..=step_index {
                steps[last_name_index] = elongate(steps[last_name_index].clone(), &steps[index]);
                invalidate(&mut steps[index]);
            }
        } else if one_back_index > 0
            && compatible(&current_step, &one_back_step)
            && ((is_collapsable_instruction(current_step.maneuver.instruction)
                && is_collapsable_instruction(one_back_step.maneuver.instruction))
                || is_staggered_intersection(&one_back_step, &current_step))
        {
            let two_back_index = previous_index(&steps, one_back_index);
            if !is_noticeable_name_change(&steps[two_back_index], &current_step) {
                // name oscillation A -> B -> A
                if compatible(&one_back_step, &steps[two_back_index]) {
                    let merged = elongate(
                        elongate(steps[two_back_index].clone(), &steps[one_back_index]),
                        &steps[step_index],
                    );
                    steps[two_back_index] = merged;
                    invalidate(&mut steps[one_back_index]);
                    invalidate(&mut steps[step_index]);
                }
            } else if name_segment_length(one_back_index, &steps) < NAME_SEGMENT_CUTOFF_LENGTH
                && is_basic_name_change(&one_back_step)
                && is_basic_name_change(&current_step)
            {
                // short noise names on a through-street
                if compatible(&steps[two_back_index], &one_back_step) {
                    steps[two_back_index] =
                        elongate(steps[two_back_index].clone(), &steps[one_back_index]);
                    invalidate(&mut steps[one_back_index]);
                    if name_segment_length(step_index, &steps) < NAME_SEGMENT_CUTOFF_LENGTH {
                        steps[two_back_index] =
                            elongate(steps[two_back_index].clone(), &steps[step_index]);
                        invalidate(&mut steps[step_index]);
                    }
                }
            } else if step_index + 2 < steps.len()
                && current_step.maneuver.instruction.turn_type == TurnType::NewName
                && steps[next_step_index].maneuver.instruction.turn_type == TurnType::NewName
                && !is_noticeable_name_change(&one_back_step, &steps[next_step_index])
            {
                // crossing a bridge-like stub straight into a name change
                if compatible(&steps[step_index], &steps[next_step_index]) {
                    let tail = elongate(steps[step_index].clone(), &steps[next_step_index]);
                    steps[one_back_index] = elongate(steps[one_back_index].clone(), &tail);
                    invalidate(&mut steps[step_index]);
                    invalidate(&mut steps[next_step_index]);
                }
            } else if choiceless(&current_step, &one_back_step)
                || one_back_step.distance <= MAX_COLLAPSE_DISTANCE
            {
                collapse_turn_at(&mut steps, two_back_index, one_back_index, step_index);
            }
        } else if one_back_index > 0
            && (one_back_step.distance <= MAX_COLLAPSE_DISTANCE
                || choiceless(&current_step, &one_back_step))
        {
            let two_back_index = previous_index(&steps, one_back_index);
            collapse_turn_at(&mut steps, two_back_index, one_back_index, step_index);
        }
    }

    // a final sliproad has nothing left to merge into; announce a turn
    if steps.len() >= 3 {
        let last_turn_index = previous_index(&steps, steps.len() - 1);
        if steps[last_turn_index].maneuver.instruction.turn_type == TurnType::Sliproad {
            steps[last_turn_index].maneuver.instruction.turn_type = TurnType::Turn;
        }
    }

    remove_no_turn_instructions(steps)
}

// ---------------------------------------------------------------------
// lane cleanup
// ---------------------------------------------------------------------

/// A UseLane step flanked only by through/none lanes tells the driver
/// nothing; elongate it into its predecessor.
pub fn collapse_use_lane(mut steps: Vec<RouteStep>) -> Vec<RouteStep> {
    use crate::formats::lanes_file::lane_mask;

    let uninformative = |step: &RouteStep| -> bool {
        let intersection = &step.intersections[0];
        let lanes = intersection.lanes;
        let description = &intersection.lane_description;
        let boring = lane_mask::STRAIGHT | lane_mask::NONE;

        // description is left to right, lanes count from the right
        if lanes.first_lane_from_right > 0 {
            let right_of_turn = description
                .iter()
                .rev()
                .nth(lanes.first_lane_from_right as usize - 1);
            if let Some(&mask) = right_of_turn {
                if mask & boring != 0 {
                    return false;
                }
            }
        }
        let lane_to_the_left = (lanes.first_lane_from_right + lanes.lanes_in_turn) as usize;
        if lane_to_the_left < description.len() {
            if let Some(&mask) = description.iter().rev().nth(lane_to_the_left) {
                if mask & boring != 0 {
                    return false;
                }
            }
        }
        true
    };

    for step_index in 1..steps.len() {
        let step = &steps[step_index];
        if step.maneuver.instruction.turn_type == TurnType::UseLane && uninformative(step) {
            let previous = previous_index(&steps, step_index);
            steps[previous] = elongate(steps[previous].clone(), &steps[step_index]);
            invalidate(&mut steps[step_index]);
        }
    }

    remove_no_turn_instructions(steps)
}

// ---------------------------------------------------------------------
// intersection building
// ---------------------------------------------------------------------

/// Absorb suppressed steps as passed-through intersections of the last
/// announced step; demote EndOfRoad where nothing was passed in between.
pub fn build_intersections(mut steps: Vec<RouteStep>) -> Vec<RouteStep> {
    let mut last_valid_instruction = 0usize;
    for step_index in 0..steps.len() {
        let instruction = steps[step_index].maneuver.instruction;
        if instruction.turn_type == TurnType::Suppressed {
            let absorbed = steps[step_index].clone();
            steps[last_valid_instruction] =
                elongate(steps[last_valid_instruction].clone(), &absorbed);
            steps[step_index].maneuver.instruction = NO_TURN;
        } else if !instruction.is_silent() || steps[step_index].maneuver.waypoint_type != WaypointType::None
        {
            if instruction.turn_type == TurnType::EndOfRoad {
                debug_assert!(step_index > 0);
                if steps[last_valid_instruction].intersections.len()
                    < MIN_END_OF_ROAD_INTERSECTIONS
                {
                    steps[step_index].maneuver.instruction.turn_type = TurnType::Turn;
                }
            }
            last_valid_instruction = step_index;
        }
    }
    remove_no_turn_instructions(steps)
}

// ---------------------------------------------------------------------
// end trimming
// ---------------------------------------------------------------------

/// Snapping onto a junction can leave a spurious sub-meter first or last
/// segment; delete it and promote the neighbor to the waypoint sentinel.
pub fn trim_short_segments(steps: &mut Vec<RouteStep>, geometry: &mut LegGeometry) {
    if steps.len() < 2 || geometry.locations.len() <= 2 {
        return;
    }

    let zero_length_step = steps[0].distance <= 1.0 && steps.len() > 2;
    let duplicated_coordinate =
        geo::haversine_m(geometry.locations[0], geometry.locations[1]) <= 1.0;

    if zero_length_step || duplicated_coordinate {
        geometry.segment_distances.remove(0);
        let offset = if zero_length_step {
            steps[1].geometry_begin
        } else {
            1
        };
        if offset > 0 {
            geometry.locations.drain(..offset);
            geometry.osm_node_ids.drain(..offset);
            geometry.annotations.drain(..offset.min(geometry.annotations.len()));
        }

        if zero_length_step {
            // promote the second step to depart
            let initial_duration = steps[0].duration;
            {
                let depart = &mut steps[1];
                depart.duration += initial_duration;
                depart.maneuver.waypoint_type = WaypointType::Depart;
                depart.maneuver.bearing_before = 0;
                depart.maneuver.instruction = NO_TURN;
                let intersection = &mut depart.intersections[0];
                intersection.lanes = Default::default();
                intersection.lane_description.clear();
                let out_bearing = intersection.bearings[intersection.out_index.min(
                    intersection.bearings.len() - 1,
                )];
                intersection.bearings = vec![out_bearing];
                intersection.entry = vec![true];
                intersection.in_index = NO_INDEX;
                intersection.out_index = 0;
            }
            steps.remove(0);
        } else {
            steps[0].geometry_begin = 1;
        }

        for step in steps.iter_mut() {
            step.geometry_begin = step.geometry_begin.saturating_sub(offset);
            step.geometry_end = step.geometry_end.saturating_sub(offset);
        }

        let first_begin = steps[0].geometry_begin;
        if first_begin + 1 < geometry.locations.len() {
            let bearing = geo::bearing_deg(
                geometry.locations[first_begin],
                geometry.locations[first_begin + 1],
            )
            .round();
            steps[0].maneuver.bearing_after = bearing as u16 % 360;
            steps[0].intersections[0].bearings[0] = bearing as i16;
        }
    }

    if steps.len() < 2 || geometry.locations.len() == 2 {
        return;
    }

    let next_to_last = steps.len() - 2;
    if steps[next_to_last].distance <= 1.0 && steps.len() > 2 {
        // drop the trailing micro-step; its start becomes the arrival
        geometry.segment_offsets.pop();
        let keep = geometry.segment_offsets.last().copied().unwrap_or(0) + 1;
        geometry.locations.truncate(keep);
        geometry.osm_node_ids.truncate(keep);
        geometry.annotations.truncate(keep.saturating_sub(1));
        geometry.segment_distances.pop();

        steps.pop();
        let last = steps.len() - 1;
        steps[last].maneuver.waypoint_type = WaypointType::Arrive;
        steps[last].maneuver.instruction = NO_TURN;
        steps[last].maneuver.bearing_after = 0;
        steps[last].distance = 0.0;
        steps[last].duration = 0.0;
        steps[last].geometry_end = steps[last].geometry_begin + 1;
        {
            let intersection = &mut steps[last].intersections[0];
            intersection.lanes = Default::default();
            intersection.lane_description.clear();
            let in_bearing = intersection.bearings[intersection.in_index.min(
                intersection.bearings.len() - 1,
            )];
            intersection.bearings = vec![in_bearing];
            intersection.entry = vec![true];
            intersection.out_index = NO_INDEX;
            intersection.in_index = 0;
        }
        steps[last].intersections.truncate(1);
        // the arrival stays on the road of the new predecessor
        let predecessor = steps[last - 1].clone();
        forward_signage(&mut steps[last], &predecessor);
        steps[last].mode = predecessor.mode;
    } else if geometry.locations.len() >= 2
        && geo::haversine_m(
            geometry.locations[geometry.locations.len() - 2],
            geometry.locations[geometry.locations.len() - 1],
        ) <= 1.0
    {
        // correct steps but a duplicated coordinate at the very end
        geometry.locations.pop();
        geometry.osm_node_ids.pop();
        if !geometry.annotations.is_empty() {
            geometry.annotations.pop();
        }
        if let Some(last_offset) = geometry.segment_offsets.last_mut() {
            *last_offset = last_offset.saturating_sub(1);
        }
        let last = steps.len() - 1;
        steps[last - 1].geometry_end = steps[last - 1].geometry_end.saturating_sub(1);
        steps[last].geometry_begin = steps[last].geometry_begin.saturating_sub(1);
        steps[last].geometry_end = steps[last].geometry_end.saturating_sub(1);
        if steps[last].geometry_begin >= 1 {
            let bearing = geo::bearing_deg(
                geometry.locations[steps[last].geometry_begin - 1],
                geometry.locations[steps[last].geometry_begin],
            )
            .round();
            steps[last].maneuver.bearing_before = bearing as u16 % 360;
            steps[last].intersections[0].bearings[0] =
                geo::reverse_bearing(bearing) as i16;
        }
    }
}

// ---------------------------------------------------------------------
// relative locations
// ---------------------------------------------------------------------

/// Point depart/arrive modifiers at the side of the road the input was
/// on; outside the sensible window the modifier degrades to u-turn.
pub fn assign_relative_locations(
    mut steps: Vec<RouteStep>,
    geometry: &LegGeometry,
    source: &PhantomEndpoint,
    target: &PhantomEndpoint,
) -> Vec<RouteStep> {
    debug_assert!(steps.len() >= 2);
    debug_assert!(geometry.locations.len() >= 2);

    let distance_to_start = geo::haversine_m(source.input_location, geometry.locations[0]);
    let initial_modifier = if (MIN_RELATIVE_DISTANCE..=MAX_RELATIVE_DISTANCE)
        .contains(&distance_to_start)
    {
        angle_to_modifier(geo::compute_angle(
            source.input_location,
            geometry.locations[0],
            geometry.locations[1],
        ))
    } else {
        DirectionModifier::UTurn
    };
    steps[0].maneuver.instruction.modifier = initial_modifier;

    let n = geometry.locations.len();
    let distance_from_end = geo::haversine_m(target.input_location, geometry.locations[n - 1]);
    let final_modifier = if (MIN_RELATIVE_DISTANCE..=MAX_RELATIVE_DISTANCE)
        .contains(&distance_from_end)
    {
        angle_to_modifier(geo::compute_angle(
            geometry.locations[n - 2],
            geometry.locations[n - 1],
            target.input_location,
        ))
    } else {
        DirectionModifier::UTurn
    };
    let last = steps.len() - 1;
    steps[last].maneuver.instruction.modifier = final_modifier;

    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::annotations_file::TravelMode;
    use crate::geo::Coordinate;
    use crate::guidance::step::{Intersection, StepManeuver};

    fn total_length(steps: &[RouteStep]) -> f64 {
        steps.iter().map(|s| s.distance).sum()
    }

    fn step(
        instruction: TurnInstruction,
        name: &str,
        distance: f64,
        begin: usize,
        end: usize,
    ) -> RouteStep {
        RouteStep {
            name_id: 0,
            name: name.to_string(),
            road_ref: String::new(),
            pronunciation: String::new(),
            destinations: String::new(),
            rotary_name: String::new(),
            rotary_pronunciation: String::new(),
            duration: distance / 10.0,
            distance,
            mode: TravelMode::DRIVING,
            maneuver: StepManeuver {
                location: Coordinate::new(0, 0),
                bearing_before: 0,
                bearing_after: 0,
                instruction,
                waypoint_type: WaypointType::None,
                exit: 0,
            },
            geometry_begin: begin,
            geometry_end: end,
            intersections: vec![Intersection {
                location: Coordinate::new(0, 0),
                bearings: vec![0, 180],
                entry: vec![true, true],
                in_index: 0,
                out_index: 1,
                lanes: Default::default(),
                lane_description: Vec::new(),
            }],
        }
    }

    fn waypoint(kind: WaypointType, begin: usize, end: usize) -> RouteStep {
        let mut s = step(NO_TURN, "", 0.0, begin, end);
        s.maneuver.waypoint_type = kind;
        s.intersections[0] = Intersection {
            location: Coordinate::new(0, 0),
            bearings: vec![0],
            entry: vec![true],
            in_index: if kind == WaypointType::Arrive { 0 } else { NO_INDEX },
            out_index: if kind == WaypointType::Arrive { NO_INDEX } else { 0 },
            lanes: Default::default(),
            lane_description: Vec::new(),
        };
        s
    }

    fn instruction(turn_type: TurnType, modifier: DirectionModifier) -> TurnInstruction {
        TurnInstruction::new(turn_type, modifier)
    }

    /// depart, enter roundabout, two stays, exit, arrive
    fn roundabout_steps() -> Vec<RouteStep> {
        vec![
            waypoint(WaypointType::Depart, 0, 2),
            step(
                instruction(TurnType::EnterRoundabout, DirectionModifier::Right),
                "Roundabout",
                20.0,
                1,
                3,
            ),
            step(
                instruction(TurnType::StayOnRoundabout, DirectionModifier::Straight),
                "Roundabout",
                15.0,
                2,
                4,
            ),
            step(
                instruction(TurnType::StayOnRoundabout, DirectionModifier::Straight),
                "Roundabout",
                15.0,
                3,
                5,
            ),
            step(
                instruction(TurnType::ExitRoundabout, DirectionModifier::Right),
                "East Street",
                30.0,
                4,
                6,
            ),
            waypoint(WaypointType::Arrive, 5, 6),
        ]
    }

    #[test]
    fn roundabout_exits_accumulate_onto_the_enter() {
        let steps = process_roundabouts(roundabout_steps());
        // depart, enter (with exit count), arrive-side step, arrive
        let enter = steps
            .iter()
            .find(|s| s.maneuver.instruction.enters_roundabout())
            .expect("enter survives");
        assert_eq!(enter.maneuver.exit, 3);
        assert!(steps
            .iter()
            .all(|s| !s.maneuver.instruction.stays_on_roundabout()));
        // the exit carries the target street's name onto the enter step
        assert_eq!(enter.name, "East Street");
        // distances of the silent steps are folded in
        let total: f64 = steps.iter().map(|s| s.distance).sum();
        assert!((total - 80.0).abs() < 1e-9);
    }

    #[test]
    fn second_exit_counts_one_stay_plus_the_leave() {
        // entered from the south, left at the east: one silent traversal
        // step before the exit
        let steps = vec![
            waypoint(WaypointType::Depart, 0, 2),
            step(
                instruction(TurnType::EnterRoundabout, DirectionModifier::Right),
                "Roundabout",
                20.0,
                1,
                3,
            ),
            step(
                instruction(TurnType::StayOnRoundabout, DirectionModifier::Straight),
                "Roundabout",
                15.0,
                2,
                4,
            ),
            step(
                instruction(TurnType::ExitRoundabout, DirectionModifier::Right),
                "East Street",
                30.0,
                3,
                5,
            ),
            waypoint(WaypointType::Arrive, 4, 5),
        ];
        let steps = process_roundabouts(steps);
        let enter = steps
            .iter()
            .find(|s| s.maneuver.instruction.enters_roundabout())
            .expect("enter survives");
        assert_eq!(enter.maneuver.exit, 2);
        assert!(steps
            .iter()
            .all(|s| !s.maneuver.instruction.stays_on_roundabout()));
    }

    #[test]
    fn roundabout_processing_is_idempotent() {
        let once = process_roundabouts(roundabout_steps());
        let twice = process_roundabouts(once.clone());
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.maneuver.exit, b.maneuver.exit);
            assert_eq!(a.maneuver.instruction, b.maneuver.instruction);
            assert!((a.distance - b.distance).abs() < 1e-9);
        }
    }

    #[test]
    fn trip_ending_on_roundabout_clears_the_exit() {
        let mut steps = roundabout_steps();
        // cut the trace before the exit
        steps.truncate(4);
        steps.push(waypoint(WaypointType::Arrive, 4, 5));
        let steps = process_roundabouts(steps);
        let enter = steps
            .iter()
            .find(|s| s.maneuver.instruction.enters_roundabout())
            .expect("enter survives");
        assert_eq!(enter.maneuver.exit, 0);
    }

    #[test]
    fn short_new_name_collapses_into_predecessor() {
        let steps = vec![
            waypoint(WaypointType::Depart, 0, 2),
            step(
                instruction(TurnType::Turn, DirectionModifier::Right),
                "Main Street",
                200.0,
                1,
                3,
            ),
            step(
                instruction(TurnType::NewName, DirectionModifier::Straight),
                "Main Street North",
                10.0,
                2,
                4,
            ),
            step(
                instruction(TurnType::Turn, DirectionModifier::Left),
                "Side Road",
                50.0,
                3,
                5,
            ),
            waypoint(WaypointType::Arrive, 4, 5),
        ];
        let collapsed = collapse_turns(steps);
        // the 10 m name change disappears
        assert!(collapsed
            .iter()
            .all(|s| s.maneuver.instruction.turn_type != TurnType::NewName));
        assert_eq!(total_length(&collapsed), 260.0);
    }

    #[test]
    fn staggered_intersection_collapses_to_straight() {
        let mut right = step(
            instruction(TurnType::Turn, DirectionModifier::Right),
            "Main Street",
            2.0,
            1,
            3,
        );
        right.intersections[0].bearings = vec![90, 180, 270];
        right.intersections[0].entry = vec![true, true, true];
        right.intersections[0].in_index = 2; // came from the east, heading west
        right.intersections[0].out_index = 1; // turn south
        let mut left = step(
            instruction(TurnType::Turn, DirectionModifier::Left),
            "Main Street",
            40.0,
            2,
            4,
        );
        left.intersections[0].bearings = vec![0, 90, 270];
        left.intersections[0].entry = vec![true, true, true];
        left.intersections[0].in_index = 0; // heading south, the in-road points back north
        left.intersections[0].out_index = 1; // turn left, back east
        let steps = vec![
            waypoint(WaypointType::Depart, 0, 2),
            step(
                instruction(TurnType::Turn, DirectionModifier::Right),
                "Main Street",
                100.0,
                1,
                3,
            ),
            right,
            left,
            waypoint(WaypointType::Arrive, 4, 5),
        ];
        // there are five steps before, the zig-zag folds into one
        let collapsed = collapse_turns(steps);
        assert!(collapsed.len() < 5);
        assert_eq!(total_length(&collapsed), 142.0);
    }

    #[test]
    fn collapse_is_idempotent() {
        let steps = vec![
            waypoint(WaypointType::Depart, 0, 2),
            step(
                instruction(TurnType::Turn, DirectionModifier::Right),
                "Main Street",
                200.0,
                1,
                3,
            ),
            step(
                instruction(TurnType::NewName, DirectionModifier::Straight),
                "Main Street North",
                10.0,
                2,
                4,
            ),
            waypoint(WaypointType::Arrive, 3, 4),
        ];
        let once = collapse_turns(steps);
        let twice = collapse_turns(once.clone());
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.maneuver.instruction, b.maneuver.instruction);
            assert!((a.distance - b.distance).abs() < 1e-9);
        }
    }

    #[test]
    fn suppressed_steps_become_passed_intersections() {
        let steps = vec![
            waypoint(WaypointType::Depart, 0, 2),
            step(
                instruction(TurnType::Turn, DirectionModifier::Right),
                "Main Street",
                100.0,
                1,
                3,
            ),
            step(
                instruction(TurnType::Suppressed, DirectionModifier::Straight),
                "Main Street",
                60.0,
                2,
                4,
            ),
            step(
                instruction(TurnType::Turn, DirectionModifier::Left),
                "Side Road",
                50.0,
                3,
                5,
            ),
            waypoint(WaypointType::Arrive, 4, 5),
        ];
        let built = build_intersections(steps);
        assert_eq!(built.len(), 4);
        // the suppressed step's intersection is now passed through by the turn
        let turn = &built[1];
        assert_eq!(turn.intersections.len(), 2);
        assert!((turn.distance - 160.0).abs() < 1e-9);
    }

    #[test]
    fn end_of_road_needs_passed_intersections() {
        let steps = vec![
            waypoint(WaypointType::Depart, 0, 2),
            step(
                instruction(TurnType::EndOfRoad, DirectionModifier::Right),
                "Main Street",
                100.0,
                1,
                3,
            ),
            waypoint(WaypointType::Arrive, 2, 3),
        ];
        let built = build_intersections(steps);
        assert_eq!(built[1].maneuver.instruction.turn_type, TurnType::Turn);
    }

    #[test]
    fn use_lane_with_boring_flanks_disappears() {
        use crate::formats::lanes_file::{lane_mask, LaneTuple};
        let mut lane_step = step(
            instruction(TurnType::UseLane, DirectionModifier::Straight),
            "Main Street",
            80.0,
            2,
            4,
        );
        lane_step.intersections[0].lanes = LaneTuple {
            lanes_in_turn: 1,
            first_lane_from_right: 1,
            description_id: 0,
        };
        // turn lane in the middle, both flanks not straight/none
        lane_step.intersections[0].lane_description =
            vec![lane_mask::LEFT, lane_mask::STRAIGHT, lane_mask::RIGHT];
        let steps = vec![
            waypoint(WaypointType::Depart, 0, 2),
            step(
                instruction(TurnType::Turn, DirectionModifier::Right),
                "Main Street",
                100.0,
                1,
                3,
            ),
            lane_step,
            waypoint(WaypointType::Arrive, 3, 4),
        ];
        let collapsed = collapse_use_lane(steps);
        assert_eq!(collapsed.len(), 3);
        assert!((collapsed[1].distance - 180.0).abs() < 1e-9);
    }
}
