//! Sheet ledger: the rotating artifacts of a 6-3-5 session
//!
//! Sheets are identified by a stable index `0..n-1` where `n` is the
//! participant count at start. Sheet `s` was created by participant `s`
//! (join order) and is held at round `r` by participant
//! `(s + r - 1) mod n`. The holder function is pure; no per-round state
//! is kept.

use ideaforge_common::model::ROUND_COUNT;

/// Participant index holding sheet `sheet` during round `round`
pub fn holder_of(sheet: usize, round: u8, participant_count: usize) -> usize {
    debug_assert!(participant_count > 0);
    debug_assert!((1..=ROUND_COUNT).contains(&round));
    (sheet + round as usize - 1) % participant_count
}

/// Sheet index held by participant `participant` during round `round`
///
/// Inverse of [`holder_of`]; every participant holds exactly one sheet
/// per round.
pub fn sheet_held_by(participant: usize, round: u8, participant_count: usize) -> usize {
    debug_assert!(participant_count > 0);
    let n = participant_count;
    // participant = (sheet + round - 1) mod n  =>  sheet = (participant - round + 1) mod n
    (participant + n - ((round as usize - 1) % n)) % n
}
