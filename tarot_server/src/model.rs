// Copyright 2025 Justin Hu
//
// This file is part of Tarot Online.
//
// Tarot Online is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// Tarot Online is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with Tarot Online. If not, see <https://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reading state for the Tarot Online server

use std::collections::{HashMap, HashSet};

use rand::Rng;
use rand::seq::SliceRandom;
use tarot_common::{
    Card, DealtCard, Demand, MAJOR_COUNT, MINOR_COUNT, MinorAssociation, Position, ReadingSnapshot,
    Role, Spread,
};

/// One reading: the fixed draw order, the spread built from it so far, and
/// the minor arcana overlay
///
/// All randomness is consumed up front (shuffle order and inversion coins) or
/// at minor draw time, from whatever `Rng` the caller passes in; a seeded rng
/// reproduces a reading exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingState {
    /// Full draw order, fixed at reading start
    shuffled_seq: Vec<Card>,
    /// Cards placed so far, in placement order
    dealt: Vec<Card>,
    spread: Spread,
    /// Cursor into `shuffled_seq`
    next_card_index: usize,
    /// Goes from false to true once, never back
    is_complete: bool,
    /// Set only by `stop`; implies `is_complete`
    stopped: bool,
    /// Minor arcana not yet drawn, in draw order
    available_minors: Vec<u8>,
    /// Minor overlays keyed by the owning major card's id
    minor_associations: HashMap<u32, MinorAssociation>,
    /// Forecast card count, computed once at reading start
    total_planned_cards: usize,
}

impl ReadingState {
    /// Shuffle a fresh reading and lay out its three base cards
    pub fn new(rng: &mut impl Rng) -> Self {
        let mut majors: Vec<u8> = (0..MAJOR_COUNT as u8).collect();
        majors.shuffle(rng);
        let draws = majors
            .into_iter()
            .map(|tarot_number| (tarot_number, rng.random_bool(0.5)))
            .collect();

        let mut minors: Vec<u8> = (0..MINOR_COUNT as u8).collect();
        minors.shuffle(rng);

        Self::from_draws(draws, minors)
    }

    /// Build a reading from an explicit draw order
    ///
    /// The first three draws become the base cards at (-1, 0), (0, 0) and
    /// (1, 0); the forecast and the initial completion check run against
    /// exactly this state
    fn from_draws(draws: Vec<(u8, bool)>, minors: Vec<u8>) -> Self {
        let mut shuffled_seq: Vec<Card> = draws
            .into_iter()
            .enumerate()
            .map(|(id, (tarot_number, inverted))| Card::new(id as u32, tarot_number, inverted))
            .collect();

        let mut spread = Spread::new();
        let mut dealt = Vec::new();
        for (i, card) in shuffled_seq.iter_mut().take(3).enumerate() {
            card.position = Position::new(i as i32 - 1, 0);
            card.role = Role::Base;
            dealt.push(*card);
            spread.place(*card);
        }
        let next_card_index = dealt.len();

        let mut reading = Self {
            shuffled_seq,
            dealt,
            spread,
            next_card_index,
            is_complete: false,
            stopped: false,
            available_minors: minors,
            minor_associations: HashMap::new(),
            total_planned_cards: 0,
        };
        reading.total_planned_cards = reading.plan_total_cards();
        if reading.next_card_index >= reading.shuffled_seq.len()
            || reading.spread.next_placement(&reading.dealt).is_none()
        {
            reading.is_complete = true;
        }
        reading
    }

    /// Deal one card onto the cell the spread demands next
    ///
    /// Returns the placed card, or `None` when the reading is (or hereby
    /// becomes) complete. A card placed as a soluzione is straightened before
    /// it lands. Never places more than one card.
    pub fn advance(&mut self) -> Option<Card> {
        if self.is_complete || self.next_card_index >= self.shuffled_seq.len() {
            self.is_complete = true;
            return None;
        }
        let Some(Demand { position, role }) = self.spread.next_placement(&self.dealt) else {
            self.is_complete = true;
            return None;
        };

        let card = &mut self.shuffled_seq[self.next_card_index];
        card.position = position;
        card.role = role;
        if role == Role::Soluzione {
            card.straighten();
        }
        let card = *card;
        self.dealt.push(card);
        self.spread.place(card);
        self.next_card_index += 1;

        if self.next_card_index >= self.shuffled_seq.len()
            || self.spread.next_placement(&self.dealt).is_none()
        {
            self.is_complete = true;
        }
        Some(card)
    }

    /// Cut the reading short
    ///
    /// Completion is forced even while the spread still demands cells; a
    /// later `advance` is a no-op
    pub fn stop(&mut self) {
        self.stopped = true;
        self.is_complete = true;
    }

    /// Forecast how many cards this draw order will eventually place
    ///
    /// Runs the same demand-and-place loop as `advance` to exhaustion on a
    /// private copy of the spread; the live reading is untouched. Repeated
    /// live advances on the same draw order reach exactly this count.
    fn plan_total_cards(&self) -> usize {
        let mut spread = self.spread.clone();
        let mut dealt = self.dealt.clone();
        let mut index = self.next_card_index;
        while index < self.shuffled_seq.len() {
            let Some(Demand { position, role }) = spread.next_placement(&dealt) else {
                break;
            };
            let mut card = self.shuffled_seq[index];
            card.position = position;
            card.role = role;
            if role == Role::Soluzione {
                card.straighten();
            }
            dealt.push(card);
            spread.place(card);
            index += 1;
        }
        dealt.len()
    }

    /// Tap a major card, drawing or re-showing its minor
    ///
    /// First tap draws the next minor from the pool (gone for good, even if
    /// later hidden) and shows it small; a tap on a card whose minor was
    /// hidden shows the same minor again from the start of its cycle. With
    /// the pool empty and nothing drawn yet, nothing happens.
    ///
    /// Returns whether the reading changed.
    pub fn activate_major(&mut self, card_id: u32, rng: &mut impl Rng) -> bool {
        if !self.dealt.iter().any(|card| card.id == card_id) {
            return false;
        }
        if let Some(association) = self.minor_associations.get_mut(&card_id) {
            association.visible = true;
            association.enlarged = false;
            association.step = 0;
            true
        } else if self.available_minors.is_empty() {
            false
        } else {
            let tarot_number = self.available_minors.remove(0);
            self.minor_associations.insert(
                card_id,
                MinorAssociation {
                    tarot_number,
                    inverted: rng.random_bool(0.5),
                    visible: true,
                    enlarged: false,
                    step: 0,
                },
            );
            true
        }
    }

    /// Tap a shown minor card, cycling enlarge, shrink, hide
    ///
    /// Returns whether the reading changed.
    pub fn activate_minor(&mut self, card_id: u32) -> bool {
        let Some(association) = self.minor_associations.get_mut(&card_id) else {
            return false;
        };
        if !association.visible {
            return false;
        }
        match association.step {
            0 => {
                association.enlarged = true;
                association.step = 1;
            }
            1 => {
                association.enlarged = false;
                association.step = 2;
            }
            _ => {
                association.visible = false;
                association.enlarged = false;
                association.step = 0;
            }
        }
        true
    }

    /// Cards placed so far, in placement order
    pub fn dealt(&self) -> &[Card] {
        &self.dealt
    }

    /// Whether no further cards will be dealt
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Whether the reading was cut short by hand
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Forecast card count, fixed at reading start
    pub fn total_planned_cards(&self) -> usize {
        self.total_planned_cards
    }

    /// The reading as shown to a renderer
    ///
    /// Which cards are mounted and face up is the caller's presentation
    /// state, not part of the reading itself
    pub fn snapshot(&self, visible: &HashSet<u32>, flipped: &HashSet<u32>) -> ReadingSnapshot {
        let mut visible_ids: Vec<u32> = visible.iter().copied().collect();
        visible_ids.sort_unstable();
        let mut flipped_ids: Vec<u32> = flipped.iter().copied().collect();
        flipped_ids.sort_unstable();

        ReadingSnapshot {
            dealt: self.dealt.iter().copied().map(DealtCard::from).collect(),
            bounds: self.spread.bounds(),
            total_planned_cards: self.total_planned_cards,
            is_complete: self.is_complete,
            stopped: self.stopped,
            visible_ids,
            flipped_ids,
            minor_associations: self.minor_associations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tarot_common::Bounds;

    /// Pad an explicit prefix of draws out to the full 22-card deck, upright
    fn draws_starting_with(prefix: &[(u8, bool)]) -> Vec<(u8, bool)> {
        let mut draws = prefix.to_vec();
        for tarot_number in 0..MAJOR_COUNT as u8 {
            if !draws.iter().any(|&(drawn, _)| drawn == tarot_number) {
                draws.push((tarot_number, false));
            }
        }
        assert_eq!(draws.len(), MAJOR_COUNT);
        draws
    }

    fn minors_in_order() -> Vec<u8> {
        (0..MINOR_COUNT as u8).collect()
    }

    #[test]
    fn test_new_reading_seeds_three_base_cards() {
        let mut rng = StdRng::seed_from_u64(7);
        let reading = ReadingState::new(&mut rng);

        assert_eq!(reading.dealt.len(), 3);
        assert_eq!(reading.next_card_index, 3);
        assert_eq!(reading.spread.len(), 3);
        for (i, card) in reading.dealt.iter().enumerate() {
            assert_eq!(card.id, i as u32);
            assert_eq!(card.position, Position::new(i as i32 - 1, 0));
            assert_eq!(card.role, Role::Base);
        }
        assert_eq!(
            reading.spread.bounds(),
            Bounds {
                min_x: -1,
                min_y: 0,
                max_x: 1,
                max_y: 0,
            }
        );
        assert_eq!(reading.available_minors.len(), MINOR_COUNT);
        assert!(reading.minor_associations.is_empty());
        // The forecast covers at least the base cards
        assert!(reading.total_planned_cards >= 3);
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(99);
        let reading = ReadingState::new(&mut rng);

        let numbers: HashSet<u8> = reading
            .shuffled_seq
            .iter()
            .map(|card| card.tarot_number)
            .collect();
        assert_eq!(numbers.len(), MAJOR_COUNT);
        assert!(numbers.iter().all(|&n| (n as usize) < MAJOR_COUNT));

        let minors: HashSet<u8> = reading.available_minors.iter().copied().collect();
        assert_eq!(minors.len(), MINOR_COUNT);
    }

    #[test]
    fn test_same_seed_reproduces_the_reading() {
        let reading_a = ReadingState::new(&mut StdRng::seed_from_u64(42));
        let reading_b = ReadingState::new(&mut StdRng::seed_from_u64(42));
        assert_eq!(reading_a, reading_b);
    }

    #[test]
    fn test_forecast_matches_live_advances() {
        // The forecast made at reading start must equal the count reached by
        // dealing the same draw order to exhaustion, across many outcomes
        for seed in 0..64 {
            let mut reading = ReadingState::new(&mut StdRng::seed_from_u64(seed));
            let forecast = reading.total_planned_cards;
            while reading.advance().is_some() {}
            assert!(reading.is_complete);
            assert_eq!(
                reading.dealt.len(),
                forecast,
                "forecast diverged for seed {seed}"
            );
        }
    }

    #[test]
    fn test_reading_invariants_hold_across_advances() {
        for seed in 0..32 {
            let mut reading = ReadingState::new(&mut StdRng::seed_from_u64(seed));
            loop {
                // One card per cell, and the counters agree
                let positions: HashSet<Position> =
                    reading.dealt.iter().map(|card| card.position).collect();
                assert_eq!(positions.len(), reading.dealt.len());
                assert_eq!(reading.spread.len(), reading.dealt.len());
                assert_eq!(reading.next_card_index, reading.dealt.len());

                // Bounds are exactly the minimal covering rectangle
                let bounds = reading.spread.bounds();
                assert!(reading.dealt.iter().all(|card| bounds.contains(card.position)));
                let min_x = reading.dealt.iter().map(|c| c.position.x).min().unwrap();
                let min_y = reading.dealt.iter().map(|c| c.position.y).min().unwrap();
                let max_x = reading.dealt.iter().map(|c| c.position.x).max().unwrap();
                let max_y = reading.dealt.iter().map(|c| c.position.y).max().unwrap();
                assert_eq!(
                    bounds,
                    Bounds {
                        min_x,
                        min_y,
                        max_x,
                        max_y,
                    }
                );

                // Every soluzione lies upright
                assert!(
                    reading
                        .dealt
                        .iter()
                        .filter(|card| card.role == Role::Soluzione)
                        .all(|card| !card.inverted)
                );

                if reading.advance().is_none() {
                    break;
                }
            }
        }
    }

    #[test]
    fn test_bounds_never_shrink() {
        let mut reading = ReadingState::new(&mut StdRng::seed_from_u64(3));
        let mut previous = reading.spread.bounds();
        while reading.advance().is_some() {
            let bounds = reading.spread.bounds();
            assert!(bounds.min_x <= previous.min_x);
            assert!(bounds.min_y <= previous.min_y);
            assert!(bounds.max_x >= previous.max_x);
            assert!(bounds.max_y >= previous.max_y);
            previous = bounds;
        }
    }

    #[test]
    fn test_all_front_upright_base_completes_at_three() {
        // Majors 6, 8 and 10 all gaze front; upright they demand nothing, so
        // the reading is born complete
        let reading = ReadingState::from_draws(
            draws_starting_with(&[(6, false), (8, false), (10, false)]),
            minors_in_order(),
        );
        assert!(reading.is_complete);
        assert_eq!(reading.dealt.len(), 3);
        assert_eq!(reading.total_planned_cards, 3);
    }

    #[test]
    fn test_soluzione_lands_straightened() {
        // Base: two front-gazing uprights and an inverted front-gazer at
        // (1, 0), which demands one soluzione above itself. The fourth draw
        // is inverted but must land upright.
        let reading_draws =
            draws_starting_with(&[(6, false), (8, false), (10, true), (19, true)]);
        let mut reading = ReadingState::from_draws(reading_draws, minors_in_order());
        assert!(!reading.is_complete);
        assert_eq!(reading.total_planned_cards, 4);

        let placed = reading.advance().expect("the soluzione must be dealt");
        assert_eq!(placed.position, Position::new(1, -1));
        assert_eq!(placed.role, Role::Soluzione);
        assert!(!placed.inverted);
        assert!(!reading.dealt[3].inverted);

        // That filled the only demand; Il Sole gazes front, so nothing more
        assert!(reading.is_complete);
        assert_eq!(reading.dealt.len(), reading.total_planned_cards);
    }

    #[test]
    fn test_advance_on_complete_reading_is_noop() {
        let mut reading = ReadingState::from_draws(
            draws_starting_with(&[(6, false), (8, false), (10, false)]),
            minors_in_order(),
        );
        let before = reading.clone();
        assert_eq!(reading.advance(), None);
        assert_eq!(reading, before);
    }

    #[test]
    fn test_stop_forces_completion_mid_reading() {
        // An all-inverted draw order keeps demanding cells, so the reading
        // cannot run dry on its own this early
        let draws: Vec<(u8, bool)> = (0..MAJOR_COUNT as u8).map(|n| (n, true)).collect();
        let mut reading = ReadingState::from_draws(draws, minors_in_order());
        for _ in 0..3 {
            assert!(reading.advance().is_some());
        }
        assert!(!reading.is_complete);

        reading.stop();
        assert!(reading.is_complete);
        assert!(reading.stopped);

        let before = reading.clone();
        assert_eq!(reading.advance(), None);
        assert_eq!(reading, before);
    }

    #[test]
    fn test_sequence_exhaustion_completes() {
        // All 22 inverted: every deal opens at least one new demand, so the
        // reading ends by running out of cards, not demands
        let draws: Vec<(u8, bool)> = (0..MAJOR_COUNT as u8).map(|n| (n, true)).collect();
        let mut reading = ReadingState::from_draws(draws, minors_in_order());
        assert_eq!(reading.total_planned_cards, MAJOR_COUNT);
        while reading.advance().is_some() {}
        assert_eq!(reading.dealt.len(), MAJOR_COUNT);
        assert_eq!(reading.next_card_index, MAJOR_COUNT);
    }

    #[test]
    fn test_forecast_does_not_disturb_the_live_reading() {
        let mut rng = StdRng::seed_from_u64(11);
        let reading = ReadingState::new(&mut rng);
        let before = reading.clone();
        let _ = reading.plan_total_cards();
        assert_eq!(reading, before);
    }

    #[test]
    fn test_major_tap_draws_from_the_pool_head() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut reading = ReadingState::new(&mut rng);
        let card_id = reading.dealt[0].id;
        let expected_minor = reading.available_minors[0];

        assert!(reading.activate_major(card_id, &mut rng));
        assert_eq!(reading.available_minors.len(), MINOR_COUNT - 1);
        let association = reading.minor_associations[&card_id];
        assert_eq!(association.tarot_number, expected_minor);
        assert!(association.visible);
        assert!(!association.enlarged);
        assert_eq!(association.step, 0);
        // The drawn minor never returns to the pool
        assert!(!reading.available_minors.contains(&expected_minor));
    }

    #[test]
    fn test_minor_tap_cycles_enlarge_shrink_hide() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut reading = ReadingState::new(&mut rng);
        let card_id = reading.dealt[0].id;
        assert!(reading.activate_major(card_id, &mut rng));

        // 0 -> 1: enlarge, stays visible
        assert!(reading.activate_minor(card_id));
        let association = reading.minor_associations[&card_id];
        assert!(association.visible && association.enlarged);
        assert_eq!(association.step, 1);

        // 1 -> 2: shrink, stays visible
        assert!(reading.activate_minor(card_id));
        let association = reading.minor_associations[&card_id];
        assert!(association.visible && !association.enlarged);
        assert_eq!(association.step, 2);

        // 2 -> 0: hide
        assert!(reading.activate_minor(card_id));
        let association = reading.minor_associations[&card_id];
        assert!(!association.visible && !association.enlarged);
        assert_eq!(association.step, 0);

        // A hidden minor ignores further taps
        let before = reading.clone();
        assert!(!reading.activate_minor(card_id));
        assert_eq!(reading, before);
    }

    #[test]
    fn test_major_tap_reshows_the_same_minor() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut reading = ReadingState::new(&mut rng);
        let card_id = reading.dealt[0].id;
        assert!(reading.activate_major(card_id, &mut rng));
        let drawn = reading.minor_associations[&card_id].tarot_number;

        // Cycle all the way to hidden, then tap the major again
        for _ in 0..3 {
            reading.activate_minor(card_id);
        }
        assert!(!reading.minor_associations[&card_id].visible);
        assert!(reading.activate_major(card_id, &mut rng));

        let association = reading.minor_associations[&card_id];
        assert!(association.visible);
        assert_eq!(association.step, 0);
        assert_eq!(association.tarot_number, drawn);
        // No second draw happened
        assert_eq!(reading.available_minors.len(), MINOR_COUNT - 1);
    }

    #[test]
    fn test_minors_are_never_shared_between_majors() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut reading = ReadingState::new(&mut rng);
        let ids: Vec<u32> = reading.dealt.iter().map(|card| card.id).collect();
        for &card_id in &ids {
            assert!(reading.activate_major(card_id, &mut rng));
        }
        let drawn: HashSet<u8> = reading
            .minor_associations
            .values()
            .map(|association| association.tarot_number)
            .collect();
        assert_eq!(drawn.len(), ids.len());
        assert_eq!(reading.available_minors.len(), MINOR_COUNT - ids.len());
    }

    #[test]
    fn test_major_tap_with_empty_pool_is_noop() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut reading = ReadingState::new(&mut rng);
        reading.available_minors.clear();

        let card_id = reading.dealt[0].id;
        let before = reading.clone();
        assert!(!reading.activate_major(card_id, &mut rng));
        assert_eq!(reading, before);
    }

    #[test]
    fn test_tapping_an_unknown_card_is_noop() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut reading = ReadingState::new(&mut rng);
        let before = reading.clone();
        assert!(!reading.activate_major(999, &mut rng));
        assert!(!reading.activate_minor(999));
        assert_eq!(reading, before);
    }

    #[test]
    fn test_snapshot_reflects_reading_and_presentation() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut reading = ReadingState::new(&mut rng);
        let visible: HashSet<u32> = [0, 1].into_iter().collect();
        let flipped: HashSet<u32> = [0].into_iter().collect();

        let snapshot = reading.snapshot(&visible, &flipped);
        assert_eq!(snapshot.dealt.len(), reading.dealt.len());
        assert_eq!(snapshot.dealt[0].name, reading.dealt[0].name());
        assert_eq!(snapshot.bounds, reading.spread.bounds());
        assert_eq!(snapshot.total_planned_cards, reading.total_planned_cards);
        assert_eq!(snapshot.visible_ids, vec![0, 1]);
        assert_eq!(snapshot.flipped_ids, vec![0]);
        assert!(!snapshot.stopped);

        reading.stop();
        let snapshot = reading.snapshot(&visible, &flipped);
        assert!(snapshot.is_complete);
        assert!(snapshot.stopped);
    }
}
