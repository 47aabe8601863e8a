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

//! Common structure definitions for Tarot Online

#![warn(missing_docs)]

use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Number of major arcana in the reading deck
pub const MAJOR_COUNT: usize = 22;
/// Number of minor arcana in the secondary draw pool
pub const MINOR_COUNT: usize = 56;

/// Display names of the major arcana, indexed by arcana number
pub const MAJOR_NAMES: [&str; MAJOR_COUNT] = [
    "Il Matto",
    "Il Bagatto",
    "La Papessa",
    "L'Imperatrice",
    "L'Imperatore",
    "Il Papa",
    "Gli Innamorati",
    "Il Carro",
    "La Giustizia",
    "L'Eremita",
    "La Ruota",
    "La Forza",
    "L'Appeso",
    "Arcano XIII",
    "La Temperanza",
    "Il Diavolo",
    "La Casa Dio",
    "La Stella",
    "La Luna",
    "Il Sole",
    "Il Giudizio",
    "Il Mondo",
];

/// Fixed gaze directions of the major arcana, indexed by arcana number
pub const MAJOR_GAZES: [Gaze; MAJOR_COUNT] = [
    Gaze::Right,
    Gaze::Left,
    Gaze::Left,
    Gaze::Right,
    Gaze::Left,
    Gaze::Right,
    Gaze::Front,
    Gaze::Left,
    Gaze::Front,
    Gaze::Left,
    Gaze::Front,
    Gaze::Right,
    Gaze::Front,
    Gaze::Right,
    Gaze::Left,
    Gaze::Front,
    Gaze::Front,
    Gaze::Left,
    Gaze::Front,
    Gaze::Front,
    Gaze::Front,
    Gaze::Left,
];

/// The direction a major arcana figure looks in
#[expect(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Gaze {
    #[serde(rename = "L")]
    Left,
    #[serde(rename = "R")]
    Right,
    #[serde(rename = "F")]
    Front,
}
impl Gaze {
    /// Horizontal offset of the cell this gaze points at
    ///
    /// Zero for a front gaze
    pub fn dx(&self) -> i32 {
        match *self {
            Gaze::Left => -1,
            Gaze::Right => 1,
            Gaze::Front => 0,
        }
    }
}

/// Why a cell in the spread was (or is to be) filled
#[expect(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    Base,
    Sguardo,
    Spalle,
    Soluzione,
}

/// A cell coordinate on the unbounded spread grid
///
/// `x` grows rightward, `y` grows downward; the three base cards sit on row
/// zero
#[expect(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}
impl Position {
    /// Make a position from its coordinates
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The position offset by the given deltas
    pub const fn shifted(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}
impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A major arcana card drawn into a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Unique per reading, assigned from shuffle order and never reused
    pub id: u32,
    /// Which major arcana this is, `0..22`
    pub tarot_number: u8,
    /// Whether the card was drawn upside down
    pub inverted: bool,
    /// Where the card lies in the spread
    pub position: Position,
    /// Why the card's cell was filled
    pub role: Role,
}
impl Card {
    /// Make a freshly drawn card, not yet placed
    pub fn new(id: u32, tarot_number: u8, inverted: bool) -> Self {
        Self {
            id,
            tarot_number,
            inverted,
            position: Position::new(0, 0),
            role: Role::Base,
        }
    }

    /// The fixed gaze of this card's figure
    pub fn gaze(&self) -> Gaze {
        MAJOR_GAZES
            .get(self.tarot_number as usize)
            .copied()
            .unwrap_or(Gaze::Front)
    }

    /// The display name of this card
    pub fn name(&self) -> &'static str {
        MAJOR_NAMES
            .get(self.tarot_number as usize)
            .copied()
            .unwrap_or("Sconosciuta")
    }

    /// Turn the card upright
    ///
    /// Happens exactly once, when the card is placed as a soluzione
    pub fn straighten(&mut self) {
        self.inverted = false;
    }
}
impl Display for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.inverted {
            write!(f, "{} (rovescio)", self.name())
        } else {
            write!(f, "{}", self.name())
        }
    }
}

/// An unoccupied cell that an already-placed card requires filled
#[expect(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demand {
    pub position: Position,
    pub role: Role,
}

/// Minimal axis-aligned rectangle covering a set of cells
///
/// Never shrinks over the life of a reading
#[expect(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}
impl Bounds {
    /// The degenerate rectangle covering a single cell
    pub const fn at(position: Position) -> Self {
        Self {
            min_x: position.x,
            min_y: position.y,
            max_x: position.x,
            max_y: position.y,
        }
    }

    /// Grow the rectangle to cover the given cell
    pub fn expand(&mut self, position: Position) {
        self.min_x = self.min_x.min(position.x);
        self.min_y = self.min_y.min(position.y);
        self.max_x = self.max_x.max(position.x);
        self.max_y = self.max_y.max(position.y);
    }

    /// Whether the rectangle covers the given cell
    pub fn contains(&self, position: Position) -> bool {
        (self.min_x..=self.max_x).contains(&position.x)
            && (self.min_y..=self.max_y).contains(&position.y)
    }

    /// Number of grid columns covered
    pub fn width(&self) -> i32 {
        self.max_x - self.min_x + 1
    }

    /// Number of grid rows covered
    pub fn height(&self) -> i32 {
        self.max_y - self.min_y + 1
    }
}

/// The evolving 2-D arrangement of placed cards for one reading
///
/// Owns the occupancy index; a position holds at most one card. The placement
/// rules live here so any holder of the spread can compute the next demanded
/// cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spread {
    occupancy: HashMap<Position, Card>,
    bounds: Option<Bounds>,
}

impl Spread {
    /// Make an empty spread
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied cells
    pub fn len(&self) -> usize {
        self.occupancy.len()
    }

    /// Whether no cell is occupied
    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty()
    }

    /// Whether the given cell holds a card
    pub fn is_occupied(&self, position: Position) -> bool {
        self.occupancy.contains_key(&position)
    }

    /// The card at the given cell, if any
    pub fn get(&self, position: Position) -> Option<&Card> {
        self.occupancy.get(&position)
    }

    /// The minimal rectangle covering all occupied cells
    ///
    /// An empty spread reports the single cell at the origin
    pub fn bounds(&self) -> Bounds {
        self.bounds
            .unwrap_or_else(|| Bounds::at(Position::new(0, 0)))
    }

    /// Put a card onto its cell and grow the bounds to cover it
    ///
    /// The caller is responsible for only placing onto unoccupied cells;
    /// demanded cells are always unoccupied at selection time
    pub fn place(&mut self, card: Card) {
        match self.bounds.as_mut() {
            Some(bounds) => bounds.expand(card.position),
            None => self.bounds = Some(Bounds::at(card.position)),
        }
        self.occupancy.insert(card.position, card);
    }

    /// Collect the unmet demands of a single placed card
    ///
    /// - Upright with a front gaze: nothing.
    /// - Upright with a directional gaze: the cell the figure looks at
    ///   (sguardo), if unoccupied.
    /// - Inverted: the cell directly above (soluzione), plus, for a
    ///   directional gaze, the sguardo cell and the cell behind the figure's
    ///   back (spalle), each if unoccupied.
    fn demands_of(&self, card: &Card, needs: &mut Vec<Demand>) {
        let gaze = card.gaze();
        if card.inverted {
            let soluzione = card.position.shifted(0, -1);
            if !self.is_occupied(soluzione) {
                needs.push(Demand {
                    position: soluzione,
                    role: Role::Soluzione,
                });
            }
            if gaze != Gaze::Front {
                let sguardo = card.position.shifted(gaze.dx(), 0);
                if !self.is_occupied(sguardo) {
                    needs.push(Demand {
                        position: sguardo,
                        role: Role::Sguardo,
                    });
                }
                let spalle = card.position.shifted(-gaze.dx(), 0);
                if !self.is_occupied(spalle) {
                    needs.push(Demand {
                        position: spalle,
                        role: Role::Spalle,
                    });
                }
            }
        } else if gaze != Gaze::Front {
            let sguardo = card.position.shifted(gaze.dx(), 0);
            if !self.is_occupied(sguardo) {
                needs.push(Demand {
                    position: sguardo,
                    role: Role::Sguardo,
                });
            }
        }
    }

    /// Pick the cell the spread demands filled next, if any
    ///
    /// Scans the dealt cards in placement order, collects every unmet demand,
    /// and selects the winner by ascending `x`, ties broken by descending
    /// `y`. Demands at the same cell keep scan order. This total order
    /// determines the shape of every spread and must not change.
    pub fn next_placement(&self, dealt: &[Card]) -> Option<Demand> {
        let mut needs = Vec::new();
        for card in dealt {
            self.demands_of(card, &mut needs);
        }
        if needs.is_empty() {
            return None;
        }
        needs.sort_by(|a, b| {
            a.position
                .x
                .cmp(&b.position.x)
                .then(b.position.y.cmp(&a.position.y))
        });
        Some(needs[0])
    }
}

/// A dealt card as shown to a renderer, with its display name resolved
#[expect(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealtCard {
    pub id: u32,
    pub tarot_number: u8,
    pub name: String,
    pub inverted: bool,
    pub position: Position,
    pub role: Role,
}
impl From<Card> for DealtCard {
    fn from(card: Card) -> Self {
        Self {
            id: card.id,
            tarot_number: card.tarot_number,
            name: card.name().to_string(),
            inverted: card.inverted,
            position: card.position,
            role: card.role,
        }
    }
}

/// The minor arcana overlay attached to one revealed major card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorAssociation {
    /// Which minor arcana this is, `0..56`; never reused within a reading
    pub tarot_number: u8,
    /// Whether the minor was drawn upside down, fixed at draw time
    pub inverted: bool,
    /// Whether the minor is currently shown
    pub visible: bool,
    /// Whether the minor is currently shown enlarged
    pub enlarged: bool,
    /// Where in the show-enlarge-hide cycle the minor is, `0..3`
    pub step: u8,
}

/// Reading state visible to a renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingSnapshot {
    /// Cards in placement order; the first three are the base cards
    pub dealt: Vec<DealtCard>,
    /// Minimal rectangle covering the dealt cards
    pub bounds: Bounds,
    /// How many cards this shuffle outcome will eventually place
    pub total_planned_cards: usize,
    /// Whether no further cards will be dealt
    pub is_complete: bool,
    /// Whether the reading was cut short by hand rather than running dry
    pub stopped: bool,
    /// Ids of cards mounted on the table
    pub visible_ids: Vec<u32>,
    /// Ids of cards turned face up
    pub flipped_ids: Vec<u32>,
    /// Minor overlays, keyed by the owning major card's id
    pub minor_associations: HashMap<u32, MinorAssociation>,
}

/// A control command issued by a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Shuffle and lay out a fresh reading
    Start,
    /// Deal one more card
    Advance,
    /// Cut the reading short
    Stop,
    /// Discard the reading
    Reset,
    /// Tap a revealed major card, drawing or re-showing its minor
    Major {
        /// Id of the tapped major card
        id: u32,
    },
    /// Tap a shown minor card, cycling its display state
    Minor {
        /// Id of the major card owning the minor
        id: u32,
    },
}
