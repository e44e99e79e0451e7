//! Hit matching between registered games and an official draw.
//!
//! A game's hit count is the size of the intersection between its dezenas
//! and the six drawn dezenas. The best hit count across a pool decides the
//! pool's achievement tier:
//!   6 → sena, 5 → quina, 4 → quadra, anything lower → none.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use crate::db::models::{Draw, Game, Pool, PoolDraw};

use super::dezena::Dezena;

/// Prize tier reached by the best game of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Achievement {
    Quadra,
    Quina,
    Sena,
}

impl Achievement {
    pub fn from_hits(max_hits: usize) -> Option<Self> {
        match max_hits {
            6 => Some(Achievement::Sena),
            5 => Some(Achievement::Quina),
            4 => Some(Achievement::Quadra),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Achievement::Quadra => "quadra",
            Achievement::Quina => "quina",
            Achievement::Sena => "sena",
        }
    }
}

impl fmt::Display for Achievement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of game dezenas present in the drawn set.
pub fn hit_count(game: &[Dezena], drawn: &[Dezena]) -> usize {
    let drawn: HashSet<&Dezena> = drawn.iter().collect();
    game.iter().filter(|d| drawn.contains(d)).count()
}

/// A game together with its hit count (`None` while the draw is unknown)
#[derive(Debug, Clone)]
pub struct RankedGame {
    pub game: Game,
    pub hits: Option<usize>,
}

impl RankedGame {
    pub fn is_hit(&self, dezena: &Dezena, draw: &Draw) -> bool {
        self.game.numbers.contains(dezena) && draw.numbers.contains(dezena)
    }
}

/// Order games for display: hits descending (only with a draw), then game
/// size descending, then most recently added first.
pub fn rank_games(games: Vec<Game>, draw: Option<&Draw>) -> Vec<RankedGame> {
    let mut ranked: Vec<RankedGame> = games
        .into_iter()
        .map(|game| {
            let hits = draw.map(|d| hit_count(&game.numbers, &d.numbers));
            RankedGame { game, hits }
        })
        .collect();
    ranked.sort_by(compare_ranked);
    ranked
}

fn compare_ranked(a: &RankedGame, b: &RankedGame) -> Ordering {
    b.hits
        .cmp(&a.hits)
        .then_with(|| b.game.numbers.len().cmp(&a.game.numbers.len()))
        .then_with(|| b.game.id.cmp(&a.game.id))
}

/// Everything needed to show or announce a pool's outcome
#[derive(Debug, Clone)]
pub struct PoolSummary {
    pub pool: Pool,
    pub state: PoolDraw,
    pub games: Vec<RankedGame>,
    /// Best hit count, `None` while pending or without games
    pub max_hits: Option<usize>,
    pub achievement: Option<Achievement>,
}

impl PoolSummary {
    pub fn build(pool: Pool, state: PoolDraw, games: Vec<Game>) -> Self {
        let games = rank_games(games, state.draw());
        let max_hits = games.iter().filter_map(|g| g.hits).max();
        let achievement = max_hits.and_then(Achievement::from_hits);
        PoolSummary {
            pool,
            state,
            games,
            max_hits,
            achievement,
        }
    }

    /// Number of games reaching at least `hits`.
    pub fn games_with_at_least(&self, hits: usize) -> usize {
        self.games
            .iter()
            .filter(|g| g.hits.is_some_and(|h| h >= hits))
            .count()
    }
}
