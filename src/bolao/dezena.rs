use std::fmt;
use std::str::FromStr;

use crate::error::BolaoError;

pub const MIN_DEZENA: u8 = 1;
pub const MAX_DEZENA: u8 = 60;
pub const MIN_GAME_SIZE: usize = 6;
pub const MAX_GAME_SIZE: usize = 15;
pub const DRAW_SIZE: usize = 6;

/// A single Mega-Sena number (01–60).
///
/// Always rendered zero-padded to two characters, so the lexicographic order
/// of the rendered form matches the numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dezena(u8);

impl Dezena {
    pub fn new(value: u8) -> Result<Self, BolaoError> {
        if (MIN_DEZENA..=MAX_DEZENA).contains(&value) {
            Ok(Dezena(value))
        } else {
            Err(BolaoError::InvalidDezena(value.to_string()))
        }
    }
}

impl fmt::Display for Dezena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl FromStr for Dezena {
    type Err = BolaoError;

    /// Accepts "4" as well as "04".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.len() > 2 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BolaoError::InvalidDezena(s.to_string()));
        }
        let value: u8 = trimmed
            .parse()
            .map_err(|_| BolaoError::InvalidDezena(s.to_string()))?;
        Dezena::new(value).map_err(|_| BolaoError::InvalidDezena(s.to_string()))
    }
}

/// Parse, sort and validate the dezenas of a game (6–15 distinct numbers).
pub fn parse_game<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<Dezena>, BolaoError> {
    let dezenas = parse_sorted_unique(inputs)?;
    if !(MIN_GAME_SIZE..=MAX_GAME_SIZE).contains(&dezenas.len()) {
        return Err(BolaoError::GameSize {
            min: MIN_GAME_SIZE,
            max: MAX_GAME_SIZE,
            got: dezenas.len(),
        });
    }
    Ok(dezenas)
}

/// Parse, sort and validate the dezenas of an official draw (exactly 6).
pub fn parse_draw<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<Dezena>, BolaoError> {
    if inputs.len() != DRAW_SIZE {
        return Err(BolaoError::DrawSize(inputs.len()));
    }
    parse_sorted_unique(inputs)
}

fn parse_sorted_unique<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<Dezena>, BolaoError> {
    let mut dezenas = inputs
        .iter()
        .map(|s| s.as_ref().parse::<Dezena>())
        .collect::<Result<Vec<_>, _>>()?;
    dezenas.sort_unstable();
    if let Some(pair) = dezenas.windows(2).find(|w| w[0] == w[1]) {
        return Err(BolaoError::DuplicateDezena(pair[0].to_string()));
    }
    Ok(dezenas)
}

/// Storage form: comma separated, e.g. "04,08,15".
pub fn join(dezenas: &[Dezena]) -> String {
    dezenas
        .iter()
        .map(Dezena::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`join`].
pub fn split(stored: &str) -> Result<Vec<Dezena>, BolaoError> {
    if stored.is_empty() {
        return Ok(vec![]);
    }
    stored.split(',').map(str::parse).collect()
}

/// Human form: space separated, e.g. "04 08 15".
pub fn display(dezenas: &[Dezena]) -> String {
    dezenas
        .iter()
        .map(Dezena::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
