use chrono::{DateTime, Utc};

use crate::bolao::dezena::Dezena;

/// A lottery pool (bolão) targeting one Mega-Sena concurso
#[derive(Debug, Clone)]
pub struct Pool {
    /// Random 10-hex-character id, shared with participants
    pub id: String,
    pub name: Option<String>,
    pub target_draw: i64,
    /// Secret held by the pool owner; required for edits
    pub edit_token: String,
    pub created_at: DateTime<Utc>,
}

/// One registered number combination
#[derive(Debug, Clone, PartialEq)]
pub struct Game {
    /// Insertion id, increasing with creation order
    pub id: i64,
    pub pool_id: String,
    /// 6–15 distinct dezenas, sorted ascending
    pub numbers: Vec<Dezena>,
    pub created_at: DateTime<Utc>,
}

/// An official draw result
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    /// Concurso number
    pub number: i64,
    /// Exactly 6 dezenas, sorted ascending
    pub numbers: Vec<Dezena>,
    /// Official draw date as published, e.g. "30/03/2024"
    pub date: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberStatus {
    Pending,
    Verified,
}

impl SubscriberStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SubscriberStatus::Pending),
            "verified" => Some(SubscriberStatus::Verified),
            _ => None,
        }
    }
}

/// An email address subscribed to a pool's result
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: i64,
    pub pool_id: String,
    pub email: String,
    pub status: SubscriberStatus,
    /// Cleared once verified
    pub verify_token: Option<String>,
    /// Last concurso this subscriber was successfully notified about
    pub last_notified_draw: Option<i64>,
    pub subscribed_at: DateTime<Utc>,
    /// Set on verification, cleared when the email subscribes again
    pub verified_at: Option<DateTime<Utc>>,
}

/// Relation between a pool and its target draw
#[derive(Debug, Clone, PartialEq)]
pub enum PoolDraw {
    /// Target concurso not yet stored locally
    Pending { target: i64 },
    /// Target concurso result is known
    Resolved(Draw),
}

impl PoolDraw {
    pub fn draw(&self) -> Option<&Draw> {
        match self {
            PoolDraw::Pending { .. } => None,
            PoolDraw::Resolved(draw) => Some(draw),
        }
    }
}
