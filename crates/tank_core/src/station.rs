//! Capturable stations.
//!
//! A station changes hands the moment an active enemy tank comes within
//! capture range. Holding every station wins the match.

use serde::{Deserialize, Serialize};

use crate::components::{EntityId, Team};
use crate::data::StationRules;
use crate::math::{Fixed, Vec2Fixed};
use crate::spatial::{category, BodyDesc, BodyHandle, BodyTag, CollisionFilter, Shape};

/// A refuelling station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    /// Entity id.
    pub id: EntityId,
    /// World position.
    pub position: Vec2Fixed,
    /// Current owner.
    pub team: Team,
    #[serde(skip)]
    pub(crate) body: Option<BodyHandle>,
}

impl Station {
    /// Create a station.
    #[must_use]
    pub fn new(id: EntityId, position: Vec2Fixed, team: Team) -> Self {
        Self {
            id,
            position,
            team,
            body: None,
        }
    }

    /// Hand the station to `team`. Returns the previous owner if it changed.
    pub fn capture(&mut self, team: Team) -> Option<Team> {
        if self.team == team {
            return None;
        }
        let previous = self.team;
        self.team = team;
        Some(previous)
    }

    /// True if `position` is within `range` of the station.
    #[must_use]
    pub fn in_range(&self, position: Vec2Fixed, range: Fixed) -> bool {
        self.position.within(position, range)
    }

    /// Sensor collider.
    #[must_use]
    pub fn collider(&self, rules: &StationRules) -> BodyDesc {
        BodyDesc {
            tag: BodyTag::Station(self.id),
            shape: Shape::circle(Fixed::from_num(rules.radius)),
            position: self.position,
            filter: CollisionFilter::new(category::STATION, category::PLAYER),
            is_static: true,
            is_sensor: true,
        }
    }
}

/// Team holding every station, if any.
///
/// Requires at least one station and a non-neutral owner.
#[must_use]
pub fn sole_owner<'a, I>(stations: I) -> Option<Team>
where
    I: IntoIterator<Item = &'a Station>,
{
    let mut owner = None;
    for station in stations {
        match owner {
            None => owner = Some(station.team),
            Some(team) if team != station.team => return None,
            Some(_) => {}
        }
    }
    owner.filter(|team| !team.is_neutral())
}
