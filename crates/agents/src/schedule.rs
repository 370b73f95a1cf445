//! Train schedules read from the timetables corpus.
//!
//! Timetable records that carry a train number and a list of stops are
//! parsed into [`TrainSchedule`]s; free-text passages are skipped. Station
//! names match case-insensitively.

use std::collections::BTreeMap;

use railmind_knowledge::{Category, KnowledgeBase};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Platforms assumed at a station when nothing says otherwise.
pub const DEFAULT_PLATFORMS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub station: String,
    #[serde(default)]
    pub arrival: Option<String>,
    #[serde(default)]
    pub departure: Option<String>,
    #[serde(default)]
    pub platform: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSchedule {
    #[serde(alias = "train", alias = "number")]
    pub train_number: String,
    #[serde(default, alias = "name")]
    pub train_name: Option<String>,
    #[serde(alias = "stops")]
    pub route: Vec<Stop>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default, rename = "type")]
    pub service_type: Option<String>,
}

impl TrainSchedule {
    fn position(&self, station: &str) -> Option<usize> {
        self.route.iter().position(|s| same_station(&s.station, station))
    }

    pub fn stop(&self, station: &str) -> Option<&Stop> {
        self.position(station).map(|i| &self.route[i])
    }

    /// Stations after `station`, in running order.
    pub fn stations_after(&self, station: &str) -> Vec<String> {
        match self.position(station) {
            Some(i) => self.route[i + 1..].iter().map(|s| s.station.clone()).collect(),
            None => Vec::new(),
        }
    }

    fn label(&self) -> String {
        match self.train_name {
            Some(ref name) => format!("{} {}", self.train_number, name),
            None => self.train_number.clone(),
        }
    }
}

/// Another train leaving a station the delayed train calls at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub train_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_name: Option<String>,
    pub station: String,
    pub departure: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<u32>,
    /// Scheduled arrival of the delayed train at the same station
    pub main_train_arrival: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformSlot {
    pub train_number: String,
    pub arrival: Option<String>,
    pub departure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformAvailability {
    pub station: String,
    pub usage: BTreeMap<u32, Vec<PlatformSlot>>,
    pub available: Vec<u32>,
}

fn same_station(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Schedules keyed by train number.
#[derive(Debug, Clone, Default)]
pub struct ScheduleBook {
    trains: BTreeMap<String, TrainSchedule>,
}

impl ScheduleBook {
    /// Parses every passage that is a schedule record. A later record for
    /// the same train replaces an earlier one.
    pub fn from_passages<'a>(passages: impl IntoIterator<Item = &'a str>) -> Self {
        let mut trains = BTreeMap::new();
        let mut skipped = 0usize;
        for passage in passages {
            match serde_json::from_str::<TrainSchedule>(passage) {
                Ok(schedule) if !schedule.route.is_empty() => {
                    trains.insert(schedule.train_number.trim().to_string(), schedule);
                }
                _ => skipped += 1,
            }
        }
        debug!(schedules = trains.len(), skipped, "Schedule book built");
        Self { trains }
    }

    /// Schedules from the knowledge base's timetables category.
    pub fn from_knowledge(knowledge: &KnowledgeBase) -> Self {
        let documents = knowledge.documents(Category::Timetables);
        Self::from_passages(documents.iter().map(|d| d.text.as_str()))
    }

    pub fn len(&self) -> usize {
        self.trains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trains.is_empty()
    }

    pub fn find(&self, train_number: &str) -> Option<&TrainSchedule> {
        self.trains.get(train_number.trim())
    }

    /// Trains leaving `station` after the delayed train is due there.
    ///
    /// Empty when the train is unknown or has no arrival at the station.
    pub fn connections(&self, train_number: &str, station: &str) -> Vec<Connection> {
        let Some(arrival) = self
            .find(train_number)
            .and_then(|s| s.stop(station))
            .and_then(|s| s.arrival.clone())
        else {
            return Vec::new();
        };
        self.trains
            .values()
            .filter(|s| s.train_number != train_number.trim())
            .filter_map(|s| {
                let stop = s.stop(station)?;
                Some(Connection {
                    train_number: s.train_number.clone(),
                    train_name: s.train_name.clone(),
                    station: stop.station.clone(),
                    departure: stop.departure.clone()?,
                    platform: stop.platform,
                    main_train_arrival: arrival.clone(),
                })
            })
            .collect()
    }

    /// Which platforms arriving trains use at `station`, out of
    /// `1..=platforms`.
    pub fn platform_availability(&self, station: &str, platforms: u32) -> PlatformAvailability {
        let mut usage: BTreeMap<u32, Vec<PlatformSlot>> = BTreeMap::new();
        for schedule in self.trains.values() {
            let Some(stop) = schedule.stop(station) else {
                continue;
            };
            let (Some(platform), Some(_)) = (stop.platform, stop.arrival.as_ref()) else {
                continue;
            };
            usage.entry(platform).or_default().push(PlatformSlot {
                train_number: schedule.train_number.clone(),
                arrival: stop.arrival.clone(),
                departure: stop.departure.clone(),
            });
        }
        let available = (1..=platforms).filter(|p| !usage.contains_key(p)).collect();
        PlatformAvailability {
            station: station.trim().to_string(),
            usage,
            available,
        }
    }

    /// Schedule context for an operations prompt. Empty when the train is
    /// not in the book.
    pub fn describe(&self, train_number: &str, station: Option<&str>) -> String {
        let Some(schedule) = self.find(train_number) else {
            return String::new();
        };
        let mut out = format!("## Schedule of {}\n", schedule.label());
        for stop in &schedule.route {
            out.push_str(&format!(
                "- {}: arr {} / dep {}{}\n",
                stop.station,
                stop.arrival.as_deref().unwrap_or("-"),
                stop.departure.as_deref().unwrap_or("-"),
                stop.platform.map(|p| format!(", platform {p}")).unwrap_or_default(),
            ));
        }
        let Some(station) = station else {
            return out;
        };

        let connections = self.connections(train_number, station);
        if !connections.is_empty() {
            out.push_str(&format!("\n## Connections at {station}\n"));
            for c in &connections {
                out.push_str(&format!(
                    "- {}{} departs {}{} (delayed train due {})\n",
                    c.train_number,
                    c.train_name.as_ref().map(|n| format!(" {n}")).unwrap_or_default(),
                    c.departure,
                    c.platform.map(|p| format!(" from platform {p}")).unwrap_or_default(),
                    c.main_train_arrival,
                ));
            }
        }
        if schedule.stop(station).is_some() {
            let platforms = self.platform_availability(station, DEFAULT_PLATFORMS);
            let free: Vec<String> = platforms.available.iter().map(u32::to_string).collect();
            out.push_str(&format!(
                "\nFree platforms at {station}: {}\n",
                if free.is_empty() { "none".to_string() } else { free.join(", ") }
            ));
        }
        out
    }
}
