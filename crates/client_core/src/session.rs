use std::collections::BTreeMap;

use shared::domain::{DeviceId, DeviceSummary, NoiseParams, PatternEntry, Rgb};

use crate::types::{saturate_i32, AccessToken, Field};

pub const MISSING_TOKEN_STATUS: &str = "Please enter your access token.";

/// Part of the session whose load/write state is tracked on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Field(Field),
    PatternList,
    ActivePattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SlotStatus {
    #[default]
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// Value read from the device.
    Loaded,
    /// Value echoed by the device after a write.
    Confirmed,
}

/// Identifies the device and connection a request was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestTag {
    pub device: DeviceId,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Field {
        field: Field,
        value: i64,
        source: UpdateSource,
    },
    /// Replaces the whole pattern list.
    Patterns(Vec<PatternEntry>),
    ActivePattern {
        index: u32,
        source: UpdateSource,
    },
    Failed {
        slot: Slot,
        message: String,
    },
    Status(String),
    Started,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub device: Option<DeviceSummary>,
    pub access_token: Option<AccessToken>,
    /// Bumped on every connect and disconnect; responses tagged with an older
    /// generation are discarded.
    pub generation: u64,
    pub power: bool,
    pub timezone_offset: i32,
    pub brightness: i32,
    pub clock_flipped: bool,
    pub color: Rgb,
    pub noise: NoiseParams,
    pub patterns: Vec<PatternEntry>,
    pub active_pattern_index: Option<u32>,
    pub selected_pattern: Option<PatternEntry>,
    pub status: String,
    pub slots: BTreeMap<Slot, SlotStatus>,
    pub in_flight: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            device: None,
            access_token: None,
            generation: 0,
            power: true,
            timezone_offset: 0,
            brightness: 0,
            clock_flipped: false,
            color: Rgb::new(0, 0, 255),
            noise: NoiseParams::default(),
            patterns: Vec::new(),
            active_pattern_index: None,
            selected_pattern: None,
            status: MISSING_TOKEN_STATUS.to_string(),
            slots: BTreeMap::new(),
            in_flight: 0,
        }
    }
}

impl Session {
    pub fn with_access_token(&self, token: AccessToken) -> Session {
        let mut next = self.clone();
        next.access_token = Some(token);
        next.status = String::new();
        next
    }

    /// Fresh state for `device`: previous device values are dropped and every
    /// slot starts out pending.
    pub fn connecting(&self, device: DeviceSummary) -> Session {
        let status = format!("Connecting to {}...", device.display_name());
        let mut slots = BTreeMap::new();
        for field in Field::ALL {
            slots.insert(Slot::Field(field), SlotStatus::Pending);
        }
        slots.insert(Slot::PatternList, SlotStatus::Pending);
        slots.insert(Slot::ActivePattern, SlotStatus::Pending);

        Session {
            device: Some(device),
            access_token: self.access_token.clone(),
            generation: self.generation + 1,
            status,
            slots,
            ..Session::default()
        }
    }

    pub fn disconnected(&self) -> Session {
        Session {
            access_token: self.access_token.clone(),
            generation: self.generation + 1,
            status: "Disconnected".to_string(),
            ..Session::default()
        }
    }

    pub fn tag(&self) -> Option<RequestTag> {
        self.device.as_ref().map(|device| RequestTag {
            device: device.id.clone(),
            generation: self.generation,
        })
    }

    /// Whether a response issued under `tag` still belongs to this session.
    pub fn accepts(&self, tag: &RequestTag) -> bool {
        self.tag().as_ref() == Some(tag)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    pub fn slot_status(&self, slot: Slot) -> SlotStatus {
        self.slots.get(&slot).cloned().unwrap_or_default()
    }

    pub fn field_value(&self, field: Field) -> i64 {
        match field {
            Field::Power => i64::from(self.power),
            Field::Timezone => i64::from(self.timezone_offset),
            Field::Brightness => i64::from(self.brightness),
            Field::ClockOrientation => i64::from(self.clock_flipped),
            Field::Red => i64::from(self.color.r),
            Field::Green => i64::from(self.color.g),
            Field::Blue => i64::from(self.color.b),
            Field::NoiseSpeedX => i64::from(self.noise.speed_x),
            Field::NoiseSpeedY => i64::from(self.noise.speed_y),
            Field::NoiseSpeedZ => i64::from(self.noise.speed_z),
            Field::NoiseScale => i64::from(self.noise.scale),
        }
    }

    pub fn pattern_by_name(&self, name: &str) -> Option<&PatternEntry> {
        let name = name.trim();
        self.patterns
            .iter()
            .find(|entry| entry.name == name)
            .or_else(|| {
                self.patterns
                    .iter()
                    .find(|entry| entry.name.eq_ignore_ascii_case(name))
            })
    }

    pub fn applied(&self, update: SessionUpdate) -> Session {
        let mut next = self.clone();
        match update {
            SessionUpdate::Field {
                field,
                value,
                source,
            } => {
                next.store_field(field, value);
                next.slots.insert(Slot::Field(field), SlotStatus::Ready);
                next.status = match source {
                    UpdateSource::Loaded => field.loaded_status(),
                    UpdateSource::Confirmed => field.confirmed_status(value),
                };
            }
            SessionUpdate::Patterns(patterns) => {
                next.status = format!("Loaded {} patterns", patterns.len());
                next.selected_pattern = next
                    .active_pattern_index
                    .and_then(|index| patterns.iter().find(|entry| entry.index == index))
                    .cloned();
                next.patterns = patterns;
                next.slots.insert(Slot::PatternList, SlotStatus::Ready);
            }
            SessionUpdate::ActivePattern { index, source } => {
                next.active_pattern_index = Some(index);
                next.selected_pattern = next
                    .patterns
                    .iter()
                    .find(|entry| entry.index == index)
                    .cloned();
                next.slots.insert(Slot::ActivePattern, SlotStatus::Ready);
                next.status = match source {
                    UpdateSource::Loaded => "Ready".to_string(),
                    UpdateSource::Confirmed => "Pattern set".to_string(),
                };
            }
            SessionUpdate::Failed { slot, message } => {
                next.slots.insert(slot, SlotStatus::Failed(message.clone()));
                next.status = message;
            }
            SessionUpdate::Status(message) => next.status = message,
            SessionUpdate::Started => next.in_flight += 1,
            SessionUpdate::Finished => next.in_flight = next.in_flight.saturating_sub(1),
        }
        next
    }

    fn store_field(&mut self, field: Field, value: i64) {
        let narrowed = saturate_i32(value);
        match field {
            Field::Power => self.power = value != 0,
            Field::Timezone => self.timezone_offset = narrowed,
            Field::Brightness => self.brightness = narrowed,
            Field::ClockOrientation => self.clock_flipped = value != 0,
            Field::Red => self.color.r = narrowed,
            Field::Green => self.color.g = narrowed,
            Field::Blue => self.color.b = narrowed,
            Field::NoiseSpeedX => self.noise.speed_x = narrowed,
            Field::NoiseSpeedY => self.noise.speed_y = narrowed,
            Field::NoiseSpeedZ => self.noise.speed_z = narrowed,
            Field::NoiseScale => self.noise.scale = narrowed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> DeviceSummary {
        DeviceSummary {
            id: DeviceId::new(id),
            name: Some(format!("clock-{id}")),
            connected: true,
        }
    }

    fn patterns() -> Vec<PatternEntry> {
        ["Rainbow", "Fire", "Noise"]
            .iter()
            .enumerate()
            .map(|(index, name)| PatternEntry {
                index: index as u32,
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn connecting_resets_device_state_and_bumps_generation() {
        let mut session = Session::default().with_access_token(AccessToken::new("tok"));
        session.brightness = 99;
        session.patterns = patterns();

        let next = session.connecting(device("a"));
        assert_eq!(next.generation, session.generation + 1);
        assert_eq!(next.brightness, 0);
        assert!(next.patterns.is_empty());
        assert_eq!(next.access_token, Some(AccessToken::new("tok")));
        assert_eq!(next.slot_status(Slot::Field(Field::Red)), SlotStatus::Pending);
        assert_eq!(next.status, "Connecting to clock-a...");
    }

    #[test]
    fn stale_tags_are_rejected_after_reconnect_or_disconnect() {
        let first = Session::default().connecting(device("a"));
        let tag = first.tag().expect("tag");
        assert!(first.accepts(&tag));

        let reconnected = first.connecting(device("a"));
        assert!(!reconnected.accepts(&tag));
        assert!(!first.disconnected().accepts(&tag));
    }

    #[test]
    fn confirmed_field_takes_the_echoed_value() {
        let session = Session::default().connecting(device("a"));
        let next = session.applied(SessionUpdate::Field {
            field: Field::Brightness,
            value: 255,
            source: UpdateSource::Confirmed,
        });
        assert_eq!(next.brightness, 255);
        assert_eq!(next.status, "Brightness set");
        assert_eq!(
            next.slot_status(Slot::Field(Field::Brightness)),
            SlotStatus::Ready
        );
        // the input is untouched
        assert_eq!(session.brightness, 0);
    }

    #[test]
    fn active_pattern_resolves_against_list_in_either_order() {
        let session = Session::default().connecting(device("a"));

        let index_first = session
            .applied(SessionUpdate::ActivePattern {
                index: 1,
                source: UpdateSource::Loaded,
            })
            .applied(SessionUpdate::Patterns(patterns()));
        assert_eq!(
            index_first.selected_pattern.as_ref().map(|p| p.name.as_str()),
            Some("Fire")
        );

        let list_first = session
            .applied(SessionUpdate::Patterns(patterns()))
            .applied(SessionUpdate::ActivePattern {
                index: 2,
                source: UpdateSource::Confirmed,
            });
        assert_eq!(
            list_first.selected_pattern.as_ref().map(|p| p.name.as_str()),
            Some("Noise")
        );
        assert_eq!(list_first.status, "Pattern set");
    }

    #[test]
    fn failures_mark_only_their_slot() {
        let session = Session::default()
            .connecting(device("a"))
            .applied(SessionUpdate::Failed {
                slot: Slot::Field(Field::Timezone),
                message: "Timed out.".into(),
            });
        assert_eq!(
            session.slot_status(Slot::Field(Field::Timezone)),
            SlotStatus::Failed("Timed out.".into())
        );
        assert_eq!(
            session.slot_status(Slot::Field(Field::Power)),
            SlotStatus::Pending
        );
        assert_eq!(session.status, "Timed out.");
    }

    #[test]
    fn busy_counter_never_underflows() {
        let session = Session::default()
            .applied(SessionUpdate::Started)
            .applied(SessionUpdate::Started)
            .applied(SessionUpdate::Finished);
        assert!(session.is_busy());
        let idle = session
            .applied(SessionUpdate::Finished)
            .applied(SessionUpdate::Finished);
        assert!(!idle.is_busy());
    }

    #[test]
    fn pattern_lookup_prefers_exact_then_case_insensitive() {
        let mut session = Session::default();
        session.patterns = patterns();
        assert_eq!(session.pattern_by_name("fire").map(|p| p.index), Some(1));
        assert_eq!(session.pattern_by_name(" Noise ").map(|p| p.index), Some(2));
        assert!(session.pattern_by_name("Plasma").is_none());
    }
}
