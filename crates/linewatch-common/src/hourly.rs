//! Hourly bucket structure: time slot → per-hour record.
//!
//! The backend always nests hourly values two levels deep
//! (`hourlyData.hourly.h830.sanluong`). The slot is part of the identity of
//! every value, so the structure is kept as a map keyed by [`TimeSlot`] and is
//! never flattened into per-slot scalar fields.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::lenient;

/// Number of numbered defect categories reported per hour.
pub const DEFECT_CATEGORIES: u8 = 14;

/// One of the fixed reporting slots of a production day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeSlot {
    H0830,
    H0930,
    H1030,
    H1130,
    H1330,
    H1430,
    H1530,
    H1630,
    H1800,
    H1900,
    H2000,
}

impl TimeSlot {
    pub const ALL: [TimeSlot; 11] = [
        TimeSlot::H0830,
        TimeSlot::H0930,
        TimeSlot::H1030,
        TimeSlot::H1130,
        TimeSlot::H1330,
        TimeSlot::H1430,
        TimeSlot::H1530,
        TimeSlot::H1630,
        TimeSlot::H1800,
        TimeSlot::H1900,
        TimeSlot::H2000,
    ];

    /// Key used by the backend, e.g. `"h830"`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::H0830 => "h830",
            Self::H0930 => "h930",
            Self::H1030 => "h1030",
            Self::H1130 => "h1130",
            Self::H1330 => "h1330",
            Self::H1430 => "h1430",
            Self::H1530 => "h1530",
            Self::H1630 => "h1630",
            Self::H1800 => "h1800",
            Self::H1900 => "h1900",
            Self::H2000 => "h2000",
        }
    }

    /// Parse a backend slot key. Accepts the legacy `h8h30` spelling as well.
    pub fn from_wire(key: &str) -> Option<Self> {
        let normalized: String = key.chars().filter(|c| *c != 'h').collect();
        Self::ALL
            .into_iter()
            .find(|slot| slot.wire_name()[1..] == normalized && key.starts_with('h'))
    }

    /// Wall-clock label, e.g. `"08:30"`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::H0830 => "08:30",
            Self::H0930 => "09:30",
            Self::H1030 => "10:30",
            Self::H1130 => "11:30",
            Self::H1330 => "13:30",
            Self::H1430 => "14:30",
            Self::H1530 => "15:30",
            Self::H1630 => "16:30",
            Self::H1800 => "18:00",
            Self::H1900 => "19:00",
            Self::H2000 => "20:00",
        }
    }

    pub fn minutes_since_midnight(&self) -> u32 {
        let (h, m) = self.label().split_once(':').unwrap_or(("0", "0"));
        h.parse::<u32>().unwrap_or(0) * 60 + m.parse::<u32>().unwrap_or(0)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Sub-fields of an hourly record that a display can track for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HourlyField {
    Quantity,
    Percentage,
    Rft,
    Inspected,
    Passed,
}

impl HourlyField {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Quantity => "sanluong",
            Self::Percentage => "percentage",
            Self::Rft => "rft",
            Self::Inspected => "tongKiem",
            Self::Passed => "tongDat",
        }
    }
}

/// Count and share of one numbered defect category within an hour.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DefectEntry {
    pub count: f64,
    pub percentage: f64,
}

/// Per-hour record: output, attainment and QC breakdown.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HourlySlot {
    pub quantity: f64,
    pub percentage: f64,
    pub quantity_new: Option<f64>,
    pub percentage_new: Option<f64>,
    pub rft: f64,
    pub inspected: f64,
    pub first_pass: f64,
    pub passed: f64,
    pub rework_bags: f64,
    pub rework_bags_new: f64,
    /// Keyed by defect category number (1-based).
    pub defects: BTreeMap<u8, DefectEntry>,
    pub note: Option<String>,
    pub root_cause: Option<String>,
}

impl HourlySlot {
    pub fn get(&self, field: HourlyField) -> f64 {
        match field {
            HourlyField::Quantity => self.quantity,
            HourlyField::Percentage => self.percentage,
            HourlyField::Rft => self.rft,
            HourlyField::Inspected => self.inspected,
            HourlyField::Passed => self.passed,
        }
    }

    pub fn total_defects(&self) -> f64 {
        self.defects.values().map(|d| d.count).sum()
    }

    /// Build a slot from a backend value. The TV endpoint sends bare
    /// quantities (`"h830": 120`), the production endpoint full records.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self {
                quantity: lenient::number_from_value(value).unwrap_or(0.0),
                ..Self::default()
            };
        };
        let num = |key: &str| obj.get(key).and_then(lenient::number_from_value);
        let text = |key: &str| obj.get(key).and_then(lenient::text_from_value);

        let mut defects = BTreeMap::new();
        for n in 1..=DEFECT_CATEGORIES {
            let count = num(&format!("loi{n}"));
            let percentage = num(&format!("errorpercentage{n}"));
            if count.is_some() || percentage.is_some() {
                defects.insert(
                    n,
                    DefectEntry {
                        count: count.unwrap_or(0.0),
                        percentage: percentage.unwrap_or(0.0),
                    },
                );
            }
        }

        Self {
            quantity: num("sanluong").unwrap_or(0.0),
            percentage: num("percentage").unwrap_or(0.0),
            quantity_new: num("sanluongNew"),
            percentage_new: num("percentageNew"),
            rft: num("rft").unwrap_or(0.0),
            inspected: num("tongKiem").unwrap_or(0.0),
            first_pass: num("datLan1").unwrap_or(0.0),
            passed: num("tongDat").unwrap_or(0.0),
            rework_bags: num("tuiChuaTaiChe").unwrap_or(0.0),
            rework_bags_new: num("tuiChuaTaiCheNew").unwrap_or(0.0),
            defects,
            note: text("duLieu"),
            root_cause: text("nguyenNhan"),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("sanluong".into(), self.quantity.into());
        obj.insert("percentage".into(), self.percentage.into());
        if let Some(q) = self.quantity_new {
            obj.insert("sanluongNew".into(), q.into());
        }
        if let Some(p) = self.percentage_new {
            obj.insert("percentageNew".into(), p.into());
        }
        obj.insert("rft".into(), self.rft.into());
        obj.insert("tongKiem".into(), self.inspected.into());
        obj.insert("datLan1".into(), self.first_pass.into());
        obj.insert("tongDat".into(), self.passed.into());
        obj.insert("tuiChuaTaiChe".into(), self.rework_bags.into());
        obj.insert("tuiChuaTaiCheNew".into(), self.rework_bags_new.into());
        for (n, entry) in &self.defects {
            obj.insert(format!("loi{n}"), entry.count.into());
            obj.insert(format!("errorpercentage{n}"), entry.percentage.into());
        }
        if let Some(note) = &self.note {
            obj.insert("duLieu".into(), note.clone().into());
        }
        if let Some(cause) = &self.root_cause {
            obj.insert("nguyenNhan".into(), cause.clone().into());
        }
        Value::Object(obj)
    }
}

impl Serialize for HourlySlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HourlySlot {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_value(&Value::deserialize(deserializer)?))
    }
}

/// Most recent non-empty hour reported by the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LatestHour {
    #[serde(default, deserialize_with = "lenient::text")]
    pub hour: String,
    #[serde(default, deserialize_with = "lenient::number")]
    pub value: f64,
}

/// Two-level hourly structure attached to a snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawHourly", into = "RawHourly")]
pub struct HourlyData {
    pub hourly: BTreeMap<TimeSlot, HourlySlot>,
    pub cumulative: BTreeMap<TimeSlot, f64>,
    pub total: Option<f64>,
    pub latest: Option<LatestHour>,
}

impl HourlyData {
    pub fn slot(&self, slot: TimeSlot) -> Option<&HourlySlot> {
        self.hourly.get(&slot)
    }

    pub fn is_empty(&self) -> bool {
        self.hourly.is_empty() && self.cumulative.is_empty() && self.total.is_none()
    }

    /// Latest slot that carries a defect breakdown, scanning from the end of the day.
    pub fn latest_with_defects(&self) -> Option<(TimeSlot, &HourlySlot)> {
        self.hourly
            .iter()
            .rev()
            .find(|(_, slot)| !slot.defects.is_empty())
            .map(|(k, v)| (*k, v))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawHourly {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hourly: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cumulative: Option<BTreeMap<String, Value>>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latest: Option<LatestHour>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

impl From<RawHourly> for HourlyData {
    fn from(raw: RawHourly) -> Self {
        // Older payloads put the slots directly under `hourlyData`.
        let slots = raw.hourly.unwrap_or_else(|| {
            raw.rest
                .iter()
                .filter(|(k, _)| TimeSlot::from_wire(k).is_some())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        });

        let hourly = slots
            .iter()
            .filter(|(_, v)| !v.is_null())
            .filter_map(|(k, v)| TimeSlot::from_wire(k).map(|slot| (slot, HourlySlot::from_value(v))))
            .collect();

        let cumulative = raw
            .cumulative
            .unwrap_or_default()
            .iter()
            .filter_map(|(k, v)| {
                let slot = TimeSlot::from_wire(k)?;
                Some((slot, lenient::number_from_value(v)?))
            })
            .collect();

        Self {
            hourly,
            cumulative,
            total: raw.total,
            latest: raw.latest,
        }
    }
}

impl From<HourlyData> for RawHourly {
    fn from(data: HourlyData) -> Self {
        let hourly = data
            .hourly
            .iter()
            .map(|(slot, v)| (slot.wire_name().to_string(), v.to_value()))
            .collect();
        let cumulative = data
            .cumulative
            .iter()
            .map(|(slot, v)| (slot.wire_name().to_string(), Value::from(*v)))
            .collect::<BTreeMap<_, _>>();
        Self {
            hourly: Some(hourly),
            cumulative: (!cumulative.is_empty()).then_some(cumulative),
            total: data.total,
            latest: data.latest,
            rest: BTreeMap::new(),
        }
    }
}
