// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Domain snapshot types.
//!
//! A [`VillageSnapshot`] is always rebuilt from the full set of pages fetched
//! for that village and replaces the previous one as a whole. Managers only
//! ever see a shared, read-only [`Snapshot`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extraction::text::{parse_clock, parse_int};
use crate::extraction::{PagePayload, Record};

pub type VillageId = u64;
pub type SlotId = u32;

// ── Military buildings ───────────────────────────────────────────────────────

/// Buildings that train troops. Each maps to one game-type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingKind {
    Barracks,
    Stable,
    Workshop,
}

impl BuildingKind {
    pub const ALL: [BuildingKind; 3] = [Self::Barracks, Self::Stable, Self::Workshop];

    pub fn gid(self) -> u32 {
        match self {
            Self::Barracks => 19,
            Self::Stable => 20,
            Self::Workshop => 21,
        }
    }

    pub fn from_gid(gid: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.gid() == gid)
    }

    /// Page name used for fetches and the pattern table.
    pub fn page_name(self) -> &'static str {
        match self {
            Self::Barracks => "barracks",
            Self::Stable => "stable",
            Self::Workshop => "workshop",
        }
    }
}

impl std::fmt::Display for BuildingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.page_name())
    }
}

impl std::str::FromStr for BuildingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "barracks" => Ok(Self::Barracks),
            "stable" => Ok(Self::Stable),
            "workshop" => Ok(Self::Workshop),
            other => Err(format!("unknown building kind {other:?}")),
        }
    }
}

// ── Village state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStock {
    pub lumber: u64,
    pub clay: u64,
    pub iron: u64,
    pub crop: u64,
}

impl ResourceStock {
    pub fn all_at_least(&self, floor: u64) -> bool {
        self.lumber >= floor && self.clay >= floor && self.iron >= floor && self.crop >= floor
    }
}

/// Hourly production. Crop may be negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Production {
    pub lumber: i64,
    pub clay: i64,
    pub iron: i64,
    pub crop: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub warehouse: u64,
    pub granary: u64,
}

/// A building or resource field occupying one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingRecord {
    pub slot_id: SlotId,
    pub gid: u32,
    pub name: String,
    pub level: u32,
    pub in_progress: bool,
    pub remaining_secs: Option<u64>,
}

/// One entry of the village's construction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionItem {
    pub building_name: String,
    pub level: u32,
    pub remaining_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroopCount {
    pub unit: String,
    pub name: String,
    pub count: u64,
}

/// A unit offered on a military building page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainableTroop {
    pub troop_id: String,
    pub name: String,
}

/// Village identity plus the incoming-attack summary from the village list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillageSummary {
    pub id: VillageId,
    pub name: String,
    /// Incoming movement count by symbol color. Coarse: no arrival times.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub incoming: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VillageSnapshot {
    pub id: VillageId,
    pub name: String,
    pub tribe: Option<u32>,
    pub resources: ResourceStock,
    pub capacity: Capacity,
    pub production: Production,
    /// Resource fields followed by center buildings, ordered by slot.
    pub buildings: Vec<BuildingRecord>,
    pub construction: Vec<ConstructionItem>,
    pub troops: Vec<TroopCount>,
    pub trainable: BTreeMap<BuildingKind, Vec<TrainableTroop>>,
    /// Raw scraped payload per page name.
    pub pages: BTreeMap<String, PagePayload>,
}

impl VillageSnapshot {
    /// Assemble a snapshot from every page fetched for the village so far.
    pub fn from_pages(summary: &VillageSummary, pages: BTreeMap<String, PagePayload>) -> Self {
        let mut snap = VillageSnapshot {
            id: summary.id,
            name: summary.name.clone(),
            ..Default::default()
        };

        if let Some(dorf1) = pages.get("dorf1") {
            let f = &dorf1.fields;
            if let Some(name) = f.text("villageName") {
                snap.name = name.to_string();
            }
            snap.tribe = f.number("tribe").map(|t| t as u32);
            let stock = |k: &str| f.number(k).unwrap_or(0).max(0) as u64;
            snap.resources = ResourceStock {
                lumber: stock("lumber"),
                clay: stock("clay"),
                iron: stock("iron"),
                crop: stock("crop"),
            };
            snap.capacity = Capacity {
                warehouse: stock("warehouseCapacity"),
                granary: stock("granaryCapacity"),
            };
            let rate = |k: &str| f.number(k).unwrap_or(0);
            snap.production = Production {
                lumber: rate("productionLumber"),
                clay: rate("productionClay"),
                iron: rate("productionIron"),
                crop: rate("productionCrop"),
            };
            snap.construction = f
                .list("constructionQueue")
                .iter()
                .filter_map(construction_item)
                .collect();
            snap.troops = f.list("troops").iter().filter_map(troop_count).collect();
            snap.buildings
                .extend(f.list("resourceFields").iter().filter_map(|r| building(r, "slotId")));
        }

        if let Some(dorf2) = pages.get("dorf2") {
            snap.buildings
                .extend(dorf2.fields.list("buildings").iter().filter_map(|r| building(r, "slotId")));
        }

        snap.buildings.sort_by_key(|b| b.slot_id);
        snap.buildings.dedup_by_key(|b| b.slot_id);
        for b in &mut snap.buildings {
            if let Some(item) = snap
                .construction
                .iter()
                .find(|c| c.building_name == b.name && c.level > b.level)
            {
                b.in_progress = true;
                b.remaining_secs = Some(item.remaining_secs);
            }
        }

        for kind in BuildingKind::ALL {
            let Some(page) = pages.get(kind.page_name()) else {
                continue;
            };
            let troops: Vec<TrainableTroop> = page
                .fields
                .list("trainableTroops")
                .iter()
                .filter_map(|r| {
                    Some(TrainableTroop {
                        troop_id: r.get("troopId")?.clone(),
                        name: r.get("name").cloned().unwrap_or_default(),
                    })
                })
                .collect();
            snap.trainable.insert(kind, troops);
        }

        snap.pages = pages;
        snap
    }

    pub fn builder_idle(&self) -> bool {
        self.construction.is_empty()
    }

    /// Seconds until the current construction finishes, if any.
    pub fn builder_remaining(&self) -> Option<u64> {
        self.construction.iter().map(|c| c.remaining_secs).min()
    }

    pub fn building(&self, slot: SlotId) -> Option<&BuildingRecord> {
        self.buildings.iter().find(|b| b.slot_id == slot)
    }

    pub fn level_of(&self, slot: SlotId) -> Option<u32> {
        self.building(slot).map(|b| b.level)
    }

    /// Slot of the first building with game type `gid`.
    pub fn slot_of_gid(&self, gid: u32) -> Option<SlotId> {
        self.buildings.iter().find(|b| b.gid == gid).map(|b| b.slot_id)
    }
}

fn building(r: &Record, slot_key: &str) -> Option<BuildingRecord> {
    Some(BuildingRecord {
        slot_id: r.get(slot_key)?.parse().ok()?,
        gid: r.get("gid")?.parse().ok()?,
        name: r.get("name").cloned().unwrap_or_default(),
        level: r.get("level").and_then(|l| l.parse().ok()).unwrap_or(0),
        in_progress: false,
        remaining_secs: None,
    })
}

fn construction_item(r: &Record) -> Option<ConstructionItem> {
    Some(ConstructionItem {
        building_name: r.get("buildingName")?.clone(),
        level: r.get("level").and_then(|l| l.parse().ok()).unwrap_or(0),
        remaining_secs: r.get("remainingTime").and_then(|t| parse_clock(t)).unwrap_or(0),
    })
}

fn troop_count(r: &Record) -> Option<TroopCount> {
    Some(TroopCount {
        unit: r.get("unitClass")?.clone(),
        name: r
            .get("displayName")
            .or_else(|| r.get("unitName"))
            .cloned()
            .unwrap_or_default(),
        count: r.get("count").and_then(|c| parse_int(c)).unwrap_or(0).max(0) as u64,
    })
}

// ── Aggregate ────────────────────────────────────────────────────────────────

/// All villages after one fetch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub villages: BTreeMap<VillageId, VillageSnapshot>,
    /// Village list in page order, with coarse attack counts.
    pub summaries: Vec<VillageSummary>,
    pub taken_at: DateTime<Utc>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            villages: BTreeMap::new(),
            summaries: Vec::new(),
            taken_at: Utc::now(),
        }
    }
}

impl Snapshot {
    pub fn village(&self, id: VillageId) -> Option<&VillageSnapshot> {
        self.villages.get(&id)
    }

    pub fn summary(&self, id: VillageId) -> Option<&VillageSummary> {
        self.summaries.iter().find(|s| s.id == id)
    }

    /// Shortest builder remaining time across all villages.
    pub fn shortest_construction(&self) -> Option<u64> {
        self.villages.values().filter_map(|v| v.builder_remaining()).min()
    }
}

// ── Movements ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Attack,
    Raid,
    Reinforcement,
    Return,
    Unknown,
}

impl MovementKind {
    pub fn from_label(label: &str) -> Self {
        match label {
            "attack" => Self::Attack,
            "raid" => Self::Raid,
            "reinforcement" => Self::Reinforcement,
            "return" => Self::Return,
            _ => Self::Unknown,
        }
    }

    pub fn is_hostile(self) -> bool {
        matches!(self, Self::Attack | Self::Raid)
    }
}

/// How much an incoming-movement report can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Counts by symbol color from the village list; no arrival time.
    Coarse,
    /// Rows of the rally point incoming table.
    Detailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMovement {
    pub kind: MovementKind,
    pub count: u32,
    pub origin: Option<String>,
    pub arrival_in_secs: Option<u64>,
}

/// A farm list as listed on the rally point farm tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmListInfo {
    pub id: u64,
    pub name: String,
    pub slots: u32,
    pub owner_village: Option<VillageId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{parse_page, PatternTable};

    const DORF1: &str = r#"
<input id="villageName" class="villageInput" value="Capital">
<div id="resourceFieldContainer" class="village1 tribe3">
<a class="good level colorLayer resourceField gid1 buildingSlot1 level4" data-aid="1" data-gid="1" title="Woodcutter&lt;br&gt;">
<a class="good level colorLayer resourceField gid4 buildingSlot2 level2" data-aid="2" data-gid="4" title="Cropland">
<div id="l1" class="value">&#x202d;1.200&#x202c;</div>
<div id="l2" class="value">&#x202d;800&#x202c;</div>
<div id="l3" class="value">&#x202d;950&#x202c;</div>
<div id="l4" class="value">&#x202d;60&#x202c;</div>
<div class="buildingList"><ul><li>
<div class="name">Woodcutter <span class="lvl">Level 5</span></div>
<div class="buildDuration"><span class="timer" value="125">0:02:05</span></div>
</li></ul></div>
"#;

    const DORF2: &str = r#"
<div class="buildingSlot a19 g16 aid19 roman" data-aid="19" data-gid="16" data-name="Rally Point"> <a href="/build.php?id=19" data-level="1"></a></div>
<div class="buildingSlot a26 g19 aid26 roman" data-aid="26" data-gid="19" data-name="Barracks"> <a href="/build.php?id=26" data-level="3"></a></div>
"#;

    fn snapshot() -> VillageSnapshot {
        let table = PatternTable::embedded().unwrap();
        let mut pages = BTreeMap::new();
        pages.insert("dorf1".to_string(), parse_page(&table, "dorf1", DORF1));
        pages.insert("dorf2".to_string(), parse_page(&table, "dorf2", DORF2));
        let summary = VillageSummary {
            id: 501,
            name: "from list".into(),
            incoming: BTreeMap::new(),
        };
        VillageSnapshot::from_pages(&summary, pages)
    }

    #[test]
    fn test_snapshot_from_pages() {
        let s = snapshot();
        assert_eq!(s.id, 501);
        assert_eq!(s.name, "Capital");
        assert_eq!(s.tribe, Some(3));
        assert_eq!(s.resources.lumber, 1200);
        assert_eq!(s.resources.crop, 60);
        assert!(!s.resources.all_at_least(100));
        assert_eq!(s.level_of(1), Some(4));
        assert_eq!(s.level_of(26), Some(3));
        assert_eq!(s.slot_of_gid(16), Some(19));
        assert_eq!(s.construction.len(), 1);
        assert_eq!(s.builder_remaining(), Some(125));
        assert!(!s.builder_idle());
    }

    #[test]
    fn test_in_progress_flag_from_construction_list() {
        let s = snapshot();
        let woodcutter = s.building(1).unwrap();
        assert!(woodcutter.in_progress);
        assert_eq!(woodcutter.remaining_secs, Some(125));
        assert!(!s.building(2).unwrap().in_progress);
    }

    #[test]
    fn test_building_kind_gids() {
        assert_eq!(BuildingKind::from_gid(20), Some(BuildingKind::Stable));
        assert_eq!(BuildingKind::from_gid(16), None);
        assert_eq!("Workshop".parse::<BuildingKind>().unwrap(), BuildingKind::Workshop);
    }
}
