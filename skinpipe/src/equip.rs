//! Equip-slot classification of mesh node names.
//!
//! Classification is a pure function of the name so it can be tested against
//! literal name lists; [`EquipSelection`] stores which node is active per slot.

use crate::Error;
use std::fmt;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub enum EquipCategory {
    Face,
    Head,
    Chest,
    Hands,
    Legs,
    Feet,
}

impl EquipCategory {
    pub const ALL: [EquipCategory; 6] = [
        Self::Face,
        Self::Head,
        Self::Chest,
        Self::Hands,
        Self::Legs,
        Self::Feet,
    ];

    /// Lowercase node-name prefix that selects this category.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Face => "eq_face",
            Self::Head => "eq_head",
            Self::Chest => "eq_chest",
            Self::Hands => "eq_hands",
            Self::Legs => "eq_legs",
            Self::Feet => "eq_feet",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Head => "head",
            Self::Chest => "chest",
            Self::Hands => "hands",
            Self::Legs => "legs",
            Self::Feet => "feet",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EquipCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for EquipCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "face" => Ok(Self::Face),
            "head" | "hair" => Ok(Self::Head),
            "chest" => Ok(Self::Chest),
            "hands" => Ok(Self::Hands),
            "legs" => Ok(Self::Legs),
            "feet" => Ok(Self::Feet),
            other => Err(Error::invalid(format!("unknown equip category '{other}'"))),
        }
    }
}

/// Case-insensitive prefix classification; `None` for base geometry.
pub fn classify(name: &str) -> Option<EquipCategory> {
    let lower = name.to_ascii_lowercase();
    EquipCategory::ALL
        .into_iter()
        .find(|c| lower.starts_with(c.prefix()))
}

const WEAPON_TOKENS: [&str; 14] = [
    "weapon", "blade", "dagger", "katana", "sword", "pistol", "shotgun", "rifle", "smg", "rocket",
    "grenade", "muzzle", "cartridge", "medikit",
];

/// Name-token heuristic for held items baked into character files.
pub fn is_weapon_like(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    WEAPON_TOKENS.iter().any(|t| lower.contains(t))
}

/// At most one selected node name per category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EquipSelection {
    slots: [Option<String>; 6],
}

impl EquipSelection {
    pub fn get(&self, category: EquipCategory) -> Option<&str> {
        self.slots[category.slot()].as_deref()
    }

    pub fn set(&mut self, category: EquipCategory, name: impl Into<String>) {
        self.slots[category.slot()] = Some(name.into());
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_selected(&self, category: EquipCategory, name: &str) -> bool {
        self.get(category)
            .is_some_and(|selected| selected.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (EquipCategory, &str)> + '_ {
        EquipCategory::ALL
            .into_iter()
            .filter_map(|c| self.get(c).map(|n| (c, n)))
    }
}

/// Merge rule applied on every rebuild.
///
/// Weapon-like nodes are dropped unless forced visible. Without any
/// classifiable node in the model every remaining node is shown; otherwise
/// base geometry is always shown and equip nodes only when selected.
pub fn node_visible(
    name: &str,
    force_visible: bool,
    selection: &EquipSelection,
    has_equip_nodes: bool,
) -> bool {
    if !force_visible && is_weapon_like(name) {
        return false;
    }
    if !has_equip_nodes {
        return true;
    }
    match classify(name) {
        None => true,
        Some(category) => selection.is_selected(category, name),
    }
}
