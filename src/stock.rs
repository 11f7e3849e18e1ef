//! Stock documents in their three on-disk layouts.
//!
//! ```json
//! flat:      {"00000001700000000000000": "user:pass"}
//! category:  {"netflix": ["user:pass"]}
//! tiered:    {"netflix": {"premium": ["user:pass"], "free": []}}
//! ```
//!
//! A deployment picks one layout; [`Stock`] hides the difference from the
//! command layer. Every layout hands out items oldest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::persistence::{JsonFile, StoreError};

/// Which stock layout a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockSchema {
    #[default]
    Flat,
    Category,
    Tiered,
}

impl StockSchema {
    pub fn uses_categories(self) -> bool {
        !matches!(self, Self::Flat)
    }

    pub fn uses_tiers(self) -> bool {
        matches!(self, Self::Tiered)
    }
}

impl fmt::Display for StockSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => write!(f, "flat"),
            Self::Category => write!(f, "category"),
            Self::Tiered => write!(f, "tiered"),
        }
    }
}

/// Sub-partition of a category in the tiered layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Premium,
    Free,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Premium, Tier::Free];
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Premium => write!(f, "premium"),
            Self::Free => write!(f, "free"),
        }
    }
}

/// Coordinates of a stock container. Unused coordinates are ignored by the
/// layouts that don't have them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    pub category: Option<String>,
    pub tier: Option<Tier>,
}

impl Slot {
    /// Build a slot, normalizing the category name (trimmed, lower-case).
    /// A blank category counts as no category.
    pub fn new(category: Option<&str>, tier: Option<Tier>) -> Self {
        let category = category
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty());
        Self { category, tier }
    }

    /// The whole document.
    pub fn all() -> Self {
        Self::default()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.category, self.tier) {
            (Some(c), Some(t)) => write!(f, "{} ({})", c, t),
            (Some(c), None) => write!(f, "{}", c),
            (None, Some(t)) => write!(f, "{}", t),
            (None, None) => write!(f, "stock"),
        }
    }
}

/// A slot that lacks a coordinate its layout requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("category required")]
    MissingCategory,
    #[error("tier required")]
    MissingTier,
}

/// Both tiers of one category. Both keys are always written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPools {
    #[serde(default)]
    pub premium: VecDeque<String>,
    #[serde(default)]
    pub free: VecDeque<String>,
}

impl TierPools {
    pub fn pool(&self, tier: Tier) -> &VecDeque<String> {
        match tier {
            Tier::Premium => &self.premium,
            Tier::Free => &self.free,
        }
    }

    pub fn pool_mut(&mut self, tier: Tier) -> &mut VecDeque<String> {
        match tier {
            Tier::Premium => &mut self.premium,
            Tier::Free => &mut self.free,
        }
    }

    pub fn len(&self) -> usize {
        self.premium.len() + self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type FlatStock = BTreeMap<String, String>;
pub type CategoryStock = BTreeMap<String, VecDeque<String>>;
pub type TieredStock = BTreeMap<String, TierPools>;

/// One row of a stock summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryLine {
    pub category: Option<String>,
    pub tier: Option<Tier>,
    pub count: usize,
}

/// The loaded stock document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Stock {
    Flat(FlatStock),
    Category(CategoryStock),
    Tiered(TieredStock),
}

/// Width of generated flat keys; zero padding keeps key order equal to
/// insertion order.
const FLAT_KEY_WIDTH: usize = 20;

impl Stock {
    pub fn empty(schema: StockSchema) -> Self {
        match schema {
            StockSchema::Flat => Self::Flat(FlatStock::new()),
            StockSchema::Category => Self::Category(CategoryStock::new()),
            StockSchema::Tiered => Self::Tiered(TieredStock::new()),
        }
    }

    /// Load the document in the given layout. Never fails; see [`JsonFile::load`].
    pub fn load(file: &JsonFile, schema: StockSchema) -> Self {
        match schema {
            StockSchema::Flat => Self::Flat(file.load()),
            StockSchema::Category => Self::Category(file.load()),
            StockSchema::Tiered => Self::Tiered(file.load()),
        }
    }

    /// Load the document for an update. A file that exists but doesn't parse
    /// in this layout is an error, so its contents are never overwritten.
    pub fn try_load(file: &JsonFile, schema: StockSchema) -> Result<Self, StoreError> {
        Ok(match schema {
            StockSchema::Flat => Self::Flat(file.try_load()?),
            StockSchema::Category => Self::Category(file.try_load()?),
            StockSchema::Tiered => Self::Tiered(file.try_load()?),
        })
    }

    pub fn save(&self, file: &JsonFile) -> Result<(), StoreError> {
        file.save(self)
    }

    pub fn schema(&self) -> StockSchema {
        match self {
            Self::Flat(_) => StockSchema::Flat,
            Self::Category(_) => StockSchema::Category,
            Self::Tiered(_) => StockSchema::Tiered,
        }
    }

    /// Check that `slot` names a single container in this layout.
    pub fn require(&self, slot: &Slot) -> Result<(), SlotError> {
        let schema = self.schema();
        if schema.uses_categories() && slot.category.is_none() {
            return Err(SlotError::MissingCategory);
        }
        if schema.uses_tiers() && slot.tier.is_none() {
            return Err(SlotError::MissingTier);
        }
        Ok(())
    }

    pub fn has_stock(&self, slot: &Slot) -> bool {
        self.count(slot) > 0
    }

    /// Items under `slot`. Missing coordinates widen the count: no category
    /// sums every category, no tier sums both tiers.
    pub fn count(&self, slot: &Slot) -> usize {
        match self {
            Self::Flat(items) => items.len(),
            Self::Category(map) => match &slot.category {
                Some(c) => map.get(c).map_or(0, VecDeque::len),
                None => map.values().map(VecDeque::len).sum(),
            },
            Self::Tiered(map) => {
                let count = |pools: &TierPools| match slot.tier {
                    Some(t) => pools.pool(t).len(),
                    None => pools.len(),
                };
                match &slot.category {
                    Some(c) => map.get(c).map_or(0, count),
                    None => map.values().map(count).sum(),
                }
            }
        }
    }

    pub fn total(&self) -> usize {
        self.count(&Slot::all())
    }

    /// Remove and return the oldest item in `slot`, or `None` if it is empty
    /// or not fully addressed.
    pub fn take(&mut self, slot: &Slot) -> Option<String> {
        match self {
            Self::Flat(items) => items.pop_first().map(|(_, item)| item),
            Self::Category(map) => map.get_mut(slot.category.as_ref()?)?.pop_front(),
            Self::Tiered(map) => {
                let tier = slot.tier?;
                map.get_mut(slot.category.as_ref()?)?
                    .pool_mut(tier)
                    .pop_front()
            }
        }
    }

    /// Append `item` to `slot`, creating its containers as needed. `now`
    /// seeds the key of flat items.
    pub fn add(&mut self, slot: &Slot, item: String, now: DateTime<Utc>) -> Result<(), SlotError> {
        self.require(slot)?;
        match self {
            Self::Flat(items) => {
                let key = next_flat_key(items, now.timestamp_micros());
                items.insert(key, item);
            }
            Self::Category(map) => {
                let category = slot.category.clone().ok_or(SlotError::MissingCategory)?;
                map.entry(category).or_default().push_back(item);
            }
            Self::Tiered(map) => {
                let category = slot.category.clone().ok_or(SlotError::MissingCategory)?;
                let tier = slot.tier.ok_or(SlotError::MissingTier)?;
                map.entry(category).or_default().pool_mut(tier).push_back(item);
            }
        }
        Ok(())
    }

    /// Per-container counts, in category order (premium before free).
    pub fn summary(&self) -> Vec<SummaryLine> {
        match self {
            Self::Flat(items) => vec![SummaryLine {
                category: None,
                tier: None,
                count: items.len(),
            }],
            Self::Category(map) => map
                .iter()
                .map(|(c, items)| SummaryLine {
                    category: Some(c.clone()),
                    tier: None,
                    count: items.len(),
                })
                .collect(),
            Self::Tiered(map) => map
                .iter()
                .flat_map(|(c, pools)| {
                    Tier::ALL.into_iter().map(move |t| SummaryLine {
                        category: Some(c.clone()),
                        tier: Some(t),
                        count: pools.pool(t).len(),
                    })
                })
                .collect(),
        }
    }

    /// Categories holding at least one item.
    pub fn available_categories(&self) -> Vec<String> {
        match self {
            Self::Flat(_) => Vec::new(),
            Self::Category(map) => map
                .iter()
                .filter(|(_, items)| !items.is_empty())
                .map(|(c, _)| c.clone())
                .collect(),
            Self::Tiered(map) => map
                .iter()
                .filter(|(_, pools)| !pools.is_empty())
                .map(|(c, _)| c.clone())
                .collect(),
        }
    }
}

/// Next free key at or after `now_micros`, and after every key this
/// function generated before. Keys of other shapes sort after ours and are
/// handed out last. Once the numeric range is used up, keys fall back to
/// `~N`, which also sorts last.
fn next_flat_key(items: &FlatStock, now_micros: i64) -> String {
    let floor = items
        .keys()
        .rev()
        .filter(|k| k.len() == FLAT_KEY_WIDTH)
        .find_map(|k| k.parse::<u64>().ok())
        .map_or(0, |n| n.saturating_add(1));
    let start = (now_micros.max(0) as u64).max(floor);
    (start..=u64::MAX)
        .map(|n| format!("{:0width$}", n, width = FLAT_KEY_WIDTH))
        .find(|key| !items.contains_key(key))
        .unwrap_or_else(|| {
            (0..)
                .map(|i: u64| format!("~{}", i))
                .find(|key| !items.contains_key(key))
                .unwrap_or_default()
        })
}
