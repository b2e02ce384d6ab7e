//! Wardrobe item and outfit types.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "id": 42,
//!     "category": "upper",
//!     "name": "Linen shirt",
//!     "color": "white",
//!     "brand": "Acme",
//!     "imageUrl": "https://cdn.cloz.app/items/42.jpg"
//! }
//! ```

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Wardrobe category of an item.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Upper garments: shirts, sweaters, jackets.
    Upper,
    /// Bottoms: trousers, skirts, shorts.
    Bottom,
    /// Footwear.
    Shoes,
    /// Accessories: bags, belts, jewelry.
    Accessory,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upper => "upper",
            Self::Bottom => "bottom",
            Self::Shoes => "shoes",
            Self::Accessory => "accessory",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upper" => Ok(Self::Upper),
            "bottom" => Ok(Self::Bottom),
            "shoes" => Ok(Self::Shoes),
            "accessory" => Ok(Self::Accessory),
            other => Err(Error::invalid_argument(format!(
                "unknown wardrobe category: {other}"
            ))),
        }
    }
}

/// A single catalogued garment or accessory.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WardrobeItem {
    /// Server-assigned identifier.
    pub id: u64,

    /// Wardrobe category.
    pub category: Category,

    /// Display name.
    pub name: String,

    /// Dominant color, if catalogued.
    #[serde(default)]
    pub color: Option<String>,

    /// Brand, if catalogued.
    #[serde(default)]
    pub brand: Option<String>,

    /// Photo location on the CDN, if one was uploaded.
    #[serde(default)]
    pub image_url: Option<Url>,
}

/// Payload for cataloguing a new item or replacing an existing one.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWardrobeItem {
    /// Wardrobe category.
    pub category: Category,

    /// Display name.
    pub name: String,

    /// Dominant color.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Brand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
}

/// A composed outfit referencing catalogued items.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outfit {
    /// Server-assigned identifier.
    pub id: u64,

    /// Display name.
    pub name: String,

    /// Items making up the outfit, by id.
    #[serde(default)]
    pub item_ids: Vec<u64>,
}

/// Payload for composing a new outfit.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOutfit {
    /// Display name.
    pub name: String,

    /// Items making up the outfit, by id.
    pub item_ids: Vec<u64>,
}
