use geo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of deal categories. Adding one means touching the catalog and
/// the chip row; nothing is inferred from data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Print,
    #[serde(rename = "Café")]
    Cafe,
    Stationery,
    Food,
    Retail,
    Medical,
    Transport,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Print,
        Category::Cafe,
        Category::Stationery,
        Category::Food,
        Category::Retail,
        Category::Medical,
        Category::Transport,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Print => "Print",
            Category::Cafe => "Café",
            Category::Stationery => "Stationery",
            Category::Food => "Food",
            Category::Retail => "Retail",
            Category::Medical => "Medical",
            Category::Transport => "Transport",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("cafe") {
            return Ok(Category::Cafe);
        }
        Category::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Category chip selection. `All` is the "no filter" chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    pub fn matches(self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(c) => c == category,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CategoryFilter::All => "All",
            CategoryFilter::Only(c) => c.label(),
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CategoryFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(CategoryFilter::All)
        } else {
            s.parse().map(CategoryFilter::Only)
        }
    }
}

impl Serialize for CategoryFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeOfDay {
    Morning,
    #[default]
    Afternoon,
    Evening,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 3] = [TimeOfDay::Morning, TimeOfDay::Afternoon, TimeOfDay::Evening];

    /// Heatmap intensity factor for this part of the day.
    pub fn intensity(self) -> f64 {
        match self {
            TimeOfDay::Morning => 0.6,
            TimeOfDay::Afternoon => 1.0,
            TimeOfDay::Evening => 0.8,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeOfDay::Morning => "Morning",
            TimeOfDay::Afternoon => "Afternoon",
            TimeOfDay::Evening => "Evening",
        }
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeOfDay::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown time of day: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deal {
    pub id: u32,
    pub name: &'static str,
    pub category: Category,
    pub emoji: &'static str,
    pub discount: u8,
    pub distance: &'static str,
    pub lat: f64,
    pub lng: f64,
    pub bg_color: &'static str,
}

impl Deal {
    pub fn point(&self) -> Point<f64> {
        Point::new(self.lng, self.lat)
    }

    pub fn lng_lat(&self) -> LngLat {
        LngLat { lng: self.lng, lat: self.lat }
    }

    /// Heatmap weight, always derived from the discount.
    pub fn weight(&self) -> f64 {
        f64::from(self.discount) / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

/// Pixel position relative to the top-left corner of the map container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}
