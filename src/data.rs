use crate::types::{Category, CategoryFilter, Deal};
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde_json::json;

pub static DEALS: [Deal; 12] = [
    Deal {
        id: 1,
        name: "CopyQuick Print Hub",
        category: Category::Print,
        emoji: "🖨️",
        discount: 30,
        distance: "0.3 km",
        lat: 12.9352,
        lng: 77.6245,
        bg_color: "#E0F2FE",
    },
    Deal {
        id: 2,
        name: "Bean & Brew Café",
        category: Category::Cafe,
        emoji: "☕",
        discount: 20,
        distance: "0.5 km",
        lat: 12.9375,
        lng: 77.6210,
        bg_color: "#FEF3C7",
    },
    Deal {
        id: 3,
        name: "Campus Stationers",
        category: Category::Stationery,
        emoji: "✏️",
        discount: 15,
        distance: "0.2 km",
        lat: 12.9340,
        lng: 77.6268,
        bg_color: "#EDE9FE",
    },
    Deal {
        id: 4,
        name: "Tiffin Express",
        category: Category::Food,
        emoji: "🍱",
        discount: 25,
        distance: "0.8 km",
        lat: 12.9398,
        lng: 77.6282,
        bg_color: "#DCFCE7",
    },
    Deal {
        id: 5,
        name: "Chai Sutta Bar",
        category: Category::Cafe,
        emoji: "🫖",
        discount: 35,
        distance: "0.6 km",
        lat: 12.9321,
        lng: 77.6198,
        bg_color: "#FFEDD5",
    },
    Deal {
        id: 6,
        name: "PrintAll Express",
        category: Category::Print,
        emoji: "📄",
        discount: 20,
        distance: "1.1 km",
        lat: 12.9417,
        lng: 77.6231,
        bg_color: "#E0E7FF",
    },
    Deal {
        id: 7,
        name: "Thread & Denim",
        category: Category::Retail,
        emoji: "👕",
        discount: 40,
        distance: "1.4 km",
        lat: 12.9289,
        lng: 77.6302,
        bg_color: "#FCE7F3",
    },
    Deal {
        id: 8,
        name: "HealthFirst Pharmacy",
        category: Category::Medical,
        emoji: "💊",
        discount: 10,
        distance: "0.9 km",
        lat: 12.9366,
        lng: 77.6325,
        bg_color: "#FEE2E2",
    },
    Deal {
        id: 9,
        name: "Metro Cycle Rentals",
        category: Category::Transport,
        emoji: "🚲",
        discount: 50,
        distance: "1.8 km",
        lat: 12.9441,
        lng: 77.6172,
        bg_color: "#CCFBF1",
    },
    Deal {
        id: 10,
        name: "Dosa Corner",
        category: Category::Food,
        emoji: "🥞",
        discount: 15,
        distance: "0.4 km",
        lat: 12.9331,
        lng: 77.6229,
        bg_color: "#FEF9C3",
    },
    Deal {
        id: 11,
        name: "Notebook Nook",
        category: Category::Stationery,
        emoji: "📓",
        discount: 25,
        distance: "1.0 km",
        lat: 12.9308,
        lng: 77.6259,
        bg_color: "#F3E8FF",
    },
    Deal {
        id: 12,
        name: "Gadget Bazaar",
        category: Category::Retail,
        emoji: "🎧",
        discount: 30,
        distance: "2.1 km",
        lat: 12.9456,
        lng: 77.6290,
        bg_color: "#E2E8F0",
    },
];

pub fn find_deal(id: u32) -> Option<&'static Deal> {
    DEALS.iter().find(|d| d.id == id)
}

/// Deals matching the category chip. Computed on demand, never cached.
pub fn filter_deals(deals: &[Deal], category: CategoryFilter) -> Vec<Deal> {
    deals
        .iter()
        .filter(|d| category.matches(d.category))
        .cloned()
        .collect()
}

/// One point feature per deal. `weight` is rebuilt from `discount` every time.
pub fn to_geojson(deals: &[Deal]) -> FeatureCollection {
    let features = deals
        .iter()
        .map(|deal| {
            let mut properties = JsonObject::new();
            properties.insert("id".to_string(), json!(deal.id));
            properties.insert("name".to_string(), json!(deal.name));
            properties.insert("category".to_string(), json!(deal.category));
            properties.insert("discount".to_string(), json!(deal.discount));
            properties.insert("weight".to_string(), json!(deal.weight()));

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(&deal.point()))),
                id: Some(Id::Number(deal.id.into())),
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
