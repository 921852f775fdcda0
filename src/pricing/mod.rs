//! Cost estimation for landscaping designs
//!
//! Real-world nursery and hardscape price ranges keyed by category and
//! container size. Grounds the generated recommendations with a realistic
//! itemized budget instead of asking the model to invent prices.

use crate::generation::types::{CostEstimate, EstimateLine, MaterialItem};

/// (size label, unit price low, unit price high)
type SizePrice = (&'static str, f64, f64);

/// Price table: category → available sizes. Category and size matching is
/// fuzzy (substring, case-insensitive) because material names come from
/// model output.
static PRICE_TABLE: &[(&str, &[SizePrice])] = &[
    // Plants (per unit/pot)
    ("tree", &[
        ("15-gallon", 80.0, 150.0),
        ("24-inch box", 250.0, 500.0),
        ("mature", 800.0, 800.0),
    ]),
    ("shrub", &[("1-gallon", 10.0, 20.0), ("5-gallon", 30.0, 55.0)]),
    ("bush", &[("1-gallon", 10.0, 20.0), ("5-gallon", 30.0, 55.0)]),
    ("grass", &[("1-gallon", 8.0, 15.0), ("plug", 2.0, 5.0)]),
    ("palm", &[
        ("15-gallon", 100.0, 200.0),
        ("per foot of trunk", 100.0, 300.0),
    ]),
    ("bamboo", &[("5-gallon", 40.0, 80.0), ("15-gallon", 120.0, 200.0)]),
    ("hedge", &[
        ("5-gallon", 35.0, 60.0),
        ("per linear foot", 40.0, 100.0),
    ]),
    ("flower", &[("4-inch pot", 3.0, 6.0), ("1-gallon", 10.0, 15.0)]),
    ("perennial", &[("1-gallon", 12.0, 18.0)]),
    ("topiary", &[("shaped 5-gallon", 60.0, 120.0), ("mature shaped", 300.0, 300.0)]),
    // Hardscape (per unit or area)
    ("paver", &[
        ("concrete", 5.0, 10.0),
        ("brick", 8.0, 15.0),
        ("stone", 15.0, 30.0),
    ]),
    ("gravel", &[
        ("pea gravel", 40.0, 60.0),
        ("decorative rock", 100.0, 300.0),
        ("bag", 5.0, 10.0),
    ]),
    ("stone", &[("flagstone", 300.0, 600.0), ("boulder", 100.0, 500.0)]),
    ("mulch", &[("bulk", 30.0, 50.0), ("bag", 4.0, 8.0)]),
    ("edging", &[
        ("plastic", 1.0, 3.0),
        ("metal", 3.0, 8.0),
        ("stone", 5.0, 15.0),
    ]),
    ("retaining wall", &[
        ("block", 15.0, 25.0),
        ("natural stone", 30.0, 60.0),
    ]),
];

/// Look up the unit price range for a material. Falls back to the
/// category's first listed size when the size doesn't match; unknown
/// categories price at zero rather than failing the estimate.
fn unit_price(item: &MaterialItem) -> (f64, f64) {
    let category = item.category.to_lowercase();
    let name = item.name.to_lowercase();
    let size = item.size.to_lowercase();

    let found = PRICE_TABLE
        .iter()
        .find(|(cat, _)| category.contains(cat) || name.contains(cat));

    let Some((_, sizes)) = found else {
        return (0.0, 0.0);
    };

    let matched = sizes
        .iter()
        .find(|(label, _, _)| !size.is_empty() && size.contains(label))
        .or_else(|| sizes.first());

    match matched {
        Some((_, low, high)) => (*low, *high),
        None => (0.0, 0.0),
    }
}

/// Compute an itemized cost estimate for a list of recommended materials
pub fn estimate(items: &[MaterialItem]) -> CostEstimate {
    let mut total_low = 0.0;
    let mut total_high = 0.0;
    let mut line_items = Vec::with_capacity(items.len());

    for item in items {
        let (unit_low, unit_high) = unit_price(item);
        let quantity = item.quantity.max(1);
        let line_low = unit_low * quantity as f64;
        let line_high = unit_high * quantity as f64;

        total_low += line_low;
        total_high += line_high;

        line_items.push(EstimateLine {
            item: item.name.clone(),
            quantity,
            unit_low,
            unit_high,
            total_low: line_low,
            total_high: line_high,
        });
    }

    CostEstimate {
        currency: "USD".to_string(),
        total_low,
        total_high,
        line_items,
    }
}
