// Filter sheet toggles and their translation into backend filter clauses

use serde::{Deserialize, Serialize};

use crate::models::{Condition, FilterClause, FilterValue};

pub const PRICE_FIELD: &str = "exceptedPrice";
pub const FUEL_FIELD: &str = "fuelType";
pub const MILEAGE_FIELD: &str = "km";
pub const TRANSMISSION_FIELD: &str = "transmissionType";

// Largest integer a JSON number can carry without precision loss; upper bound of "6L - ..."
const OPEN_ENDED_PRICE: i64 = 9_007_199_254_740_991;

const PRICE_RANGES: [(i64, i64); 4] = [
    (0, 100_000),
    (100_000, 300_000),
    (300_000, 600_000),
    (600_000, OPEN_ENDED_PRICE),
];
const FUEL_TYPES: [&str; 5] = ["Petrol", "Diesel", "CNG", "EV", "Hybrid"];
const MILEAGE_RANGES: [(i64, i64); 3] = [(0, 50_000), (50_000, 100_000), (100_000, 1_000_000)];
const TRANSMISSIONS: [&str; 2] = ["Manual", "Automatic"];

/// One chip on the filter sheet.
///
/// Serialized with the short ids the mobile client uses (`pr0`, `ft3`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOption {
    #[serde(rename = "pr0")]
    PriceUnder1L,
    #[serde(rename = "pr1")]
    Price1To3L,
    #[serde(rename = "pr2")]
    Price3To6L,
    #[serde(rename = "pr3")]
    PriceOver6L,
    #[serde(rename = "ft1")]
    Petrol,
    #[serde(rename = "ft2")]
    Diesel,
    #[serde(rename = "ft3")]
    Cng,
    #[serde(rename = "ft4")]
    Ev,
    #[serde(rename = "ft5")]
    Hybrid,
    #[serde(rename = "mr1")]
    KmUnder50k,
    #[serde(rename = "mr2")]
    Km50kTo100k,
    #[serde(rename = "mr3")]
    KmOver100k,
    #[serde(rename = "tr1")]
    Manual,
    #[serde(rename = "tr2")]
    Automatic,
}

/// The fourteen filter-sheet booleans, grouped by bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleSet {
    pub price: [bool; 4],
    pub fuel: [bool; 5],
    pub mileage: [bool; 3],
    pub transmission: [bool; 2],
}

impl ToggleSet {
    fn slot(&mut self, option: FilterOption) -> &mut bool {
        use FilterOption::*;
        match option {
            PriceUnder1L => &mut self.price[0],
            Price1To3L => &mut self.price[1],
            Price3To6L => &mut self.price[2],
            PriceOver6L => &mut self.price[3],
            Petrol => &mut self.fuel[0],
            Diesel => &mut self.fuel[1],
            Cng => &mut self.fuel[2],
            Ev => &mut self.fuel[3],
            Hybrid => &mut self.fuel[4],
            KmUnder50k => &mut self.mileage[0],
            Km50kTo100k => &mut self.mileage[1],
            KmOver100k => &mut self.mileage[2],
            Manual => &mut self.transmission[0],
            Automatic => &mut self.transmission[1],
        }
    }

    // Flips one chip and returns its new state
    pub fn toggle(&mut self, option: FilterOption) -> bool {
        let slot = self.slot(option);
        *slot = !*slot;
        *slot
    }

    #[cfg(test)]
    pub fn set(&mut self, option: FilterOption, enabled: bool) {
        *self.slot(option) = enabled;
    }

    pub fn clear(&mut self) {
        *self = ToggleSet::default();
    }

    pub fn selected_count(&self) -> usize {
        self.price
            .iter()
            .chain(self.fuel.iter())
            .chain(self.mileage.iter())
            .chain(self.transmission.iter())
            .filter(|on| **on)
            .count()
    }

    // The APPLY button is only enabled with at least one chip selected
    pub fn any_selected(&self) -> bool {
        self.selected_count() > 0
    }

    /// Translates the toggles into backend clauses, bucket by bucket.
    ///
    /// Enumerated buckets yield a single `==` clause for one selection and a
    /// single `in` clause for several. Range buckets yield a `>=`/`<=` pair
    /// from the lowest selected lower bound to the highest selected upper
    /// bound, so `< 1L` + `6L - ...` also matches everything in between (see
    /// [`ToggleSet::spanned_gaps`]).
    pub fn to_clauses(&self) -> Vec<FilterClause> {
        let mut clauses = Vec::new();
        clauses.extend(range_clauses(PRICE_FIELD, &PRICE_RANGES, &self.price));
        clauses.extend(choice_clause(FUEL_FIELD, &FUEL_TYPES, &self.fuel));
        clauses.extend(range_clauses(MILEAGE_FIELD, &MILEAGE_RANGES, &self.mileage));
        clauses.extend(choice_clause(TRANSMISSION_FIELD, &TRANSMISSIONS, &self.transmission));
        clauses
    }

    // Range fields whose emitted span also covers a sub-range the user did not select
    pub fn spanned_gaps(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if has_gap(&self.price) {
            fields.push(PRICE_FIELD);
        }
        if has_gap(&self.mileage) {
            fields.push(MILEAGE_FIELD);
        }
        fields
    }
}

fn range_clauses(field: &str, ranges: &[(i64, i64)], selected: &[bool]) -> Vec<FilterClause> {
    let chosen: Vec<(i64, i64)> = ranges
        .iter()
        .zip(selected)
        .filter(|(_, on)| **on)
        .map(|(range, _)| *range)
        .collect();

    let (Some(min), Some(max)) = (
        chosen.iter().map(|(lo, _)| *lo).min(),
        chosen.iter().map(|(_, hi)| *hi).max(),
    ) else {
        return Vec::new();
    };

    vec![
        FilterClause::new(field, Condition::Gte, min),
        FilterClause::new(field, Condition::Lte, max),
    ]
}

fn choice_clause(field: &str, options: &[&str], selected: &[bool]) -> Option<FilterClause> {
    let mut chosen: Vec<String> = options
        .iter()
        .zip(selected)
        .filter(|(_, on)| **on)
        .map(|(name, _)| name.to_string())
        .collect();

    match chosen.len() {
        0 => None,
        1 => Some(FilterClause::new(field, Condition::Eq, FilterValue::Text(chosen.remove(0)))),
        _ => Some(FilterClause::new(field, Condition::In, FilterValue::List(chosen))),
    }
}

// Adjacent sub-ranges share their boundary, so a gap is an unselected slot between two selected ones
fn has_gap(selected: &[bool]) -> bool {
    let first = selected.iter().position(|on| *on);
    let last = selected.iter().rposition(|on| *on);
    match (first, last) {
        (Some(first), Some(last)) => selected[first..=last].iter().any(|on| !*on),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FilterOption::*;

    fn with(options: &[FilterOption]) -> ToggleSet {
        let mut toggles = ToggleSet::default();
        for option in options {
            toggles.set(*option, true);
        }
        toggles
    }

    #[test]
    fn no_toggles_no_clauses() {
        let toggles = ToggleSet::default();
        assert!(toggles.to_clauses().is_empty());
        assert!(!toggles.any_selected());
    }

    #[test]
    fn adjacent_price_ranges_span_union() {
        let clauses = with(&[Price1To3L, Price3To6L]).to_clauses();
        assert_eq!(
            clauses,
            vec![
                FilterClause::new(PRICE_FIELD, Condition::Gte, 100_000),
                FilterClause::new(PRICE_FIELD, Condition::Lte, 600_000),
            ]
        );
    }

    #[test]
    fn disjoint_ranges_use_lowest_and_highest_bound() {
        let toggles = with(&[PriceUnder1L, PriceOver6L, KmUnder50k, KmOver100k]);
        let clauses = toggles.to_clauses();
        assert_eq!(clauses[0], FilterClause::new(PRICE_FIELD, Condition::Gte, 0));
        assert_eq!(clauses[1], FilterClause::new(PRICE_FIELD, Condition::Lte, OPEN_ENDED_PRICE));
        assert_eq!(clauses[2], FilterClause::new(MILEAGE_FIELD, Condition::Gte, 0));
        assert_eq!(clauses[3], FilterClause::new(MILEAGE_FIELD, Condition::Lte, 1_000_000));
        assert_eq!(toggles.spanned_gaps(), vec![PRICE_FIELD, MILEAGE_FIELD]);
    }

    #[test]
    fn single_mileage_range_is_used_directly() {
        let clauses = with(&[Km50kTo100k]).to_clauses();
        assert_eq!(
            clauses,
            vec![
                FilterClause::new(MILEAGE_FIELD, Condition::Gte, 50_000),
                FilterClause::new(MILEAGE_FIELD, Condition::Lte, 100_000),
            ]
        );
        assert!(with(&[Km50kTo100k, KmOver100k]).spanned_gaps().is_empty());
    }

    #[test]
    fn every_fuel_combination_yields_exactly_one_clause() {
        let fuels = [Petrol, Diesel, Cng, Ev, Hybrid];
        for mask in 1u32..(1 << fuels.len()) {
            let picked: Vec<FilterOption> = fuels
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, o)| *o)
                .collect();
            let clauses = with(&picked).to_clauses();
            assert_eq!(clauses.len(), 1, "mask {mask:#b}");
            let clause = &clauses[0];
            assert_eq!(clause.field, FUEL_FIELD);
            match picked.len() {
                1 => assert_eq!(clause.condition, Condition::Eq),
                n => {
                    assert_eq!(clause.condition, Condition::In);
                    let FilterValue::List(values) = &clause.value else {
                        panic!("membership clause must carry a list");
                    };
                    assert_eq!(values.len(), n);
                }
            }
        }
    }

    #[test]
    fn transmission_single_and_both() {
        assert_eq!(
            with(&[Automatic]).to_clauses(),
            vec![FilterClause::new(TRANSMISSION_FIELD, Condition::Eq, "Automatic")]
        );
        assert_eq!(
            with(&[Manual, Automatic]).to_clauses(),
            vec![FilterClause::new(
                TRANSMISSION_FIELD,
                Condition::In,
                FilterValue::List(vec!["Manual".into(), "Automatic".into()])
            )]
        );
    }

    #[test]
    fn buckets_are_emitted_in_sheet_order() {
        let clauses = with(&[Manual, KmUnder50k, Diesel, PriceUnder1L]).to_clauses();
        let fields: Vec<&str> = clauses.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![PRICE_FIELD, PRICE_FIELD, FUEL_FIELD, MILEAGE_FIELD, MILEAGE_FIELD, TRANSMISSION_FIELD]
        );
    }

    #[test]
    fn toggle_flips_and_counts() {
        let mut toggles = ToggleSet::default();
        assert!(toggles.toggle(Ev));
        assert!(toggles.toggle(Manual));
        assert_eq!(toggles.selected_count(), 2);
        assert!(!toggles.toggle(Ev));
        assert_eq!(toggles.selected_count(), 1);
        toggles.clear();
        assert_eq!(toggles, ToggleSet::default());
    }

    #[test]
    fn option_ids_match_client() {
        let option: FilterOption = serde_json::from_str("\"ft3\"").unwrap();
        assert_eq!(option, Cng);
        assert_eq!(serde_json::to_string(&PriceOver6L).unwrap(), "\"pr3\"");
    }
}
