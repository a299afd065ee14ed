mod common;

use std::sync::OnceLock;

use claim_freq::bundle::Bundle;
use claim_freq::domain::{FieldValue, RawRow};
use proptest::prelude::*;

fn bundle() -> &'static Bundle {
    static BUNDLE: OnceLock<Bundle> = OnceLock::new();
    BUNDLE.get_or_init(|| common::portfolio_bundle(5_000, 17))
}

fn row(area: &str, brand: &str, power: f64, age: f64, exposure: f64) -> RawRow {
    RawRow::from([
        ("area".to_string(), FieldValue::from(area)),
        ("vehicle_brand".to_string(), FieldValue::from(brand)),
        ("vehicle_gas".to_string(), FieldValue::from("Regular")),
        ("region".to_string(), FieldValue::from("R11")),
        ("vehicle_power".to_string(), FieldValue::Number(power)),
        ("vehicle_age".to_string(), FieldValue::Number(age)),
        ("driver_age".to_string(), FieldValue::Number(45.0)),
        ("bonus_malus".to_string(), FieldValue::Number(60.0)),
        ("density".to_string(), FieldValue::Number(500.0)),
        ("exposure".to_string(), FieldValue::Number(exposure)),
    ])
}

proptest! {
    #[test]
    fn predictions_are_deterministic_and_batch_independent(
        area in "[A-F]",
        brand in prop::sample::select(vec!["B1", "B2", "B12", "B3", "B10", "B42"]),
        power in 4.0f64..15.0,
        age in 0.0f64..20.0,
        exposure in 0.01f64..=1.0,
    ) {
        let b = bundle();
        let single = row(&area, brand, power, age, exposure);
        let first = b.predict(std::slice::from_ref(&single)).unwrap();
        let second = b.predict(std::slice::from_ref(&single)).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!(first[0].is_finite() && first[0] >= 0.0);

        let batch = vec![row("C", "B1", 6.0, 2.0, 1.0), single, row("D", "B2", 7.0, 1.0, 0.3)];
        let batched = b.predict(&batch).unwrap();
        prop_assert!((batched[1] - first[0]).abs() <= 1e-12 * first[0].max(1e-12));
    }
}
