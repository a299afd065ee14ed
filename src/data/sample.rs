//! Synthetic motor-liability portfolio generation.
//!
//! Produces a deterministic (seeded) data set shaped like the freMTPL2freq
//! frequency table: categorical area/brand/fuel/region, numeric vehicle and
//! driver attributes, exposure in policy-years and Poisson claim counts drawn
//! from a known log-linear rate. Used for demos, smoke runs and tests that
//! need realistic volume without a data file.

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{LogNormal, Poisson};

use crate::domain::{FieldValue, Observation, RawRow, clamp_claim_count, clamp_exposure};
use crate::error::{AppError, ErrorKind};

/// Area codes and their portfolio shares.
const AREAS: [(&str, f64); 6] = [
    ("A", 0.15),
    ("B", 0.11),
    ("C", 0.28),
    ("D", 0.22),
    ("E", 0.20),
    ("F", 0.04),
];

/// Vehicle brands. Several fall under a 5% share so the default pipeline
/// collapses them into `other`.
const BRANDS: [(&str, f64); 8] = [
    ("B1", 0.24),
    ("B2", 0.24),
    ("B12", 0.23),
    ("B3", 0.08),
    ("B5", 0.09),
    ("B6", 0.06),
    ("B10", 0.03),
    ("B14", 0.03),
];

const GAS: [(&str, f64); 2] = [("Diesel", 0.49), ("Regular", 0.51)];

const REGIONS: [(&str, f64); 7] = [
    ("R24", 0.24),
    ("R82", 0.13),
    ("R11", 0.10),
    ("R93", 0.12),
    ("R53", 0.06),
    ("R52", 0.29),
    ("R43", 0.06),
];

/// Base claim frequency per policy-year.
const BASE_FREQUENCY: f64 = 0.07;

/// Generate `n` synthetic observations from `seed`.
pub fn generate_portfolio(n: usize, seed: u64) -> Result<Vec<Observation>, AppError> {
    if n == 0 {
        return Err(AppError::new(ErrorKind::InvalidInput, "Sample size must be > 0."));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let areas = Categorical::new(&AREAS)?;
    let brands = Categorical::new(&BRANDS)?;
    let gas = Categorical::new(&GAS)?;
    let regions = Categorical::new(&REGIONS)?;
    let density = LogNormal::<f64>::new(6.5, 1.6)
        .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Density distribution error: {e}")))?;

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let area = areas.sample(&mut rng);
        let brand = brands.sample(&mut rng);
        let fuel = gas.sample(&mut rng);
        let region = regions.sample(&mut rng);

        let vehicle_power = rng.gen_range(4..=15) as f64;
        let vehicle_age = rng.gen_range(0..=20) as f64;
        let driver_age = rng.gen_range(18..=90) as f64;
        // Bonus-malus clusters at the 50 floor for most drivers.
        let bonus_malus = if rng.gen_bool(0.6) {
            50.0
        } else {
            rng.gen_range(51..=150) as f64
        };
        let dens = density.sample(&mut rng).round().clamp(1.0, 27_000.0);
        let raw_exposure = rng.gen_range(0.01..=1.2);
        let exposure = clamp_exposure(raw_exposure).unwrap_or(1.0);

        let eta = BASE_FREQUENCY.ln() + area_effect(area) + 0.004 * (bonus_malus - 50.0)
            - 0.006 * (driver_age - 45.0).min(0.0)
            - 0.01 * vehicle_age
            + 0.01 * (vehicle_power - 6.0)
            + if fuel == "Regular" { -0.05 } else { 0.0 };
        let lambda = exposure * eta.exp();
        let claims = Poisson::new(lambda)
            .map(|d| d.sample(&mut rng))
            .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Claim distribution error: {e}")))?;
        let claim_count = clamp_claim_count(claims).unwrap_or(0.0);

        let mut predictors = RawRow::new();
        predictors.insert("area".into(), FieldValue::from(area));
        predictors.insert("vehicle_brand".into(), FieldValue::from(brand));
        predictors.insert("vehicle_gas".into(), FieldValue::from(fuel));
        predictors.insert("region".into(), FieldValue::from(region));
        predictors.insert("vehicle_power".into(), FieldValue::Number(vehicle_power));
        predictors.insert("vehicle_age".into(), FieldValue::Number(vehicle_age));
        predictors.insert("driver_age".into(), FieldValue::Number(driver_age));
        predictors.insert("bonus_malus".into(), FieldValue::Number(bonus_malus));
        predictors.insert("density".into(), FieldValue::Number(dens));

        out.push(Observation {
            id: format!("P{:06}", i + 1),
            predictors,
            exposure,
            claim_count,
        });
    }

    Ok(out)
}

fn area_effect(area: &str) -> f64 {
    match area {
        "A" => -0.20,
        "B" => -0.12,
        "C" => 0.0,
        "D" => 0.10,
        "E" => 0.18,
        _ => 0.25,
    }
}

struct Categorical<'a> {
    labels: Vec<&'a str>,
    index: WeightedIndex<f64>,
}

impl<'a> Categorical<'a> {
    fn new(levels: &[(&'a str, f64)]) -> Result<Self, AppError> {
        let index = WeightedIndex::new(levels.iter().map(|(_, w)| *w))
            .map_err(|e| AppError::new(ErrorKind::InvalidInput, format!("Invalid level weights: {e}")))?;
        Ok(Self {
            labels: levels.iter().map(|(l, _)| *l).collect(),
            index,
        })
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> &'a str {
        self.labels[self.index.sample(rng)]
    }
}
