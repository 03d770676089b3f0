//! Nutrient density derivation
//!
//! Adds `density_{metric}` columns to a wide frame: for every source that reports
//! an energy-like column, each other metric of that source is expressed per 100
//! energy units.

use std::collections::BTreeMap;
use tracing::debug;

use crate::frame::WideFrame;
use crate::types::ColumnKey;

/// Metric name fragments that mark a column as energy-like
pub const DEFAULT_ENERGY_KEYWORDS: &[&str] = &["energy", "calories"];

/// Prefix of derived density column names
pub const DENSITY_PREFIX: &str = "density_";

/// Calculator for density columns
#[derive(Debug, Clone)]
pub struct DensityCalculator {
    energy_keywords: Vec<String>,
}

impl Default for DensityCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_ENERGY_KEYWORDS.iter().copied())
    }
}

impl DensityCalculator {
    pub fn new<I, S>(energy_keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            energy_keywords: energy_keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Case-insensitive keyword match on the metric name
    pub fn is_energy_like(&self, metric_name: &str) -> bool {
        let name = metric_name.to_lowercase();
        self.energy_keywords.iter().any(|k| name.contains(k.as_str()))
    }

    /// Add density columns to `frame`, returning how many were written.
    ///
    /// Only columns present before the call take part. A source with several
    /// energy-like columns gets one density set per energy column; since they share
    /// names, the energy column that sorts last determines the final values.
    pub fn apply(&self, frame: &mut WideFrame) -> usize {
        let mut by_source: BTreeMap<String, Vec<ColumnKey>> = BTreeMap::new();
        for key in frame.column_keys() {
            by_source
                .entry(key.source.clone())
                .or_default()
                .push(key.clone());
        }

        let mut written = 0;
        for (source, keys) in by_source {
            let (energy, nutrients): (Vec<ColumnKey>, Vec<ColumnKey>) = keys
                .into_iter()
                .partition(|k| self.is_energy_like(&k.metric_name));

            if energy.len() > 1 {
                debug!(
                    source = %source,
                    energy_columns = energy.len(),
                    "multiple energy-like columns, density columns will overlap"
                );
            }

            for energy_key in &energy {
                let Some(energy_cells) = frame.column(energy_key).map(<[_]>::to_vec) else {
                    continue;
                };
                for nutrient_key in &nutrients {
                    let Some(nutrient_cells) = frame.column(nutrient_key) else {
                        continue;
                    };
                    let cells = density(nutrient_cells, &energy_cells);
                    let key = ColumnKey::new(
                        source.clone(),
                        format!("{DENSITY_PREFIX}{}", nutrient_key.metric_name),
                    );
                    // Lengths always match: both columns come from the same frame.
                    if frame.insert_column(key, cells).is_ok() {
                        written += 1;
                    }
                }
            }
        }

        written
    }
}

/// `nutrient / energy * 100`, missing when either side is missing or energy is zero
fn density(nutrient: &[Option<f64>], energy: &[Option<f64>]) -> Vec<Option<f64>> {
    nutrient
        .iter()
        .zip(energy)
        .map(|(n, e)| match (n, e) {
            (Some(n), Some(e)) if *e != 0.0 => Some(n / e * 100.0),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Observation;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
    }

    fn obs(values: &[(u32, f64)]) -> Vec<Observation> {
        values
            .iter()
            .map(|&(day, v)| Observation::new(d(day), v, "g"))
            .collect()
    }

    #[test]
    fn test_density_values_and_zero_energy() {
        let mut frame = WideFrame::from_columns(vec![
            (
                ColumnKey::new("cronometer", "Energy"),
                obs(&[(1, 2000.0), (2, 0.0), (3, 2500.0)]),
            ),
            (
                ColumnKey::new("cronometer", "Protein"),
                obs(&[(1, 100.0), (2, 80.0)]),
            ),
        ]);

        let written = DensityCalculator::default().apply(&mut frame);
        assert_eq!(written, 1);

        let density = frame
            .column(&ColumnKey::new("cronometer", "density_Protein"))
            .unwrap();
        assert_eq!(density[0], Some(100.0 / 2000.0 * 100.0));
        // energy of exactly zero is undefined, not an error
        assert_eq!(density[1], None);
        // nutrient missing
        assert_eq!(density[2], None);
    }

    #[test]
    fn test_other_sources_untouched() {
        let mut frame = WideFrame::from_columns(vec![
            (ColumnKey::new("cronometer", "Calories"), obs(&[(1, 2000.0)])),
            (ColumnKey::new("oura", "hrv"), obs(&[(1, 40.0)])),
        ]);

        let written = DensityCalculator::default().apply(&mut frame);
        assert_eq!(written, 0);
        assert_eq!(frame.column_count(), 2);
    }

    #[test]
    fn test_multiple_energy_columns_overlap() {
        let mut frame = WideFrame::from_columns(vec![
            (ColumnKey::new("mfp", "Active Calories"), obs(&[(1, 500.0)])),
            (ColumnKey::new("mfp", "Energy"), obs(&[(1, 2000.0)])),
            (ColumnKey::new("mfp", "Fiber"), obs(&[(1, 30.0)])),
        ]);

        let written = DensityCalculator::default().apply(&mut frame);
        // one per energy column, same target name
        assert_eq!(written, 2);
        assert_eq!(frame.column_count(), 4);

        let density = frame
            .column(&ColumnKey::new("mfp", "density_Fiber"))
            .unwrap();
        // "mfp:Energy" sorts after "mfp:Active Calories"
        assert_eq!(density[0], Some(30.0 / 2000.0 * 100.0));
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let calc = DensityCalculator::default();
        assert!(calc.is_energy_like("ENERGY (kcal)"));
        assert!(calc.is_energy_like("calories_burned"));
        assert!(!calc.is_energy_like("protein"));
    }
}
