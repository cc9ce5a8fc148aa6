use proptest::prelude::*;
use std::collections::BTreeMap;

use backtest_optimizer::domain_types::{Configuration, ParamValue};
use backtest_optimizer::signature::{canonicalize, normalize_float};

fn config_with_float(path: &str, value: f64) -> Configuration {
    let mut overrides = BTreeMap::new();
    overrides.insert(path.to_string(), ParamValue::Float(value));
    Configuration::compose(&ParamValue::empty_map(), &overrides)
}

proptest! {
    /// Rounding to the canonical precision must not change the signature.
    #[test]
    fn prop_signature_stable_under_normalization(v in -1e6f64..1e6f64) {
        let raw = config_with_float("strategy.entry_threshold", v);
        let rounded = config_with_float("strategy.entry_threshold", normalize_float(v));
        prop_assert_eq!(canonicalize(&raw), canonicalize(&rounded));
    }

    /// Values further apart than the rounding precision stay distinct.
    #[test]
    fn prop_distinct_values_distinct_signatures(
        v in -1e3f64..1e3f64,
        delta in 1e-5f64..1.0f64,
    ) {
        let a = config_with_float("x", v);
        let b = config_with_float("x", v + delta);
        prop_assert_ne!(canonicalize(&a), canonicalize(&b));
    }

    /// Flattening and rebuilding a configuration preserves its signature.
    #[test]
    fn prop_signature_survives_flat_round_trip(
        a in -100i64..100i64,
        b in -1e3f64..1e3f64,
        flag in any::<bool>(),
    ) {
        let mut overrides = BTreeMap::new();
        overrides.insert("strategy.lookback".to_string(), ParamValue::Int(a));
        overrides.insert("strategy.entry_threshold".to_string(), ParamValue::Float(b));
        overrides.insert("risk.trailing_stop".to_string(), ParamValue::Bool(flag));
        let config = Configuration::compose(&ParamValue::empty_map(), &overrides);

        let rebuilt = Configuration::from_flat(config.flat().clone());
        prop_assert_eq!(canonicalize(&config), canonicalize(&rebuilt));
    }

    /// Integers and floats never collide even at equal numeric value.
    #[test]
    fn prop_int_float_never_collide(v in -1000i64..1000i64) {
        let mut as_int = BTreeMap::new();
        as_int.insert("x".to_string(), ParamValue::Int(v));
        let mut as_float = BTreeMap::new();
        as_float.insert("x".to_string(), ParamValue::Float(v as f64));

        let ci = Configuration::compose(&ParamValue::empty_map(), &as_int);
        let cf = Configuration::compose(&ParamValue::empty_map(), &as_float);
        prop_assert_ne!(canonicalize(&ci), canonicalize(&cf));
    }
}

#[test]
fn test_sub_precision_perturbation_collides() {
    let a = config_with_float("strategy.entry_threshold", 0.35);
    let b = config_with_float("strategy.entry_threshold", 0.350000001);
    assert_eq!(canonicalize(&a), canonicalize(&b));
}

#[test]
fn test_different_paths_differ() {
    let a = config_with_float("strategy.entry_threshold", 0.35);
    let b = config_with_float("strategy.exit_threshold", 0.35);
    assert_ne!(canonicalize(&a), canonicalize(&b));
}
