use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use super::strategy::{SearchError, SearchStrategy};
use crate::domain_types::{Configuration, ParamDomain, ParamValue, ParameterSpec};

/// 依宣告分佈抽樣單一參數
pub(crate) fn sample_domain(domain: &ParamDomain, rng: &mut StdRng) -> ParamValue {
    match domain {
        ParamDomain::Fixed(value) => value.clone(),
        ParamDomain::Grid(values) => values[rng.random_range(0..values.len())].clone(),
        ParamDomain::Float { low, high, step } => match step {
            Some(step) => {
                // 容忍浮點累積誤差的包含式上界，與 discrete_values 一致
                let count = ((high - low) / step + 1e-9).floor() as u64 + 1;
                let i = rng.random_range(0..count);
                ParamValue::Float(low + i as f64 * step)
            }
            None => ParamValue::Float(rng.random_range(*low..=*high)),
        },
        ParamDomain::Int { low, high, step } => {
            let step = step.unwrap_or(1);
            let count = (high - low) / step + 1;
            ParamValue::Int(low + rng.random_range(0..count) * step)
        }
        ParamDomain::Loguniform { low, high } => {
            let ln = rng.random_range(low.ln()..=high.ln());
            ParamValue::Float(ln.exp())
        }
    }
}

/// 隨機策略
///
/// 每個葉節點獨立抽樣，可指定種子以重現；無回饋、不耗盡。
pub struct RandomStrategy {
    baseline: ParamValue,
    parameters: Vec<(String, ParamDomain)>,
    rng: StdRng,
}

impl RandomStrategy {
    pub fn new(spec: &ParameterSpec, seed: Option<u64>) -> Result<Self, SearchError> {
        let parameters: Vec<(String, ParamDomain)> = spec
            .parameters
            .iter()
            .map(|def| (def.path.clone(), def.domain.clone()))
            .collect();
        if !parameters
            .iter()
            .any(|(_, d)| !matches!(d, ParamDomain::Fixed(_)))
        {
            return Err(SearchError::NothingToSample);
        }
        Ok(Self {
            baseline: spec.baseline.clone(),
            parameters,
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            },
        })
    }
}

impl SearchStrategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn ask(&mut self) -> Result<Option<Configuration>, SearchError> {
        let mut overrides = BTreeMap::new();
        for (path, domain) in &self.parameters {
            overrides.insert(path.clone(), sample_domain(domain, &mut self.rng));
        }
        Ok(Some(Configuration::compose(&self.baseline, &overrides)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::canonicalize;

    const SPEC: &str = r#"
parameters:
  - path: a
    float: { low: 0.0, high: 1.0 }
  - path: b
    int: { low: 1, high: 10 }
  - path: lr
    loguniform: { low: 0.0001, high: 0.1 }
"#;

    #[test]
    fn test_seeded_determinism() {
        let spec = ParameterSpec::parse(SPEC).unwrap();
        let mut s1 = RandomStrategy::new(&spec, Some(42)).unwrap();
        let mut s2 = RandomStrategy::new(&spec, Some(42)).unwrap();

        for _ in 0..5 {
            let a = s1.ask().unwrap().unwrap();
            let b = s2.ask().unwrap().unwrap();
            assert_eq!(canonicalize(&a), canonicalize(&b));
        }
    }

    #[test]
    fn test_samples_respect_bounds() {
        let spec = ParameterSpec::parse(SPEC).unwrap();
        let mut strategy = RandomStrategy::new(&spec, Some(7)).unwrap();

        for _ in 0..50 {
            let config = strategy.ask().unwrap().unwrap();
            let a = config.get("a").and_then(|v| v.as_f64()).unwrap();
            assert!((0.0..=1.0).contains(&a));
            let b = config.get("b").and_then(|v| v.as_i64()).unwrap();
            assert!((1..=10).contains(&b));
            let lr = config.get("lr").and_then(|v| v.as_f64()).unwrap();
            assert!((0.0001..=0.1).contains(&lr));
        }
    }

    #[test]
    fn test_stepped_float_covers_inclusive_upper_bound() {
        // (0.03 - 0.01) / 0.01 在 IEEE 雙精度下為 1.9999999999999996，
        // 取樣必須仍涵蓋上界 0.03
        let domain = ParamDomain::Float {
            low: 0.01,
            high: 0.03,
            step: Some(0.01),
        };
        let expected = domain.discrete_values().unwrap().len();

        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let ParamValue::Float(v) = sample_domain(&domain, &mut rng) else {
                panic!("stepped float 應取樣為浮點值");
            };
            assert!(v <= 0.03 + 1e-9);
            seen.insert(format!("{v:.6}"));
        }
        assert_eq!(seen.len(), expected);
    }

    #[test]
    fn test_all_fixed_rejected() {
        let spec = ParameterSpec::parse(
            r#"
parameters:
  - path: a
    fixed: 1
"#,
        )
        .unwrap();
        assert!(matches!(
            RandomStrategy::new(&spec, None),
            Err(SearchError::NothingToSample)
        ));
    }
}
