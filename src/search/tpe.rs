use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{Continuous, Normal};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

use super::strategy::{SearchError, SearchStrategy, TpeOptions};
use crate::domain_types::{Configuration, ParamDomain, ParamValue, ParameterSpec};

/// 單一參數的數值座標軸
///
/// 所有可搜尋域都映射到一維實數座標：網格用索引、整數與
/// 浮點用原值、loguniform 用對數空間。
struct Axis {
    path: String,
    domain: ParamDomain,
    low: f64,
    high: f64,
}

impl Axis {
    fn from_domain(path: &str, domain: &ParamDomain) -> Option<Self> {
        let (low, high) = match domain {
            ParamDomain::Fixed(_) => return None,
            ParamDomain::Grid(values) => (0.0, (values.len() - 1) as f64),
            ParamDomain::Float { low, high, .. } => (*low, *high),
            ParamDomain::Int { low, high, .. } => (*low as f64, *high as f64),
            ParamDomain::Loguniform { low, high } => (low.ln(), high.ln()),
        };
        Some(Self {
            path: path.to_string(),
            domain: domain.clone(),
            low,
            high,
        })
    }

    /// 座標還原為參數值（吸附到步長/索引）
    fn decode(&self, coord: f64) -> ParamValue {
        let coord = coord.clamp(self.low, self.high);
        match &self.domain {
            ParamDomain::Fixed(value) => value.clone(),
            ParamDomain::Grid(values) => {
                let i = coord.round().clamp(0.0, (values.len() - 1) as f64) as usize;
                values[i].clone()
            }
            ParamDomain::Float { low, step, .. } => match step {
                Some(step) => {
                    let snapped = low + ((coord - low) / step).round() * step;
                    ParamValue::Float(snapped.clamp(self.low, self.high))
                }
                None => ParamValue::Float(coord),
            },
            ParamDomain::Int { low, step, .. } => {
                let step = step.unwrap_or(1) as f64;
                let snapped = *low as f64 + ((coord - *low as f64) / step).round() * step;
                ParamValue::Int(snapped.clamp(self.low, self.high) as i64)
            }
            ParamDomain::Loguniform { .. } => ParamValue::Float(coord.exp()),
        }
    }

    /// 參數值映射回座標（回放歷史觀測時使用）
    fn encode(&self, value: &ParamValue) -> Option<f64> {
        match &self.domain {
            ParamDomain::Grid(values) => values
                .iter()
                .position(|v| v == value)
                .map(|i| i as f64),
            ParamDomain::Loguniform { .. } => value.as_f64().map(f64::ln),
            _ => value.as_f64(),
        }
    }

    fn width(&self) -> f64 {
        (self.high - self.low).max(f64::EPSILON)
    }
}

/// 序貫模型式策略（Tree-structured Parzen Estimator）
///
/// 累積 (配置, 分數) 歷史後，把觀測依 gamma 分位切成好壞兩群，
/// 以 Parzen 核密度估計 l(x) 與 g(x)，提議 l/g 最大的候選點。
/// 候選點的各維皆取自同一個好觀測錨點，維持相關（多變量）提議。
pub struct TpeStrategy {
    baseline: ParamValue,
    fixed: BTreeMap<String, ParamValue>,
    axes: Vec<Axis>,
    options: TpeOptions,
    rng: StdRng,
    /// 在途試驗的悲觀佔位分數（取計分器配置的執行失敗罰分）：
    /// 真實分數回來前把在途點視為最差觀測，避免併發工作者
    /// 重複提議同一個點
    pending_score: f64,
    /// 已回饋的真實觀測 (座標, 分數)
    observations: Vec<(Vec<f64>, f64)>,
    /// 在途試驗，以佔位分數參與建模
    pending: HashMap<u64, Vec<f64>>,
}

impl TpeStrategy {
    pub fn new(
        spec: &ParameterSpec,
        seed: Option<u64>,
        options: TpeOptions,
        pending_score: f64,
    ) -> Result<Self, SearchError> {
        let mut axes = Vec::new();
        let mut fixed = BTreeMap::new();
        for def in &spec.parameters {
            match Axis::from_domain(&def.path, &def.domain) {
                Some(axis) => axes.push(axis),
                None => {
                    if let ParamDomain::Fixed(value) = &def.domain {
                        fixed.insert(def.path.clone(), value.clone());
                    }
                }
            }
        }
        if axes.is_empty() {
            return Err(SearchError::NothingToSample);
        }
        Ok(Self {
            baseline: spec.baseline.clone(),
            fixed,
            axes,
            options,
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            },
            pending_score,
            observations: Vec::new(),
            pending: HashMap::new(),
        })
    }

    fn uniform_coords(&mut self) -> Vec<f64> {
        let mut coords = Vec::with_capacity(self.axes.len());
        for axis in &self.axes {
            coords.push(self.rng.random_range(axis.low..=axis.high));
        }
        coords
    }

    fn coords_to_config(&self, coords: &[f64]) -> Configuration {
        let mut overrides = self.fixed.clone();
        for (axis, &coord) in self.axes.iter().zip(coords) {
            overrides.insert(axis.path.clone(), axis.decode(coord));
        }
        Configuration::compose(&self.baseline, &overrides)
    }

    fn encode_config(&self, config: &Configuration) -> Option<Vec<f64>> {
        self.axes
            .iter()
            .map(|axis| config.get(&axis.path).and_then(|v| axis.encode(v)))
            .collect()
    }

    /// 好壞分群後以核密度比挑選候選
    fn propose_modeled(&mut self) -> Vec<f64> {
        let mut pool: Vec<(&Vec<f64>, f64)> = self
            .observations
            .iter()
            .map(|(coords, score)| (coords, *score))
            .collect();
        for coords in self.pending.values() {
            pool.push((coords, self.pending_score));
        }
        pool.sort_by(|a, b| b.1.total_cmp(&a.1));

        let n_good = ((pool.len() as f64 * self.options.gamma).ceil() as usize)
            .clamp(1, pool.len().saturating_sub(1).max(1));
        let good: Vec<&Vec<f64>> = pool[..n_good].iter().map(|(c, _)| *c).collect();
        let bad: Vec<&Vec<f64>> = pool[n_good..].iter().map(|(c, _)| *c).collect();

        // Scott 式帶寬，按群大小收縮
        let sigmas: Vec<f64> = self
            .axes
            .iter()
            .map(|axis| axis.width() * 1.06 * (good.len().max(2) as f64).powf(-0.2))
            .collect();

        let mut best: Option<(Vec<f64>, f64)> = None;
        for _ in 0..self.options.n_ei_candidates {
            // 多變量提議：各維皆以同一個好觀測為錨
            let anchor = good[self.rng.random_range(0..good.len())];
            let candidate: Vec<f64> = self
                .axes
                .iter()
                .enumerate()
                .map(|(d, axis)| {
                    let draw = sample_normal(&mut self.rng, anchor[d], sigmas[d]);
                    draw.clamp(axis.low, axis.high)
                })
                .collect();

            let l = kernel_density(&candidate, &good, &sigmas, &self.axes);
            let g = kernel_density(&candidate, &bad, &sigmas, &self.axes);
            let ratio = (l + 1e-12).ln() - (g + 1e-12).ln();
            if best.as_ref().is_none_or(|(_, b)| ratio > *b) {
                best = Some((candidate, ratio));
            }
        }

        let (coords, ratio) = best.expect("n_ei_candidates >= 1");
        trace!(ratio, "TPE 提議完成");
        coords
    }

    fn real_observation_count(&self) -> usize {
        self.observations.len()
    }
}

/// Box-Muller 高斯抽樣
fn sample_normal(rng: &mut StdRng, mu: f64, sigma: f64) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mu + sigma * z
}

/// Parzen 核密度（各維獨立高斯核的平均，含均勻底噪）
fn kernel_density(x: &[f64], points: &[&Vec<f64>], sigmas: &[f64], axes: &[Axis]) -> f64 {
    // 均勻成分防止密度為零
    let uniform: f64 = axes.iter().map(|axis| 1.0 / axis.width()).product();
    if points.is_empty() {
        return uniform;
    }
    let sum: f64 = points
        .iter()
        .map(|point| {
            x.iter()
                .zip(point.iter())
                .zip(sigmas)
                .map(|((xi, pi), sigma)| match Normal::new(*pi, *sigma) {
                    Ok(normal) => normal.pdf(*xi),
                    Err(_) => 0.0,
                })
                .product::<f64>()
        })
        .sum();
    0.9 * sum / points.len() as f64 + 0.1 * uniform
}

impl SearchStrategy for TpeStrategy {
    fn name(&self) -> &'static str {
        "tpe"
    }

    fn ask(&mut self) -> Result<Option<Configuration>, SearchError> {
        let coords = if self.real_observation_count() < self.options.n_startup_trials {
            self.uniform_coords()
        } else {
            self.propose_modeled()
        };
        Ok(Some(self.coords_to_config(&coords)))
    }

    fn tell_pending(&mut self, trial_number: u64, config: &Configuration) {
        if let Some(coords) = self.encode_config(config) {
            self.pending.insert(trial_number, coords);
        }
    }

    fn tell(&mut self, trial_number: u64, config: &Configuration, score: f64) {
        self.pending.remove(&trial_number);
        if let Some(coords) = self.encode_config(config) {
            self.observations.push((coords, score));
        }
    }
}
