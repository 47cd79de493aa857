//! Wallet interning and the decayed multi-signal edge graph (§4.5).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::models::{EdgeSignal, WalletEdge};

pub type WalletId = u32;

/// `scale = clamp(1/(1+log10(1+vol/baseline))/0.77, 0.35, 1.25)` (§4.5).
pub fn market_scale(last_hour_volume_usd: f64, baseline_usd: f64) -> f64 {
    let vol = last_hour_volume_usd.max(0.0);
    let raw = (1.0 / (1.0 + (1.0 + vol / baseline_usd).log10())) / 0.77;
    raw.clamp(0.35, 1.25)
}

struct Interner {
    ids: HashMap<String, WalletId>,
    names: Vec<String>,
}

impl Interner {
    fn new() -> Self {
        Self {
            ids: HashMap::new(),
            names: Vec::new(),
        }
    }

    fn intern(&mut self, wallet: &str) -> WalletId {
        if let Some(id) = self.ids.get(wallet) {
            return *id;
        }
        let id = self.names.len() as WalletId;
        self.names.push(wallet.to_string());
        self.ids.insert(wallet.to_string(), id);
        id
    }

    fn name(&self, id: WalletId) -> &str {
        &self.names[id as usize]
    }
}

fn pair_key(a: WalletId, b: WalletId) -> (WalletId, WalletId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub struct ClusterGraph {
    interner: RwLock<Interner>,
    edges: RwLock<HashMap<(WalletId, WalletId), WalletEdge>>,
    halflife: Duration,
    saturation_k: f64,
}

impl ClusterGraph {
    pub fn new(halflife: Duration, saturation_k: f64) -> Self {
        Self {
            interner: RwLock::new(Interner::new()),
            edges: RwLock::new(HashMap::new()),
            halflife,
            saturation_k,
        }
    }

    fn decay_factor(&self, dt_seconds: f64) -> f64 {
        let halflife_secs = self.halflife.as_secs_f64().max(1.0);
        0.5_f64.powf(dt_seconds / halflife_secs)
    }

    fn decay_edge(&self, edge: &mut WalletEdge, now: DateTime<Utc>) {
        let dt = now.signed_duration_since(edge.last_updated).num_milliseconds() as f64 / 1000.0;
        if dt <= 0.0 {
            return;
        }
        let factor = self.decay_factor(dt);
        let mut total = 0.0;
        for v in edge.evidence.values_mut() {
            *v *= factor;
            total += *v;
        }
        edge.weight_total = total;
        edge.last_updated = now;
    }

    /// Adds one sample of `signal` between `wallet_a` and `wallet_b`.
    /// Saturation: `base * (1 / (1 + k * prev_count))`, clipped so the
    /// per-signal accumulated weight never exceeds `cap` (§4.5).
    pub fn add_signal(
        &self,
        wallet_a: &str,
        wallet_b: &str,
        signal: EdgeSignal,
        base: f64,
        cap: f64,
        market_scale: f64,
        now: DateTime<Utc>,
    ) {
        if wallet_a == wallet_b {
            return;
        }
        let (a, b) = {
            let mut interner = self.interner.write();
            (interner.intern(wallet_a), interner.intern(wallet_b))
        };
        let key = pair_key(a, b);

        let mut edges = self.edges.write();
        let edge = edges.entry(key).or_insert_with(|| WalletEdge {
            weight_total: 0.0,
            evidence: HashMap::new(),
            evidence_count: HashMap::new(),
            last_updated: now,
        });
        self.decay_edge(edge, now);

        let prev_count = *edge.evidence_count.get(&signal).unwrap_or(&0);
        let contribution = base * market_scale * (1.0 / (1.0 + self.saturation_k * prev_count as f64));

        let current = *edge.evidence.get(&signal).unwrap_or(&0.0);
        let new_value = (current + contribution).min(cap);
        edge.evidence.insert(signal, new_value);
        edge.evidence_count.insert(signal, prev_count + 1);
        edge.weight_total = edge.evidence.values().sum();
    }

    /// Decayed `weight_total` as of `now`, without mutating stored state
    /// (read-only decay projection).
    pub fn decayed_weight(&self, wallet_a: &str, wallet_b: &str, now: DateTime<Utc>) -> f64 {
        let (a, b) = {
            let interner = self.interner.read();
            match (interner.ids.get(wallet_a), interner.ids.get(wallet_b)) {
                (Some(&a), Some(&b)) => (a, b),
                _ => return 0.0,
            }
        };
        let key = pair_key(a, b);
        let edges = self.edges.read();
        match edges.get(&key) {
            Some(edge) => {
                let dt = now.signed_duration_since(edge.last_updated).num_milliseconds() as f64 / 1000.0;
                let factor = if dt > 0.0 { self.decay_factor(dt) } else { 1.0 };
                edge.evidence.values().map(|v| v * factor).sum()
            }
            None => 0.0,
        }
    }

    /// All wallet-pair edges whose decayed weight is at or above
    /// `threshold`, as `(wallet_a, wallet_b, weight)` name triples. The
    /// scan fans out over `rayon` since entity rebuilds run it against
    /// every known edge (§4.5, §5 periodic rebuild).
    pub fn edges_at_or_above(&self, threshold: f64, now: DateTime<Utc>) -> Vec<(String, String, f64)> {
        let interner = self.interner.read();
        let edges = self.edges.read();
        let halflife_secs = self.halflife.as_secs_f64().max(1.0);
        edges
            .par_iter()
            .filter_map(|((a, b), edge)| {
                let dt = now.signed_duration_since(edge.last_updated).num_milliseconds() as f64 / 1000.0;
                let factor = if dt > 0.0 { 0.5_f64.powf(dt / halflife_secs) } else { 1.0 };
                let weight: f64 = edge.evidence.values().map(|v| v * factor).sum();
                if weight >= threshold {
                    Some((interner.name(*a).to_string(), interner.name(*b).to_string(), weight))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn wallet_names(&self) -> Vec<String> {
        self.interner.read().names.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_scale_clamps_to_bounds() {
        assert!((market_scale(0.0, 50_000.0) - 1.25).abs() < 1e-6);
        assert!(market_scale(10_000_000.0, 50_000.0) >= 0.35);
    }

    #[test]
    fn saturation_caps_accumulated_weight() {
        let graph = ClusterGraph::new(Duration::from_secs(86_400), 0.55);
        let now = Utc::now();
        for _ in 0..50 {
            graph.add_signal("a", "b", EdgeSignal::TimeCoupled, 0.18, 1.20, 1.0, now);
        }
        let weight = graph.decayed_weight("a", "b", now);
        assert!(weight <= 1.20 + 1e-9);
    }

    #[test]
    fn unrelated_pair_has_zero_weight() {
        let graph = ClusterGraph::new(Duration::from_secs(86_400), 0.55);
        assert_eq!(graph.decayed_weight("x", "y", Utc::now()), 0.0);
    }
}
