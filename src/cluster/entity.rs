//! Union-Find entity materialization with stable ID assignment (§4.5).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

pub use crate::models::Entity;

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityEngineSnapshot {
    pub entities: Vec<Entity>,
}

pub struct EntityBook {
    entities: HashMap<String, Entity>,
    next_seq: u64,
    pub(super) last_rebuilt: Option<DateTime<Utc>>,
}

impl EntityBook {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_seq: 1,
            last_rebuilt: None,
        }
    }

    pub fn entity_for(&self, wallet: &str) -> Option<Entity> {
        self.entities.values().find(|e| e.wallets.contains(wallet)).cloned()
    }

    pub fn snapshot(&self) -> EntityEngineSnapshot {
        EntityEngineSnapshot {
            entities: self.entities.values().cloned().collect(),
        }
    }

    fn mint_id(&mut self) -> String {
        let id = format!("ent_{:06}", self.next_seq);
        self.next_seq += 1;
        id
    }

    /// Runs Union-Find over `wallets`/`edges` (pairs at/above the entity
    /// edge threshold, pre-filtered by the caller) and rebuilds the
    /// entity book. Components of size ≥2 become entities; stable IDs are
    /// inherited from the prior entity sharing the most wallets (ties
    /// broken alphabetically by entity_id), and `created_at` is preserved
    /// for reused IDs (§4.5).
    pub fn rebuild(&mut self, wallets: &[String], edges: &[(String, String, f64)], now: DateTime<Utc>) {
        self.last_rebuilt = Some(now);

        if wallets.is_empty() {
            self.entities.clear();
            return;
        }

        let index_of: HashMap<&str, usize> = wallets.iter().enumerate().map(|(i, w)| (w.as_str(), i)).collect();
        let mut uf = UnionFind::new(wallets.len());
        for (a, b, _) in edges {
            if let (Some(&ia), Some(&ib)) = (index_of.get(a.as_str()), index_of.get(b.as_str())) {
                uf.union(ia, ib);
            }
        }

        let mut components: HashMap<usize, Vec<String>> = HashMap::new();
        for (i, wallet) in wallets.iter().enumerate() {
            let root = uf.find(i);
            components.entry(root).or_default().push(wallet.clone());
        }

        let prior = std::mem::take(&mut self.entities);
        let mut new_entities: HashMap<String, Entity> = HashMap::new();

        for members in components.values() {
            if members.len() < 2 {
                continue;
            }
            let member_set: HashSet<String> = members.iter().cloned().collect();

            // Find the prior entity with the largest wallet overlap;
            // ties broken alphabetically by entity_id.
            let mut best: Option<(&Entity, usize)> = None;
            for prior_entity in prior.values() {
                let overlap = prior_entity.wallets.intersection(&member_set).count();
                if overlap == 0 {
                    continue;
                }
                best = match best {
                    None => Some((prior_entity, overlap)),
                    Some((cur, cur_overlap)) => {
                        if overlap > cur_overlap
                            || (overlap == cur_overlap && prior_entity.entity_id < cur.entity_id)
                        {
                            Some((prior_entity, overlap))
                        } else {
                            Some((cur, cur_overlap))
                        }
                    }
                };
            }

            let confidence = (0.50 + 0.10 * (members.len() as f64 - 2.0)).min(0.95);

            let entity = match best {
                Some((inherited, _)) => Entity {
                    entity_id: inherited.entity_id.clone(),
                    wallets: member_set,
                    confidence,
                    created_at: inherited.created_at,
                    updated_at: now,
                    reason: "multi-signal cluster".to_string(),
                },
                None => Entity {
                    entity_id: self.mint_id(),
                    wallets: member_set,
                    confidence,
                    created_at: now,
                    updated_at: now,
                    reason: "multi-signal cluster".to_string(),
                },
            };
            new_entities.insert(entity.entity_id.clone(), entity);
        }

        self.entities = new_entities;
    }
}

impl Default for EntityBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_under_two_wallets_are_not_entities() {
        let mut book = EntityBook::new();
        book.rebuild(&["a".to_string()], &[], Utc::now());
        assert!(book.entity_for("a").is_none());
    }

    #[test]
    fn confidence_grows_with_component_size_and_clamps() {
        let mut book = EntityBook::new();
        let wallets: Vec<String> = (0..10).map(|i| format!("w{i}")).collect();
        let edges: Vec<(String, String, f64)> = (0..9).map(|i| (wallets[i].clone(), wallets[i + 1].clone(), 1.0)).collect();
        book.rebuild(&wallets, &edges, Utc::now());
        let e = book.entity_for("w0").unwrap();
        assert!(e.confidence <= 0.95);
    }
}
