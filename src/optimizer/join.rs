use std::{cmp, collections::HashMap};

use itertools::Itertools;
use log::debug;

use crate::error::DbError;

use super::table_stats::get_io_cost_per_page;

/// What the optimizer knows about one base table.
pub struct TableProfile {
    pub cardinality: usize,
    pub scan_cost: f64,
}

/// An estimated join predicate between two base tables.
#[derive(Clone)]
pub struct JoinEstimate {
    pub left: String,
    pub right: String,
    pub selectivity: f64,
}

/// A left-deep join order with its estimated cost and output cardinality.
#[derive(Clone)]
pub struct JoinPlan {
    pub order: Vec<String>,
    pub cost: f64,
    pub cardinality: usize,
}

/// Orders joins with bottom-up enumeration of table subsets, memoizing the
/// best left-deep plan per subset.
///
/// Cost model: the scan cost of the left-most table, plus
/// `card(left) * card(right) * io_cost_per_page` for each join (a simple
/// nested-loop model). A predicate whose tables are not both present in a
/// subset is deferred until they are.
pub struct JoinOptimizer {
    profiles: HashMap<String, TableProfile>,
    joins: Vec<JoinEstimate>,
}

impl JoinOptimizer {
    pub fn new(profiles: HashMap<String, TableProfile>, joins: Vec<JoinEstimate>) -> Self {
        Self { profiles, joins }
    }

    pub fn order_joins(&self) -> Result<JoinPlan, DbError> {
        let tables: Vec<String> = self.profiles.keys().cloned().sorted().collect();
        if tables.is_empty() {
            return Err(DbError::internal("no tables to order"));
        }

        let io_cost = get_io_cost_per_page() as f64;
        let mut memo: HashMap<Vec<String>, JoinPlan> = HashMap::new();

        // plans of size 1 are plain scans
        for t in &tables {
            let profile = &self.profiles[t];
            memo.insert(
                vec![t.clone()],
                JoinPlan {
                    order: vec![t.clone()],
                    cost: profile.scan_cost,
                    cardinality: profile.cardinality,
                },
            );
        }

        for k in 2..=tables.len() {
            for subset in tables.iter().cloned().combinations(k) {
                let cardinality = self.estimate_cardinality(&subset);
                let mut best: Option<JoinPlan> = None;

                // try every table as the last one joined in
                for t in &subset {
                    let rest: Vec<String> =
                        subset.iter().filter(|s| *s != t).cloned().collect();
                    let rest_plan = match memo.get(&rest) {
                        Some(plan) => plan,
                        None => continue,
                    };

                    let t_card = self.profiles[t].cardinality;
                    let cost = rest_plan.cost
                        + rest_plan.cardinality as f64 * t_card as f64 * io_cost;

                    if best.as_ref().map(|b| cost < b.cost).unwrap_or(true) {
                        let mut order = rest_plan.order.clone();
                        order.push(t.clone());
                        best = Some(JoinPlan {
                            order,
                            cost,
                            cardinality,
                        });
                    }
                }

                let best = best
                    .ok_or_else(|| DbError::internal("no plan found for a table subset"))?;
                memo.insert(subset, best);
            }
        }

        let plan = memo
            .remove(&tables)
            .ok_or_else(|| DbError::internal("no plan covers every table"))?;
        debug!(
            "join order chosen: {:?}, cost: {}, cardinality: {}",
            plan.order, plan.cost, plan.cardinality
        );
        Ok(plan)
    }

    /// Joint cardinality of a table subset: the product of the base
    /// cardinalities scaled by the selectivity of every predicate whose
    /// tables are both present.
    fn estimate_cardinality(&self, subset: &[String]) -> usize {
        let mut cardinality: f64 = subset
            .iter()
            .map(|t| self.profiles[t].cardinality as f64)
            .product();

        for join in &self.joins {
            if subset.contains(&join.left) && subset.contains(&join.right) {
                cardinality *= join.selectivity;
            }
        }

        cmp::max(1, cardinality as usize)
    }
}
