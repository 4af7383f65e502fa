//! Expander strategies ranking scale-up options. Strategies are chained: each one narrows
//! the options left by the previous one, the lexicographically smallest group id breaks
//! remaining ties.

use std::collections::BTreeMap;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
use crate::config::AutoscalerConfig;
use crate::core::common::{resource_quantity, ResourceList, RESOURCE_CPU, RESOURCE_MEMORY};
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;

pub const RANDOM: &str = "random";
pub const MOST_PODS: &str = "most-pods";
pub const LEAST_WASTE: &str = "least-waste";
pub const PRIORITY: &str = "priority";
pub const PRICE: &str = "price";

pub const KNOWN_EXPANDERS: [&str; 5] = [RANDOM, MOST_PODS, LEAST_WASTE, PRIORITY, PRICE];

const EPSILON: f64 = 1e-9;

/// Growing `node_group` by `node_count` nodes would make room for `pods`.
#[derive(Clone)]
pub struct ExpansionOption {
    pub node_group: Box<dyn NodeGroup>,
    pub node_count: usize,
    pub pods: Vec<Pod>,
    pub template: NodeInfo,
}

pub trait ExpanderStrategy {
    fn name(&self) -> &'static str;

    /// Best options among `options`, never empty for non-empty input.
    fn best_options(
        &mut self,
        ctx: &AutoscalingContext,
        options: Vec<ExpansionOption>,
        now: f64,
    ) -> AutoscalerResult<Vec<ExpansionOption>>;
}

pub struct ExpanderChain {
    strategies: Vec<Box<dyn ExpanderStrategy>>,
}

impl ExpanderChain {
    pub fn new(strategies: Vec<Box<dyn ExpanderStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn from_config(config: &AutoscalerConfig) -> AutoscalerResult<Self> {
        let mut strategies: Vec<Box<dyn ExpanderStrategy>> = vec![];
        for name in config.expander_names() {
            let strategy: Box<dyn ExpanderStrategy> = match name.as_str() {
                RANDOM => Box::new(RandomStrategy::new(config.seed)),
                MOST_PODS => Box::new(MostPodsStrategy {}),
                LEAST_WASTE => Box::new(LeastWasteStrategy {}),
                PRIORITY => Box::new(PriorityStrategy::new(&config.priority_expander_config)?),
                PRICE => Box::new(PriceStrategy {}),
                other => {
                    return Err(AutoscalerError::Configuration(format!(
                        "unknown expander {:?}",
                        other
                    )))
                }
            };
            strategies.push(strategy);
        }
        Ok(Self::new(strategies))
    }

    pub fn best_option(
        &mut self,
        ctx: &AutoscalingContext,
        mut options: Vec<ExpansionOption>,
        now: f64,
    ) -> AutoscalerResult<Option<ExpansionOption>> {
        for strategy in self.strategies.iter_mut() {
            if options.len() <= 1 {
                break;
            }
            options = strategy.best_options(ctx, options, now)?;
            debug!(
                "Expander {} left {} option(s)",
                strategy.name(),
                options.len()
            );
        }
        Ok(options
            .into_iter()
            .min_by(|a, b| a.node_group.id().cmp(&b.node_group.id())))
    }
}

fn keep_min_by_score(
    options: Vec<ExpansionOption>,
    score: impl Fn(&ExpansionOption) -> f64,
) -> Vec<ExpansionOption> {
    let scored: Vec<(f64, ExpansionOption)> =
        options.into_iter().map(|o| (score(&o), o)).collect();
    let best = scored
        .iter()
        .map(|(s, _)| *s)
        .fold(f64::INFINITY, f64::min);
    scored
        .into_iter()
        .filter(|(s, _)| *s <= best + EPSILON)
        .map(|(_, o)| o)
        .collect()
}

pub struct RandomStrategy {
    rng: StdRng,
}

impl RandomStrategy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ExpanderStrategy for RandomStrategy {
    fn name(&self) -> &'static str {
        RANDOM
    }

    fn best_options(
        &mut self,
        _ctx: &AutoscalingContext,
        mut options: Vec<ExpansionOption>,
        _now: f64,
    ) -> AutoscalerResult<Vec<ExpansionOption>> {
        if options.is_empty() {
            return Ok(options);
        }
        // Same seed and same options give the same pick.
        options.sort_by_key(|o| o.node_group.id());
        let idx = self.rng.random_range(0..options.len());
        Ok(vec![options.swap_remove(idx)])
    }
}

pub struct MostPodsStrategy {}

impl ExpanderStrategy for MostPodsStrategy {
    fn name(&self) -> &'static str {
        MOST_PODS
    }

    fn best_options(
        &mut self,
        _ctx: &AutoscalingContext,
        options: Vec<ExpansionOption>,
        _now: f64,
    ) -> AutoscalerResult<Vec<ExpansionOption>> {
        let most = options.iter().map(|o| o.pods.len()).max().unwrap_or(0);
        Ok(options.into_iter().filter(|o| o.pods.len() == most).collect())
    }
}

/// Prefers the option leaving the least cpu and memory idle on the new nodes.
pub struct LeastWasteStrategy {}

impl LeastWasteStrategy {
    pub fn waste(option: &ExpansionOption) -> f64 {
        let mut requested = ResourceList::new();
        for pod in option.pods.iter() {
            for (name, quantity) in pod.requests().into_iter() {
                *requested.entry(name).or_insert(0) += quantity;
            }
        }
        let allocatable = &option.template.node.status.allocatable;
        let wasted = |resource: &str| {
            let available = resource_quantity(allocatable, resource) * option.node_count as i64;
            if available <= 0 {
                return 0.0;
            }
            (available - resource_quantity(&requested, resource)) as f64 / available as f64
        };
        (wasted(RESOURCE_CPU) + wasted(RESOURCE_MEMORY)) / 2.0
    }
}

impl ExpanderStrategy for LeastWasteStrategy {
    fn name(&self) -> &'static str {
        LEAST_WASTE
    }

    fn best_options(
        &mut self,
        _ctx: &AutoscalingContext,
        options: Vec<ExpansionOption>,
        _now: f64,
    ) -> AutoscalerResult<Vec<ExpansionOption>> {
        Ok(keep_min_by_score(options, Self::waste))
    }
}

/// Prefers groups matching the regexes of the highest priority. Groups matching nothing are
/// only kept when no group matches.
pub struct PriorityStrategy {
    // Highest priority first.
    priorities: Vec<(i32, Vec<Regex>)>,
}

impl PriorityStrategy {
    pub fn new(config: &BTreeMap<i32, Vec<String>>) -> AutoscalerResult<Self> {
        let mut priorities = vec![];
        for (priority, patterns) in config.iter().rev() {
            let mut regexes = vec![];
            for pattern in patterns.iter() {
                let regex = Regex::new(pattern).map_err(|err| {
                    AutoscalerError::Configuration(format!(
                        "invalid priority expander regex {:?}: {}",
                        pattern, err
                    ))
                })?;
                regexes.push(regex);
            }
            priorities.push((*priority, regexes));
        }
        Ok(Self { priorities })
    }

    fn priority_of(&self, node_group_id: &str) -> Option<i32> {
        self.priorities
            .iter()
            .find(|(_, regexes)| regexes.iter().any(|regex| regex.is_match(node_group_id)))
            .map(|(priority, _)| *priority)
    }
}

impl ExpanderStrategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        PRIORITY
    }

    fn best_options(
        &mut self,
        _ctx: &AutoscalingContext,
        options: Vec<ExpansionOption>,
        _now: f64,
    ) -> AutoscalerResult<Vec<ExpansionOption>> {
        let best = options
            .iter()
            .filter_map(|o| self.priority_of(&o.node_group.id()))
            .max();
        match best {
            Some(best) => Ok(options
                .into_iter()
                .filter(|o| self.priority_of(&o.node_group.id()) == Some(best))
                .collect()),
            None => Ok(options),
        }
    }
}

/// Prefers the cheapest option per scheduled pod over the next hour. Providers without
/// pricing leave options untouched.
pub struct PriceStrategy {}

impl ExpanderStrategy for PriceStrategy {
    fn name(&self) -> &'static str {
        PRICE
    }

    fn best_options(
        &mut self,
        ctx: &AutoscalingContext,
        options: Vec<ExpansionOption>,
        now: f64,
    ) -> AutoscalerResult<Vec<ExpansionOption>> {
        let pricing = match ctx.cloud_provider.pricing() {
            Ok(pricing) => pricing,
            Err(AutoscalerError::NotImplemented) => return Ok(options),
            Err(err) => return Err(err),
        };
        let mut scores = BTreeMap::new();
        for option in options.iter() {
            let node_price = pricing.node_price(&option.template.node, now, now + 3600.0)?;
            let pods = usize::max(option.pods.len(), 1) as f64;
            scores.insert(
                option.node_group.id(),
                node_price * option.node_count as f64 / pods,
            );
        }
        Ok(keep_min_by_score(options, |o| {
            scores.get(&o.node_group.id()).copied().unwrap_or(f64::INFINITY)
        }))
    }
}
