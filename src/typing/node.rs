//! Directory and resource nodes of the per-method path trie.
//!
//! Grounded on `original_source/stages/typing/typing.py`'s `DirNode`/
//! `ResourceNode` classes, spec.md §3 ("Typing tree") and §4.4.3–§4.4.4.
//! The tree-walking operations (`insert`, `update_reliability`,
//! `aggregate`, `lookup_path_reliability`) are free functions over a
//! sibling `Vec<Node>` rather than methods on a wrapping "root dir node",
//! since the root itself (see [`super::root::RootNode`]) has no name or
//! reliability of its own — only nine independent per-method sibling
//! lists, per spec.md §3.

use super::horizon::TimestampHorizon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct Horizons {
    pub short: Duration,
    pub medium: Duration,
    pub long: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirNode {
    pub name: String,
    pub init_time: DateTime<Utc>,
    pub horizon: TimestampHorizon,
    pub core_node: bool,
    pub reliability: f64,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNode {
    pub name: String,
    pub init_time: DateTime<Utc>,
    pub horizon: TimestampHorizon,
    pub core_node: bool,
    pub reliability: f64,
    pub path_reliability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Dir(DirNode),
    Resource(ResourceNode),
}

impl DirNode {
    pub fn new_core(name: String, init_time: DateTime<Utc>) -> Self {
        Self {
            name,
            init_time,
            horizon: TimestampHorizon::new(),
            core_node: true,
            reliability: 1.0,
            children: Vec::new(),
        }
    }

    pub fn new_observed(name: String, init_time: DateTime<Utc>) -> Self {
        let mut horizon = TimestampHorizon::new();
        horizon.append(init_time);
        Self {
            name,
            init_time,
            horizon,
            core_node: false,
            reliability: 0.0,
            children: Vec::new(),
        }
    }
}

impl ResourceNode {
    pub fn new_core(name: String, init_time: DateTime<Utc>) -> Self {
        Self {
            name,
            init_time,
            horizon: TimestampHorizon::new(),
            core_node: true,
            reliability: 1.0,
            path_reliability: 1.0,
        }
    }

    pub fn new_observed(name: String, init_time: DateTime<Utc>) -> Self {
        let mut horizon = TimestampHorizon::new();
        horizon.append(init_time);
        Self {
            name,
            init_time,
            horizon,
            core_node: false,
            reliability: 0.0,
            path_reliability: 0.0,
        }
    }
}

fn find_resource(children: &[Node], name: &str) -> Option<usize> {
    children.iter().position(|c| matches!(c, Node::Resource(r) if r.name == name))
}

fn find_dir(children: &[Node], name: &str) -> Option<usize> {
    children.iter().position(|c| matches!(c, Node::Dir(d) if d.name == name))
}

/// Descend (creating nodes as needed) the chain for `components` under
/// `children`, appending `ts` along the way. spec.md §4.4.3 steps 2–4:
/// an empty path resolves to a resource named "/"; intermediate
/// components always create dir nodes; the last component always
/// creates a resource node.
pub fn insert(children: &mut Vec<Node>, mut components: Vec<String>, ts: DateTime<Utc>) {
    if components.len() <= 1 {
        let name = if components.is_empty() {
            "/".to_string()
        } else {
            components.remove(0)
        };
        match find_resource(children, &name) {
            Some(i) => {
                if let Node::Resource(r) = &mut children[i] {
                    if !r.core_node {
                        r.horizon.append(ts);
                    }
                }
            }
            None => children.push(Node::Resource(ResourceNode::new_observed(name, ts))),
        }
    } else {
        let name = components.remove(0);
        let idx = match find_dir(children, &name) {
            Some(i) => i,
            None => {
                children.push(Node::Dir(DirNode::new_observed(name, ts)));
                children.len() - 1
            }
        };
        if let Node::Dir(d) = &mut children[idx] {
            if !d.core_node {
                d.horizon.append(ts);
            }
            insert(&mut d.children, components, ts);
        }
    }
}

/// Top-down reliability recomputation over a sibling list. `parent_*` are
/// the parent's own horizon totals at the three resolutions; `carry` is
/// the product of ancestor reliabilities (spec.md §4.4.4).
pub fn update_reliability(
    children: &mut [Node],
    now: DateTime<Utc>,
    parent_short: u64,
    parent_medium: u64,
    parent_long: u64,
    carry: f64,
) {
    for child in children {
        match child {
            Node::Dir(d) => {
                if !d.core_node {
                    d.reliability = compute_reliability(
                        now,
                        d.init_time,
                        d.horizon.short_len(),
                        d.horizon.medium_total(),
                        d.horizon.long_total(),
                        parent_short,
                        parent_medium,
                        parent_long,
                    );
                }
                let next_carry = carry * d.reliability;
                let (short, medium, long) = (
                    d.horizon.short_len(),
                    d.horizon.medium_total(),
                    d.horizon.long_total(),
                );
                update_reliability(&mut d.children, now, short, medium, long, next_carry);
            }
            Node::Resource(r) => {
                if !r.core_node {
                    r.reliability = compute_reliability(
                        now,
                        r.init_time,
                        r.horizon.short_len(),
                        r.horizon.medium_total(),
                        r.horizon.long_total(),
                        parent_short,
                        parent_medium,
                        parent_long,
                    );
                    r.path_reliability = carry * r.reliability;
                }
            }
        }
    }
}

pub fn aggregate(children: &mut [Node], now: DateTime<Utc>, horizons: &Horizons) {
    for child in children {
        match child {
            Node::Dir(d) => {
                d.horizon
                    .aggregate(now, horizons.short, horizons.medium, horizons.long);
                aggregate(&mut d.children, now, horizons);
            }
            Node::Resource(r) => {
                r.horizon
                    .aggregate(now, horizons.short, horizons.medium, horizons.long);
            }
        }
    }
}

/// Read-only lookup of a resource's `path_reliability` after
/// [`update_reliability`] has run.
pub fn lookup_path_reliability(children: &[Node], components: &[String]) -> Option<f64> {
    if components.len() <= 1 {
        let name: &str = components.first().map(String::as_str).unwrap_or("/");
        children.iter().find_map(|c| match c {
            Node::Resource(r) if r.name == name => Some(r.path_reliability),
            _ => None,
        })
    } else {
        let name = &components[0];
        children.iter().find_map(|c| match c {
            Node::Dir(d) if &d.name == name => lookup_path_reliability(&d.children, &components[1..]),
            _ => None,
        })
    }
}

/// spec.md §4.4.4: pick the horizon resolution by node age, guard against
/// a zero denominator (never divide — reliability is `0.0` instead).
#[allow(clippy::too_many_arguments)]
fn compute_reliability(
    now: DateTime<Utc>,
    init_time: DateTime<Utc>,
    self_short: u64,
    self_medium: u64,
    self_long: u64,
    parent_short: u64,
    parent_medium: u64,
    parent_long: u64,
) -> f64 {
    let age = now - init_time;
    let one_hour = chrono::Duration::hours(1);
    let one_day = chrono::Duration::hours(24);

    let (numerator, denominator) = if age < one_hour {
        (self_short, parent_short)
    } else if age < one_day {
        (self_short + self_medium, parent_short + parent_medium)
    } else {
        (
            self_short + self_medium + self_long,
            parent_short + parent_medium + parent_long,
        )
    };

    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn single_insert_on_fresh_list_yields_full_reliability() {
        let mut children: Vec<Node> = Vec::new();
        let ts = now();
        insert(&mut children, vec![], ts);
        update_reliability(&mut children, ts, 1, 0, 0, 1.0);
        assert_eq!(lookup_path_reliability(&children, &[]), Some(1.0));
    }

    #[test]
    fn dilution_pushes_reliability_down_as_siblings_accumulate() {
        let mut children: Vec<Node> = Vec::new();
        let ts = now();
        insert(&mut children, vec![], ts); // GET /
        insert(&mut children, vec!["admin".to_string()], ts); // GET /admin
        for _ in 0..8 {
            insert(&mut children, vec![], ts); // GET / x8 more
        }
        // parent_short mirrors what the root would have accumulated: 10 total.
        update_reliability(&mut children, ts, 10, 0, 0, 1.0);
        let pr = lookup_path_reliability(&children, &["admin".to_string()]).unwrap();
        assert_eq!(pr, 0.1);
    }

    #[test]
    fn zero_parent_denominator_never_divides() {
        let mut children: Vec<Node> = vec![Node::Resource(ResourceNode::new_observed(
            "x".to_string(),
            now(),
        ))];
        update_reliability(&mut children, now(), 0, 0, 0, 1.0);
        assert_eq!(lookup_path_reliability(&children, &["x".to_string()]), Some(0.0));
    }

    #[test]
    fn core_resource_path_reliability_is_always_one() {
        let mut children: Vec<Node> = vec![Node::Resource(ResourceNode::new_core(
            "/".to_string(),
            now(),
        ))];
        update_reliability(&mut children, now(), 0, 0, 0, 1.0);
        assert_eq!(lookup_path_reliability(&children, &[]), Some(1.0));
    }

    #[test]
    fn nested_dirs_create_exactly_one_resource_per_path() {
        let mut children: Vec<Node> = Vec::new();
        let ts = now();
        insert(
            &mut children,
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            ts,
        );
        insert(
            &mut children,
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            ts,
        );
        update_reliability(&mut children, ts, 2, 0, 0, 1.0);
        assert!(lookup_path_reliability(
            &children,
            &["a".to_string(), "b".to_string(), "c".to_string()]
        )
        .is_some());
        // no duplicate siblings were created
        if let Node::Dir(a) = &children[0] {
            assert_eq!(a.children.len(), 1);
        } else {
            panic!("expected dir node");
        }
    }
}
