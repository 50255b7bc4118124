use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use crate::node::Node;

/// Attributes summarised by [`PoolStatus`], in rendering order.
pub const STATUS_ATTRIBUTES: [&str; 5] = ["state", "authority", "kernel", "os", "vsys"];

/// Per-attribute value-count histograms over a set of nodes.
///
/// For each attribute the values are listed most-common first; ties break on
/// the value text so the rendering is deterministic. The counts of every
/// attribute sum to the number of nodes counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStatus {
    counts: BTreeMap<&'static str, Vec<(String, usize)>>,
}

impl PoolStatus {
    pub fn over<'a, I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = &'a Node>,
    {
        let mut tallies: BTreeMap<&'static str, BTreeMap<String, usize>> = BTreeMap::new();

        for node in nodes {
            let values = [
                ("state", node.state().to_string()),
                ("authority", node.authority.clone()),
                ("kernel", node.kernel.clone()),
                ("os", node.os.clone()),
                ("vsys", node.vsys.to_string()),
            ];
            for (attribute, value) in values {
                *tallies
                    .entry(attribute)
                    .or_default()
                    .entry(value)
                    .or_insert(0) += 1;
            }
        }

        let mut counts = BTreeMap::new();
        for (attribute, tally) in tallies {
            let mut pairs: Vec<(String, usize)> = tally.into_iter().collect();
            pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            counts.insert(attribute, pairs);
        }
        PoolStatus { counts }
    }

    /// Value counts for one attribute, most-common first.
    pub fn attribute(&self, name: &str) -> &[(String, usize)] {
        self.counts.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of nodes counted under one attribute.
    pub fn total(&self, name: &str) -> usize {
        self.attribute(name).iter().map(|(_, n)| n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total("state") == 0
    }
}

impl Display for PoolStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for attribute in STATUS_ATTRIBUTES {
            writeln!(f, "{attribute}:")?;
            for (value, count) in self.attribute(attribute) {
                writeln!(f, "  {value}: {count}")?;
            }
        }
        Ok(())
    }
}
