//! Arena-backed taxonomy forest.
//!
//! Taxa live in a flat arena addressed by 32-bit indices; parent and child
//! links are indices, so the structure has no shared-ownership pointers and
//! cycles are rejected at construction. Parent walks are O(1) per step.
//! The forest is immutable after load and freely shareable across threads.

pub type TaxonId = u32;

/// One node of the taxonomy forest.
#[derive(Debug, Clone)]
pub struct Taxon {
    /// Scientific name, e.g. `Escherichia coli`.
    pub name: String,
    /// Free-form rank label (`species`, `genus`, ...), if any.
    pub rank: Option<String>,
    /// Matching NCBI taxonomy database id, if any.
    pub ncbi_id: Option<i64>,
    /// Classification threshold τ. Query genomes within this distance of one
    /// of the taxon's reference genomes match the taxon. `None` means the
    /// taxon only establishes tree structure.
    pub distance_threshold: Option<f32>,
    /// Whether this taxon may be reported directly as a final prediction.
    pub report: bool,
    pub(crate) parent: Option<TaxonId>,
    pub(crate) children: Vec<TaxonId>,
}

impl Taxon {
    /// A node with just a name; links are filled in by [`Taxonomy::new`].
    pub fn new(name: impl Into<String>) -> Taxon {
        Taxon {
            name: name.into(),
            rank: None,
            ncbi_id: None,
            distance_threshold: None,
            report: true,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_rank(mut self, rank: impl Into<String>) -> Taxon {
        self.rank = Some(rank.into());
        self
    }

    pub fn with_ncbi_id(mut self, id: i64) -> Taxon {
        self.ncbi_id = Some(id);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Taxon {
        self.distance_threshold = Some(threshold);
        self
    }

    pub fn with_report(mut self, report: bool) -> Taxon {
        self.report = report;
        self
    }

    pub fn with_parent(mut self, parent: TaxonId) -> Taxon {
        self.parent = Some(parent);
        self
    }
}

/// The loaded taxonomy forest.
#[derive(Debug)]
pub struct Taxonomy {
    nodes: Vec<Taxon>,
    roots: Vec<TaxonId>,
}

impl Taxonomy {
    /// Build from nodes whose `parent` links are already arena indices.
    ///
    /// Child lists are derived here. Fails on dangling parent indices or
    /// cycles; the error string is wrapped by the caller.
    pub fn new(mut nodes: Vec<Taxon>) -> Result<Taxonomy, String> {
        let n = nodes.len();
        for node in &mut nodes {
            node.children.clear();
        }
        for i in 0..n {
            if let Some(p) = nodes[i].parent {
                if p as usize >= n {
                    return Err(format!(
                        "taxon {} has dangling parent index {}",
                        i, p
                    ));
                }
                nodes[p as usize].children.push(i as TaxonId);
            }
        }

        // Walk each node to its root; more than n steps means a cycle
        for i in 0..n {
            let mut cursor = nodes[i].parent;
            let mut steps = 0usize;
            while let Some(p) = cursor {
                steps += 1;
                if steps > n {
                    return Err(format!("taxonomy contains a cycle through taxon {}", i));
                }
                cursor = nodes[p as usize].parent;
            }
        }

        let roots = (0..n as TaxonId)
            .filter(|&i| nodes[i as usize].parent.is_none())
            .collect();
        Ok(Taxonomy { nodes, roots })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: TaxonId) -> &Taxon {
        &self.nodes[id as usize]
    }

    pub fn parent(&self, id: TaxonId) -> Option<TaxonId> {
        self.nodes[id as usize].parent
    }

    pub fn children(&self, id: TaxonId) -> &[TaxonId] {
        &self.nodes[id as usize].children
    }

    pub fn roots(&self) -> &[TaxonId] {
        &self.roots
    }

    /// Iterate through a taxon's ancestors from bottom to top.
    pub fn ancestors(&self, id: TaxonId, include_self: bool) -> Ancestors<'_> {
        Ancestors {
            taxonomy: self,
            next: if include_self {
                Some(id)
            } else {
                self.parent(id)
            },
        }
    }

    /// Whether `ancestor` is in the self-inclusive ancestry of `taxon`.
    pub fn is_ancestor(&self, ancestor: TaxonId, taxon: TaxonId) -> bool {
        self.ancestors(taxon, true).any(|t| t == ancestor)
    }

    /// Most specific taxon in the self-inclusive ancestry with `report` set.
    ///
    /// Some database taxa are hidden from human-readable output; predictions
    /// ascend to the first reportable ancestor.
    pub fn reportable(&self, id: TaxonId) -> Option<TaxonId> {
        self.ancestors(id, true).find(|&t| self.get(t).report)
    }

    /// Short `name (rank)` rendering for warnings and logs.
    pub fn describe(&self, id: TaxonId) -> String {
        let taxon = self.get(id);
        match &taxon.rank {
            Some(rank) => format!("{} ({})", taxon.name, rank),
            None => taxon.name.clone(),
        }
    }
}

/// Bottom-to-top ancestor iterator.
pub struct Ancestors<'a> {
    taxonomy: &'a Taxonomy,
    next: Option<TaxonId>,
}

impl Iterator for Ancestors<'_> {
    type Item = TaxonId;

    fn next(&mut self) -> Option<TaxonId> {
        let current = self.next?;
        self.next = self.taxonomy.parent(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Forest: 0 ── 1 ── 2, 1 ── 3, plus root 4
    fn sample() -> Taxonomy {
        Taxonomy::new(vec![
            Taxon::new("root").with_rank("genus"),
            Taxon::new("mid").with_parent(0),
            Taxon::new("leaf-a").with_parent(1),
            Taxon::new("leaf-b").with_parent(1),
            Taxon::new("other-root"),
        ])
        .unwrap()
    }

    #[test]
    fn test_structure() {
        let tax = sample();
        assert_eq!(tax.len(), 5);
        assert_eq!(tax.roots(), &[0, 4]);
        assert_eq!(tax.parent(2), Some(1));
        assert_eq!(tax.children(1), &[2, 3]);
        assert_eq!(tax.children(2), &[] as &[TaxonId]);
    }

    #[test]
    fn test_ancestors() {
        let tax = sample();
        let up: Vec<TaxonId> = tax.ancestors(2, true).collect();
        assert_eq!(up, vec![2, 1, 0]);
        let up: Vec<TaxonId> = tax.ancestors(2, false).collect();
        assert_eq!(up, vec![1, 0]);
        let up: Vec<TaxonId> = tax.ancestors(4, false).collect();
        assert!(up.is_empty());
    }

    #[test]
    fn test_is_ancestor() {
        let tax = sample();
        assert!(tax.is_ancestor(0, 2));
        assert!(tax.is_ancestor(2, 2));
        assert!(!tax.is_ancestor(2, 0));
        assert!(!tax.is_ancestor(4, 2));
    }

    #[test]
    fn test_reportable_walks_up() {
        let tax = Taxonomy::new(vec![
            Taxon::new("visible-root"),
            Taxon::new("hidden").with_parent(0).with_report(false),
            Taxon::new("leaf").with_parent(1).with_report(false),
        ])
        .unwrap();
        assert_eq!(tax.reportable(2), Some(0));
        assert_eq!(tax.reportable(0), Some(0));

        let all_hidden = Taxonomy::new(vec![Taxon::new("hidden").with_report(false)]).unwrap();
        assert_eq!(all_hidden.reportable(0), None);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut a = Taxon::new("a");
        a.parent = Some(1);
        let mut b = Taxon::new("b");
        b.parent = Some(0);
        assert!(Taxonomy::new(vec![a, b]).is_err());
    }

    #[test]
    fn test_dangling_parent_rejected() {
        assert!(Taxonomy::new(vec![Taxon::new("a").with_parent(7)]).is_err());
    }
}
