//! Classify queries based on distance to reference genomes.
//!
//! The classifier consumes one query's distance vector plus the taxonomy
//! forest and produces a conservative prediction: the policy throughout is
//! to prefer no prediction over a wrong one. Non-strict mode considers only
//! the closest reference; strict mode finds every reference whose taxon
//! threshold is met and reconciles the resulting taxa.

use std::collections::HashMap;
use std::fmt;

use crate::taxonomy::{TaxonId, Taxonomy};

/// Find the most specific taxon in the self-inclusive ancestry of `taxon`
/// whose classification threshold is set and satisfied by distance `d`.
pub fn matching_taxon(taxonomy: &Taxonomy, taxon: TaxonId, d: f32) -> Option<TaxonId> {
    taxonomy
        .ancestors(taxon, true)
        .find(|&t| matches!(taxonomy.get(t).distance_threshold, Some(threshold) if d <= threshold))
}

/// The next most specific taxon in the ancestry of `taxon` whose threshold
/// was *not* met by distance `d`.
///
/// `None` when the starting taxon's own threshold was met. Taxa without a
/// threshold are passed over when advancing but still remembered as the
/// candidate, matching how unannotated intermediate levels behave.
pub fn next_taxon(taxonomy: &Taxonomy, taxon: TaxonId, d: f32) -> Option<TaxonId> {
    let mut lo = None;
    let mut hi = Some(taxon);

    while let Some(h) = hi {
        if let Some(threshold) = taxonomy.get(h).distance_threshold {
            if d <= threshold {
                return lo;
            }
        }
        lo = Some(h);
        hi = taxonomy
            .ancestors(h, false)
            .find(|&a| taxonomy.get(a).distance_threshold.is_some());
    }

    lo
}

/// Map each matched taxon to the reference indices that matched it.
///
/// A reference matches the most specific thresholded ancestor of its taxon
/// that `dists[i]` satisfies; references with no taxon or no satisfied
/// threshold contribute nothing. Insertion order is preserved so downstream
/// tie-breaking is deterministic.
pub fn find_matches(
    taxonomy: &Taxonomy,
    ref_taxa: &[Option<TaxonId>],
    dists: &[f32],
) -> Vec<(TaxonId, Vec<usize>)> {
    let mut order: Vec<(TaxonId, Vec<usize>)> = Vec::new();
    let mut position: HashMap<TaxonId, usize> = HashMap::new();

    for (i, (&taxon, &d)) in ref_taxa.iter().zip(dists).enumerate() {
        let Some(taxon) = taxon else { continue };
        if let Some(matched) = matching_taxon(taxonomy, taxon, d) {
            match position.get(&matched) {
                Some(&pos) => order[pos].1.push(i),
                None => {
                    position.insert(matched, order.len());
                    order.push((matched, vec![i]));
                }
            }
        }
    }

    order
}

/// Reconcile a set of matched taxa into a single consensus.
///
/// Taxa in one lineage resolve to the most specific of them. Incomparable
/// taxa back off to the deepest taxon comparable with every match; the
/// second return value holds the matches that are strict descendants of the
/// consensus (non-empty exactly when such a back-off happened). Taxa from
/// entirely different trees have no consensus at all.
pub fn consensus_taxon(taxonomy: &Taxonomy, taxa: &[TaxonId]) -> (Option<TaxonId>, Vec<TaxonId>) {
    if taxa.is_empty() {
        return (None, Vec::new());
    }

    // Current consensus and its ancestors, bottom to top
    let mut trunk: Vec<TaxonId> = taxonomy.ancestors(taxa[0], true).collect();

    for &taxon in &taxa[1..] {
        if trunk.contains(&taxon) {
            continue;
        }

        let mut met_trunk = false;
        for ancestor in taxonomy.ancestors(taxon, false) {
            if let Some(i) = trunk.iter().position(|&t| t == ancestor) {
                if i == 0 {
                    // Strict descendant of the consensus; it becomes the new one
                    trunk = taxonomy.ancestors(taxon, true).collect();
                } else {
                    // Meets the trunk further up; the intersection is the consensus
                    trunk.drain(..i);
                }
                met_trunk = true;
                break;
            }
        }

        if !met_trunk {
            return (None, taxa.to_vec());
        }
    }

    let others = taxa
        .iter()
        .copied()
        .filter(|t| !trunk.contains(t))
        .collect();
    (Some(trunk[0]), others)
}

/// Match between a query and a single reference genome.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomeMatch {
    /// Index of the reference in the database.
    pub genome: usize,
    /// Jaccard distance between query and this reference.
    pub distance: f32,
    /// Taxon prediction from this match alone: the reference taxon or one of
    /// its ancestors, `None` when no threshold was met.
    pub matched_taxon: Option<TaxonId>,
}

/// Non-fatal warnings attached to a classification.
///
/// The set of variants is stable across releases; messages may be reworded.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierWarning {
    /// The closest reference's taxon has no distance threshold.
    NoThreshold { taxon: String },
    /// Strict-mode matches were mutually inconsistent and backed off to a
    /// common ancestor. Carries descriptions of the conflicting taxa.
    InconsistentMatches { taxa: Vec<String> },
    /// The reference driving the prediction is not the closest reference.
    PrimaryNotClosest,
    /// No prediction was produced although at least one threshold was met;
    /// indicates a gap in the taxonomy annotation.
    NoPrediction,
}

impl fmt::Display for ClassifierWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierWarning::NoThreshold { taxon } => {
                write!(f, "Taxon {} of closest reference has no distance threshold.", taxon)
            }
            ClassifierWarning::InconsistentMatches { taxa } => {
                write!(
                    f,
                    "Query matched {} inconsistent taxa: {}. Reporting lowest common ancestor of this set.",
                    taxa.len(),
                    taxa.join(", ")
                )
            }
            ClassifierWarning::PrimaryNotClosest => {
                write!(f, "Primary genome match is not closest match.")
            }
            ClassifierWarning::NoPrediction => {
                write!(
                    f,
                    "No prediction despite a satisfied threshold; the taxonomy annotation may be incomplete."
                )
            }
        }
    }
}

/// Result of applying the classifier to a single query genome.
#[derive(Debug, Clone)]
pub struct ClassifierResult {
    /// Whether classification ran with no fatal inconsistency. `true` does
    /// not imply a prediction was made.
    pub success: bool,
    /// Taxon predicted by the classifier (possibly non-reportable).
    pub predicted_taxon: Option<TaxonId>,
    /// Closest reference whose match produced `predicted_taxon` or a
    /// descendant of it. `None` when no prediction was made.
    pub primary_match: Option<GenomeMatch>,
    /// Closest reference overall; almost always equals `primary_match`.
    pub closest_match: GenomeMatch,
    /// Next most specific taxon whose threshold was not met, from the
    /// ancestry of the closest reference's taxon.
    pub next_taxon: Option<TaxonId>,
    pub warnings: Vec<ClassifierWarning>,
    /// Message describing a fatal inconsistency, if any.
    pub error: Option<String>,
}

/// Predict the taxonomy of a query genome from its distances to the
/// reference set.
///
/// `ref_taxa[i]` is the taxon of reference `i` (if any) and `dists[i]` its
/// distance to the query; both are indexed by database signature order and
/// must be non-empty. Among references at equal minimum distance the
/// smallest index wins.
pub fn classify(
    taxonomy: &Taxonomy,
    ref_taxa: &[Option<TaxonId>],
    dists: &[f32],
    strict: bool,
) -> ClassifierResult {
    assert_eq!(ref_taxa.len(), dists.len());
    assert!(!dists.is_empty(), "cannot classify against zero references");

    let closest = argmin_first(dists);
    let dmin = dists[closest];
    let closest_taxon = ref_taxa[closest];
    let closest_match = GenomeMatch {
        genome: closest,
        distance: dmin,
        matched_taxon: closest_taxon.and_then(|t| matching_taxon(taxonomy, t, dmin)),
    };
    let next = closest_taxon.and_then(|t| next_taxon(taxonomy, t, dmin));

    let mut warnings = Vec::new();
    if let Some(t) = closest_taxon {
        if taxonomy.get(t).distance_threshold.is_none() {
            warnings.push(ClassifierWarning::NoThreshold {
                taxon: taxonomy.describe(t),
            });
        }
    }

    if !strict {
        // Use the closest match only
        let primary = closest_match
            .matched_taxon
            .is_some()
            .then(|| closest_match.clone());
        return ClassifierResult {
            success: true,
            predicted_taxon: closest_match.matched_taxon,
            primary_match: primary,
            closest_match,
            next_taxon: next,
            warnings,
            error: None,
        };
    }

    // Find all matches and attempt to reconcile them
    let matches = find_matches(taxonomy, ref_taxa, dists);
    if matches.is_empty() {
        return ClassifierResult {
            success: true,
            predicted_taxon: None,
            primary_match: None,
            closest_match,
            next_taxon: next,
            warnings,
            error: None,
        };
    }

    let matched_taxa: Vec<TaxonId> = matches.iter().map(|(t, _)| *t).collect();
    let (consensus, others) = consensus_taxon(taxonomy, &matched_taxa);

    let primary_match = consensus.map(|consensus| {
        let mut best: Option<GenomeMatch> = None;
        for (taxon, idxs) in &matches {
            if !taxonomy.is_ancestor(consensus, *taxon) {
                continue;
            }
            for &i in idxs {
                if best.as_ref().map_or(true, |b| dists[i] < b.distance) {
                    best = Some(GenomeMatch {
                        genome: i,
                        distance: dists[i],
                        matched_taxon: Some(*taxon),
                    });
                }
            }
        }
        best.expect("consensus lineage contains at least one match")
    });

    if !others.is_empty() {
        let mut described: Vec<String> = others.iter().map(|&t| taxonomy.describe(t)).collect();
        described.sort_unstable();
        warnings.push(ClassifierWarning::InconsistentMatches { taxa: described });
    }

    let mut success = true;
    let mut error = None;
    if consensus.is_none() {
        // Matches lie in entirely different trees
        success = false;
        error = Some("Matched taxa have no common ancestor.".to_string());
    }

    if let Some(primary) = &primary_match {
        if primary.genome != closest_match.genome {
            warnings.push(ClassifierWarning::PrimaryNotClosest);
        }
    }

    ClassifierResult {
        success,
        predicted_taxon: consensus,
        primary_match,
        closest_match,
        next_taxon: next,
        warnings,
        error,
    }
}

/// Index of the minimum, first occurrence winning ties.
fn argmin_first(dists: &[f32]) -> usize {
    let mut best = 0usize;
    for (i, &d) in dists.iter().enumerate().skip(1) {
        if d < dists[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Taxon;

    /// Lineage leaf(τ=.1) -> (τ=.2) -> (no τ) -> root(τ=.3).
    /// Node 0 is the root; node 3 is the leaf.
    fn ladder() -> Taxonomy {
        Taxonomy::new(vec![
            Taxon::new("t-root").with_threshold(0.3),
            Taxon::new("t-mid").with_parent(0),
            Taxon::new("t-low").with_parent(1).with_threshold(0.2),
            Taxon::new("t-leaf").with_parent(2).with_threshold(0.1),
        ])
        .unwrap()
    }

    #[test]
    fn test_matching_taxon_ladder() {
        let tax = ladder();
        assert_eq!(matching_taxon(&tax, 3, 0.05), Some(3));
        assert_eq!(matching_taxon(&tax, 3, 0.1), Some(3));
        assert_eq!(matching_taxon(&tax, 3, 0.15), Some(2));
        assert_eq!(matching_taxon(&tax, 3, 0.25), Some(0));
        assert_eq!(matching_taxon(&tax, 3, 0.35), None);
    }

    #[test]
    fn test_next_taxon_ladder() {
        let tax = ladder();
        // Leaf threshold met: nothing unmet below it
        assert_eq!(next_taxon(&tax, 3, 0.05), None);
        // Leaf unmet, t-low met
        assert_eq!(next_taxon(&tax, 3, 0.15), Some(3));
        // Only the root met; the unthresholded level is skipped over
        assert_eq!(next_taxon(&tax, 3, 0.25), Some(2));
        // Nothing met: the most general unmet taxon
        assert_eq!(next_taxon(&tax, 3, 0.35), Some(0));
    }

    /// Forest used by the consensus tests:
    ///   A1(0) ── B1(1) ── C1(2)
    ///                  ── C2(3)
    ///         ── B2(4)
    ///   A2(5)
    fn forest() -> Taxonomy {
        Taxonomy::new(vec![
            Taxon::new("A1"),
            Taxon::new("B1").with_parent(0),
            Taxon::new("C1").with_parent(1),
            Taxon::new("C2").with_parent(1),
            Taxon::new("B2").with_parent(0),
            Taxon::new("A2"),
        ])
        .unwrap()
    }

    #[test]
    fn test_consensus_single_lineage() {
        let tax = forest();
        assert_eq!(consensus_taxon(&tax, &[]), (None, vec![]));
        assert_eq!(consensus_taxon(&tax, &[0]), (Some(0), vec![]));
        assert_eq!(consensus_taxon(&tax, &[0, 1]), (Some(1), vec![]));
        assert_eq!(consensus_taxon(&tax, &[0, 2]), (Some(2), vec![]));
        assert_eq!(consensus_taxon(&tax, &[0, 1, 2]), (Some(2), vec![]));
    }

    #[test]
    fn test_consensus_split_with_ancestor() {
        let tax = forest();
        assert_eq!(consensus_taxon(&tax, &[1, 4]), (Some(0), vec![1, 4]));
        assert_eq!(consensus_taxon(&tax, &[2, 4]), (Some(0), vec![2, 4]));
        assert_eq!(consensus_taxon(&tax, &[1, 2, 4]), (Some(0), vec![1, 2, 4]));
        assert_eq!(consensus_taxon(&tax, &[0, 2, 3]), (Some(1), vec![2, 3]));
    }

    #[test]
    fn test_consensus_disjoint_trees() {
        let tax = forest();
        assert_eq!(consensus_taxon(&tax, &[0, 5]), (None, vec![0, 5]));
        assert_eq!(consensus_taxon(&tax, &[1, 5]), (None, vec![1, 5]));
        assert_eq!(consensus_taxon(&tax, &[0, 1, 5]), (None, vec![0, 1, 5]));
    }

    /// Species(τ=.2) under genus(τ=.3); reference 0 is the species.
    fn species_genus() -> (Taxonomy, Vec<Option<TaxonId>>) {
        let tax = Taxonomy::new(vec![
            Taxon::new("Escherichia").with_rank("genus").with_threshold(0.3),
            Taxon::new("Escherichia coli")
                .with_rank("species")
                .with_parent(0)
                .with_threshold(0.2),
        ])
        .unwrap();
        let ref_taxa = vec![Some(1), None, None];
        (tax, ref_taxa)
    }

    #[test]
    fn test_classify_species_hit() {
        let (tax, ref_taxa) = species_genus();
        let result = classify(&tax, &ref_taxa, &[0.1, 0.5, 0.9], false);

        assert!(result.success);
        assert_eq!(result.predicted_taxon, Some(1));
        assert_eq!(result.closest_match.genome, 0);
        assert_eq!(result.closest_match.distance, 0.1);
        assert_eq!(result.primary_match, Some(result.closest_match.clone()));
        assert_eq!(result.next_taxon, None);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_classify_genus_fallback() {
        let (tax, ref_taxa) = species_genus();
        let result = classify(&tax, &ref_taxa, &[0.25, 0.5, 0.9], false);

        assert_eq!(result.predicted_taxon, Some(0));
        assert_eq!(result.closest_match.genome, 0);
        assert_eq!(result.next_taxon, Some(1));
    }

    #[test]
    fn test_classify_no_match() {
        let (tax, ref_taxa) = species_genus();
        let result = classify(&tax, &ref_taxa, &[0.5, 0.6, 0.9], false);

        assert!(result.success);
        assert_eq!(result.predicted_taxon, None);
        assert!(result.primary_match.is_none());
        assert_eq!(result.next_taxon, Some(0));
    }

    #[test]
    fn test_classify_tie_breaks_low_index() {
        let (tax, mut ref_taxa) = species_genus();
        ref_taxa[1] = Some(1);
        let result = classify(&tax, &ref_taxa, &[0.1, 0.1, 0.9], false);
        assert_eq!(result.closest_match.genome, 0);
    }

    #[test]
    fn test_classify_no_threshold_warning() {
        let tax = Taxonomy::new(vec![Taxon::new("unset")]).unwrap();
        let result = classify(&tax, &[Some(0)], &[0.4], false);
        assert_eq!(result.predicted_taxon, None);
        assert!(matches!(
            result.warnings.as_slice(),
            [ClassifierWarning::NoThreshold { .. }]
        ));
    }

    #[test]
    fn test_strict_agrees_on_single_lineage() {
        let (tax, _) = species_genus();
        // Two references on the species, one unrelated
        let ref_taxa = vec![Some(1), Some(1), None];
        let result = classify(&tax, &ref_taxa, &[0.1, 0.15, 0.9], true);

        assert!(result.success);
        assert_eq!(result.predicted_taxon, Some(1));
        let primary = result.primary_match.unwrap();
        assert_eq!(primary.genome, 0);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_strict_inconsistent_backs_off() {
        let tax = Taxonomy::new(vec![
            Taxon::new("B1").with_threshold(0.5),
            Taxon::new("C1").with_parent(0).with_threshold(0.2),
            Taxon::new("C2").with_parent(0).with_threshold(0.2),
        ])
        .unwrap();
        // One reference in each incomparable child, both within threshold
        let ref_taxa = vec![Some(1), Some(2)];
        let result = classify(&tax, &ref_taxa, &[0.1, 0.15], true);

        assert!(result.success);
        assert_eq!(result.predicted_taxon, Some(0));
        assert!(result
            .warnings
            .iter()
            .any(|w| matches!(w, ClassifierWarning::InconsistentMatches { taxa } if taxa.len() == 2)));
    }

    #[test]
    fn test_strict_disjoint_trees_fails() {
        let tax = Taxonomy::new(vec![
            Taxon::new("tree-a").with_threshold(0.5),
            Taxon::new("tree-b").with_threshold(0.5),
        ])
        .unwrap();
        let result = classify(&tax, &[Some(0), Some(1)], &[0.1, 0.15], true);

        assert!(!result.success);
        assert_eq!(result.predicted_taxon, None);
        assert!(result.error.is_some());
        assert!(result.primary_match.is_none());
    }

    #[test]
    fn test_strict_no_matches() {
        let (tax, ref_taxa) = species_genus();
        let result = classify(&tax, &ref_taxa, &[0.9, 0.95, 0.99], true);
        assert!(result.success);
        assert_eq!(result.predicted_taxon, None);
        assert!(result.primary_match.is_none());
    }

    #[test]
    fn test_strict_primary_not_closest() {
        // Closest reference carries no taxon; a farther one drives the match
        let (tax, _) = species_genus();
        let ref_taxa = vec![None, Some(1)];
        let result = classify(&tax, &ref_taxa, &[0.05, 0.1], true);

        assert_eq!(result.closest_match.genome, 0);
        assert_eq!(result.predicted_taxon, Some(1));
        assert_eq!(result.primary_match.as_ref().unwrap().genome, 1);
        assert!(result
            .warnings
            .iter()
            .any(|w| matches!(w, ClassifierWarning::PrimaryNotClosest)));
    }
}
