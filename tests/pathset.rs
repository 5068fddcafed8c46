//! End-to-end pathset scenarios: ancestor-mask propagation, redundant-mark
//! pruning, and top-level extraction against a small filesystem-shaped tree
//! of paths.

use corebase::pathset::PathSet;

#[test]
fn mask_propagates_from_ancestor_to_descendants() {
    let ps = PathSet::new();
    ps.insert("/srv", false, 0b001).unwrap();
    ps.insert("/srv/db", false, 0b010).unwrap();

    assert_eq!(ps.mask("/srv/db/table").unwrap(), 0b011);
    assert_eq!(ps.mask("/srv/cache").unwrap(), 0b001);
    assert_eq!(ps.mask("/other").unwrap(), 0);

    // raising a bit on the root must reach every descendant's effective mask
    ps.insert("/srv", false, 0b100).unwrap();
    assert_eq!(ps.mask("/srv/db/table").unwrap(), 0b111);
}

#[test]
fn redundant_descendant_marks_are_pruned_on_propagation() {
    let ps = PathSet::new();
    ps.insert("/srv", false, 0b001).unwrap();
    ps.insert("/srv/db", false, 0b001).unwrap();
    // "/srv/db" never diverges from its ancestor's mask, so once "/srv"
    // picks up the same bit the child mark is pure redundancy.
    assert!(ps.dump().contains("/srv/db"));

    ps.insert("/srv/db", false, 0b000).unwrap(); // no-op, same bits already present
    ps.insert("/srv", false, 0b001).unwrap(); // already set, triggers transmit again
    let top = ps.find_top();
    assert!(top.contains(&"/srv".to_string()));
}

#[test]
fn unitary_mask_accumulates_across_leaves_and_branches() {
    let ps = PathSet::new();
    ps.insert("/a", true, 0b0001).unwrap();
    ps.insert("/b", false, 0b0010).unwrap();
    assert_eq!(ps.unitary_mask(), 0b0011);

    ps.remove("/a", true, 0b0001).unwrap();
    assert_eq!(ps.mask("/a").unwrap(), 0);
    assert_eq!(ps.unitary_mask(), 0b0010);
}

#[test]
fn find_top_reports_minimal_depth_representatives() {
    let ps = PathSet::new();
    ps.insert("/app", false, 1).unwrap();
    ps.insert("/app/web", false, 2).unwrap();
    ps.insert("/app/web/static", false, 4).unwrap();
    ps.insert("/db", false, 8).unwrap();

    let mut top = ps.find_top();
    top.sort();
    assert_eq!(top, vec!["/app".to_string(), "/db".to_string()]);
}

#[test]
fn clear_resets_the_whole_set() {
    let ps = PathSet::new();
    ps.insert("/a", true, 1).unwrap();
    ps.insert("/a/b", true, 2).unwrap();
    ps.clear();
    assert_eq!(ps.mask("/a/b").unwrap(), 0);
    assert_eq!(ps.unitary_mask(), 0);
    assert!(ps.find_top().is_empty());
}
