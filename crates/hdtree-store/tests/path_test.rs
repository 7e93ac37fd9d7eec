//! Path traversal against a populated store.

use hdtree_core::address::AddressType;
use hdtree_core::error::{HdError, TreeError};
use hdtree_core::path::QuerySegment;
use hdtree_core::tree::{LevelInsert, TreeInsert};
use hdtree_core::types::{
    DerivationLevel, DerivationScheme, DerivationTables, KeyDerivationId, LevelSpecific,
};
use hdtree_store::derivations::{GetChildren, GetDerivationsByPath, GetPathWithSpecific};
use hdtree_store::specific::GetDerivationSpecific;
use hdtree_store::tree::AddDerivationTree;
use hdtree_store::{TableSet, TreeStore, deps};

fn tables() -> DerivationTables {
    DerivationTables::for_scheme(DerivationScheme::Bip44)
}

fn declared() -> TableSet {
    deps![AddDerivationTree, GetDerivationsByPath].with_derivation_tables(&tables())
}

fn chain(index: u32, addresses: &[u32]) -> TreeInsert {
    TreeInsert::new(index, LevelInsert::Chain { display_cutoff: 0 }).with_children(
        addresses
            .iter()
            .map(|i| TreeInsert::address(*i, format!("c{index}a{i}"), AddressType::Legacy, false))
            .collect(),
    )
}

/// root -> 44 -> 1815 -> account 0 -> chains 0 (addresses 2, 0, 1) and 1 (address 0)
fn populated() -> (TreeStore, tempfile::TempDir, KeyDerivationId) {
    let dir = tempfile::tempdir().unwrap();
    let store = TreeStore::open(dir.path().join("tree")).unwrap();
    let root = store
        .atomically::<_, HdError, _>(declared(), |tx| {
            let root = AddDerivationTree::insert_root(tx, None, None, &tables())?;
            let desc = vec![TreeInsert::new(44, LevelInsert::Purpose).with_children(vec![
                TreeInsert::new(1815, LevelInsert::CoinType).with_children(vec![
                    TreeInsert::new(0, LevelInsert::Account)
                        .with_children(vec![chain(1, &[0]), chain(0, &[2, 0, 1])]),
                ]),
            ])];
            AddDerivationTree::excluding_parent(tx, root.id, &desc, &tables())?;
            Ok(root.id)
        })
        .unwrap();
    (store, dir, root)
}

fn run<T>(
    store: &TreeStore,
    f: impl FnOnce(&hdtree_store::StoreTx<'_>) -> Result<T, HdError>,
) -> Result<T, HdError> {
    store.atomically(declared(), f)
}

#[test]
fn parent_path_runs_from_ancestor_to_start() {
    let (store, _dir, root) = populated();
    let path = run(&store, |tx| {
        let leaf = GetDerivationsByPath::get_single_path(tx, root, &[44, 1815, 0, 0, 1])?[5].id;
        GetDerivationsByPath::get_parent_path(tx, leaf, 3)
    })
    .unwrap();
    let levels: Vec<_> = path.iter().map(|r| r.level).collect();
    assert_eq!(
        levels,
        vec![
            DerivationLevel::CoinType,
            DerivationLevel::Account,
            DerivationLevel::Chain,
            DerivationLevel::Address
        ]
    );
    assert_eq!(path[3].index, Some(1));
}

#[test]
fn parent_path_past_root_is_stale() {
    let (store, _dir, root) = populated();
    let err = run(&store, |tx| {
        let account = GetDerivationsByPath::get_single_path(tx, root, &[44, 1815, 0])?[3].id;
        GetDerivationsByPath::get_parent_path(tx, account, 4)
    })
    .unwrap_err();
    assert!(matches!(err, HdError::Tree(TreeError::StaleState(_))));
}

#[test]
fn parent_path_of_unknown_node_is_not_found() {
    let (store, _dir, _root) = populated();
    let err = run(&store, |tx| {
        GetDerivationsByPath::get_parent_path(tx, KeyDerivationId(9_999), 0)
    })
    .unwrap_err();
    assert!(matches!(err, HdError::Tree(TreeError::NotFound(_))));
}

#[test]
fn single_path_missing_child_is_not_found() {
    let (store, _dir, root) = populated();
    let err = run(&store, |tx| {
        GetDerivationsByPath::get_single_path(tx, root, &[44, 1815, 9])
    })
    .unwrap_err();
    assert!(matches!(err, HdError::Tree(TreeError::NotFound(_))));
}

#[test]
fn wildcard_query_is_ordered_by_index() {
    let (store, _dir, root) = populated();
    let found = run(&store, |tx| {
        GetDerivationsByPath::get_by_query(
            tx,
            root,
            &[
                QuerySegment::Fixed(44),
                QuerySegment::Fixed(1815),
                QuerySegment::Fixed(0),
                QuerySegment::Wildcard,
                QuerySegment::Wildcard,
            ],
        )
    })
    .unwrap();
    let paths: Vec<Vec<u32>> = found.into_iter().map(|(p, _)| p).collect();
    assert_eq!(
        paths,
        vec![
            vec![44, 1815, 0, 0, 0],
            vec![44, 1815, 0, 0, 1],
            vec![44, 1815, 0, 0, 2],
            vec![44, 1815, 0, 1, 0],
        ]
    );
}

#[test]
fn fixed_query_miss_is_empty_not_error() {
    let (store, _dir, root) = populated();
    let found = run(&store, |tx| {
        GetDerivationsByPath::get_by_query(tx, root, &[QuerySegment::Fixed(45)])
    })
    .unwrap();
    assert!(found.is_empty());
}

#[test]
fn path_with_specific_loads_chain_record() {
    let (store, _dir, root) = populated();
    let found = run(&store, |tx| {
        GetPathWithSpecific::get_path(
            tx,
            root,
            &[44, 1815, 0, 0],
            DerivationLevel::Chain,
            |tx, node| GetDerivationSpecific::require(tx, node.id, node.level, &tables()),
        )
    })
    .unwrap()
    .unwrap();
    assert_eq!(found.path.len(), 5);
    assert_eq!(found.specific, LevelSpecific::Chain { display_cutoff: Some(0) });
}

#[test]
fn path_with_specific_absent_node_is_none() {
    let (store, _dir, root) = populated();
    let found = run(&store, |tx| {
        GetPathWithSpecific::get_path(tx, root, &[44, 1815, 0, 5], DerivationLevel::Chain, |_, _| {
            Err(HdError::stale("loader must not run"))
        })
    })
    .unwrap();
    assert!(found.is_none());
}

#[test]
fn path_with_specific_propagates_loader_failure() {
    let (store, _dir, root) = populated();
    let err = run(&store, |tx| {
        GetPathWithSpecific::get_path(tx, root, &[44, 1815, 0, 0], DerivationLevel::Chain, |_, _| {
            Err(HdError::not_found("loader"))
        })
    })
    .unwrap_err();
    assert_eq!(err, HdError::not_found("loader"));
}

#[test]
fn children_are_counted() {
    let (store, _dir, root) = populated();
    let n = run(&store, |tx| {
        let chain = GetDerivationsByPath::get_single_path(tx, root, &[44, 1815, 0, 0])?[4].id;
        GetChildren::count(tx, chain)
    })
    .unwrap();
    assert_eq!(n, 3);
}
