//! ROOT input.

use super::*;
use indexmap::IndexMap;
use oxyroot::{Branch, RootFile};
use std::path::{Path, PathBuf};
use tracing::debug;

const ROOT_EXTENSION: &str = "root";

fn expand_input_path(file_path: &str) -> CatfitResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// Check that `path` ends in `.<extension>` and names an existing file.
pub(crate) fn validate_input_file(path: &Path, extension: &str) -> CatfitResult<()> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
        return Err(CatfitError::WrongExtension {
            path: path.display().to_string(),
            expected: extension.to_string(),
        });
    }
    if !path.is_file() {
        return Err(CatfitError::CannotOpen {
            path: path.display().to_string(),
            reason: "no such file".to_string(),
        });
    }
    Ok(())
}

/// Import the `observable` branch of the TTree `tree_name` stored in `file_path` as an unbinned
/// [`Dataset`] named [`DATASET_NAME`].
///
/// Only entries inside the observable range which pass `cut` are kept. If `weight_branch` names
/// a branch present in the tree, its values become the entry weights; otherwise the dataset is
/// unweighted.
///
/// # Errors
/// The path must end in `.root` and the file must open. The tree and the observable branch must
/// exist, and the branch must hold scalar floats or doubles.
pub fn read_tree(
    file_path: &str,
    tree_name: &str,
    observable: &Observable,
    cut: &Cut,
    weight_branch: Option<&str>,
) -> CatfitResult<Dataset> {
    let path = expand_input_path(file_path)?;
    validate_input_file(&path, ROOT_EXTENSION)?;
    let mut file = RootFile::open(&path).map_err(|err| CatfitError::CannotOpen {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    let tree = file
        .get_tree(tree_name)
        .map_err(|_| CatfitError::MissingTree {
            name: tree_name.to_string(),
            path: path.display().to_string(),
        })?;

    let mut lookup: BranchLookup<'_> = IndexMap::new();
    for branch in tree.branches() {
        if let Some(kind) = branch_scalar_kind(branch) {
            lookup.insert(branch.name(), (kind, branch));
        }
    }

    let values = read_branch_values(&lookup, &observable.name, tree_name)?;
    let weights = match weight_branch {
        Some(name) if lookup.contains_key(name) => {
            Some(read_branch_values(&lookup, name, tree_name)?)
        }
        _ => None,
    };
    debug!(
        "read {} entries of \"{}\" from {}:{}",
        values.len(),
        observable.name,
        path.display(),
        tree_name
    );
    Dataset::from_values(DATASET_NAME, observable, &values, weights.as_deref(), cut)
}

type BranchLookup<'a> = IndexMap<&'a str, (RootScalarKind, &'a Branch)>;

#[derive(Clone, Copy)]
enum RootScalarKind {
    F32,
    F64,
}

fn branch_scalar_kind(branch: &Branch) -> Option<RootScalarKind> {
    let type_name = branch.item_type_name();
    let lower = type_name.to_ascii_lowercase();
    if lower.contains("vector") {
        return None;
    }
    match lower.as_str() {
        "float" | "float_t" | "float32_t" => Some(RootScalarKind::F32),
        "double" | "double_t" | "double32_t" => Some(RootScalarKind::F64),
        _ => None,
    }
}

fn read_branch_values(
    lookup: &BranchLookup<'_>,
    column_name: &str,
    tree_name: &str,
) -> CatfitResult<Vec<Float>> {
    let (kind, branch) =
        lookup
            .get(column_name)
            .copied()
            .ok_or_else(|| CatfitError::MissingBranch {
                name: column_name.to_string(),
                tree: tree_name.to_string(),
            })?;
    let values = match kind {
        RootScalarKind::F32 => branch
            .as_iter::<f32>()
            .map_err(|err| read_error(column_name, err))?
            .map(|value| value as Float)
            .collect(),
        RootScalarKind::F64 => branch
            .as_iter::<f64>()
            .map_err(|err| read_error(column_name, err))?
            .collect(),
    };
    Ok(values)
}

fn read_error<E: std::fmt::Display>(column_name: &str, err: E) -> CatfitError {
    CatfitError::Custom(format!("Failed to read branch '{column_name}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObservableConfig;
    use approx::assert_relative_eq;
    use oxyroot::WriterTree;
    use std::fs;

    const TREE: &str = "amumuTree_DATA";

    fn observable() -> Observable {
        Observable::from_config(&ObservableConfig::default()).unwrap()
    }

    /// A file holding `x` as doubles and `w` as floats.
    fn write_events(dir: &Path) -> String {
        let path = dir.join("events.root");
        let mut file = RootFile::create(&path).unwrap();
        let mut tree = WriterTree::new(TREE);
        tree.new_branch("x", vec![5.0f64, 20.0, 28.0, 70.0, 71.0].into_iter());
        tree.new_branch("w", vec![1.0f32, 2.0, 0.5, 1.5, 3.0].into_iter());
        tree.write(&mut file).unwrap();
        file.close().unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn reads_observable_inside_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_events(dir.path());
        let cut = Cut::parse("x>0", "x").unwrap();
        let dataset = read_tree(&path, TREE, &observable(), &cut, None).unwrap();
        assert_eq!(dataset.values(), [20.0, 28.0, 70.0]);
        assert!(dataset.weights().is_none());
        assert_relative_eq!(dataset.weighted_len(), 3.0);
    }

    #[test]
    fn reads_weights_and_applies_cut() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_events(dir.path());
        let dataset =
            read_tree(&path, TREE, &observable(), &Cut::always(), Some("w")).unwrap();
        assert_eq!(dataset.values(), [20.0, 28.0, 70.0]);
        assert_eq!(dataset.weights().unwrap(), [2.0, 0.5, 1.5]);
        assert_relative_eq!(dataset.weighted_len(), 4.0);

        let cut = Cut::parse("x != 28", "x").unwrap();
        let dataset = read_tree(&path, TREE, &observable(), &cut, Some("w")).unwrap();
        assert_eq!(dataset.values(), [20.0, 70.0]);
        assert_eq!(dataset.weights().unwrap(), [2.0, 1.5]);

        // an absent weight branch leaves the data unweighted
        let dataset = read_tree(&path, TREE, &observable(), &cut, Some("weight")).unwrap();
        assert!(dataset.weights().is_none());
    }

    #[test]
    fn missing_tree_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_events(dir.path());
        let err = read_tree(&path, "nope", &observable(), &Cut::always(), None).unwrap_err();
        assert!(matches!(err, CatfitError::MissingTree { ref name, .. } if name == "nope"));

        let y = Observable::new("y", 20.0, 12.0, 70.0).unwrap();
        let err = read_tree(&path, TREE, &y, &Cut::always(), None).unwrap_err();
        assert!(matches!(
            err,
            CatfitError::MissingBranch { ref name, ref tree } if name == "y" && tree == TREE
        ));
    }

    #[test]
    fn rejects_wrong_extension() {
        let err = read_tree(
            "events.txt",
            "amumuTree_DATA",
            &observable(),
            &Cut::always(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CatfitError::WrongExtension { .. }));
        assert!(err.to_string().contains("Input not a .root file"));
    }

    #[test]
    fn rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.root");
        let err = read_tree(
            path.to_str().unwrap(),
            "amumuTree_DATA",
            &observable(),
            &Cut::always(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CatfitError::CannotOpen { .. }));
    }

    #[test]
    fn validate_extension_only_checks_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ws.json");
        fs::write(&path, b"{}").unwrap();
        assert!(validate_input_file(&path, "json").is_ok());
        assert!(validate_input_file(&path, "root").is_err());
    }
}
