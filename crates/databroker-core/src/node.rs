//! Signal trees.
//!
//! A [`SignalNode`] is either a branch with named children or a leaf signal
//! holding exactly one typed value. Trees are values: updating a leaf with
//! [`SignalNode::replace_at_path`] returns a new tree in which only the
//! branches from the root down to the changed leaf are rebuilt. Every other
//! subtree is shared with the original through its `Arc`.

use std::sync::Arc;

use crate::model::{DataPoint, DataType, EntryType};
use crate::path::SignalPath;

/// A node in a signal tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalNode {
    Branch(Branch),
    Leaf(Leaf),
}

/// A namespace node with children and no value of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub path: SignalPath,
    pub description: Option<String>,
    pub children: Vec<Arc<SignalNode>>,
}

/// A signal with a single typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub path: SignalPath,
    pub description: Option<String>,
    pub data_type: DataType,
    pub entry_type: EntryType,
    pub value: DataPoint,
}

impl Branch {
    pub fn new(path: SignalPath, children: Vec<SignalNode>) -> Self {
        Self {
            path,
            description: None,
            children: children.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Leaf {
    /// Create a leaf holding the default value of `data_type`.
    pub fn new(path: SignalPath, data_type: DataType, entry_type: EntryType) -> Self {
        Self {
            path,
            description: None,
            data_type,
            entry_type,
            value: data_type.default_value(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Copy of this leaf holding `value`.
    ///
    /// [`DataPoint::NotSet`] resets the leaf to its type's default value.
    pub fn with_value(&self, value: DataPoint) -> Result<Leaf, TreeError> {
        let value = match value {
            DataPoint::NotSet => self.data_type.default_value(),
            value if value.matches(self.data_type) => value,
            value => {
                return Err(TreeError::TypeMismatch {
                    path: self.path.clone(),
                    expected: self.data_type,
                    actual: value.data_type(),
                })
            }
        };

        Ok(Leaf {
            path: self.path.clone(),
            description: self.description.clone(),
            data_type: self.data_type,
            entry_type: self.entry_type,
            value,
        })
    }
}

impl SignalNode {
    pub fn path(&self) -> &SignalPath {
        match self {
            SignalNode::Branch(branch) => &branch.path,
            SignalNode::Leaf(leaf) => &leaf.path,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, SignalNode::Leaf(_))
    }

    /// Direct children; always empty for a leaf.
    pub fn children(&self) -> &[Arc<SignalNode>] {
        match self {
            SignalNode::Branch(branch) => &branch.children,
            SignalNode::Leaf(_) => &[],
        }
    }

    /// All leaf descendants in depth-first order. A leaf yields itself.
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a Leaf>) {
        match self {
            SignalNode::Leaf(leaf) => leaves.push(leaf),
            SignalNode::Branch(branch) => {
                for child in &branch.children {
                    child.collect_leaves(leaves);
                }
            }
        }
    }

    /// Find the node at `path` inside this tree.
    pub fn find(&self, path: &SignalPath) -> Option<&SignalNode> {
        if self.path() == path {
            return Some(self);
        }
        if !self.path().is_ancestor_of(path) {
            return None;
        }

        self.children()
            .iter()
            .find(|child| path.starts_with(child.path()))
            .and_then(|child| child.find(path))
    }

    /// Return a new tree in which the leaf at `path` holds `value`.
    ///
    /// Only the branches on the way from this node to the leaf are rebuilt;
    /// all sibling subtrees are shared with `self`.
    pub fn replace_at_path(
        &self,
        path: &SignalPath,
        value: DataPoint,
    ) -> Result<SignalNode, TreeError> {
        match self {
            SignalNode::Leaf(leaf) if &leaf.path == path => {
                Ok(SignalNode::Leaf(leaf.with_value(value)?))
            }
            SignalNode::Leaf(_) => Err(TreeError::NotFound(path.clone())),
            SignalNode::Branch(branch) if &branch.path == path => {
                Err(TreeError::NotALeaf(path.clone()))
            }
            SignalNode::Branch(branch) => {
                if !branch.path.is_ancestor_of(path) {
                    return Err(TreeError::NotFound(path.clone()));
                }

                let index = branch
                    .children
                    .iter()
                    .position(|child| path.starts_with(child.path()))
                    .ok_or_else(|| TreeError::NotFound(path.clone()))?;

                let replaced = branch.children[index].replace_at_path(path, value)?;

                let mut children = branch.children.clone();
                children[index] = Arc::new(replaced);

                Ok(SignalNode::Branch(Branch {
                    path: branch.path.clone(),
                    description: branch.description.clone(),
                    children,
                }))
            }
        }
    }
}

impl From<Branch> for SignalNode {
    fn from(branch: Branch) -> Self {
        SignalNode::Branch(branch)
    }
}

impl From<Leaf> for SignalNode {
    fn from(leaf: Leaf) -> Self {
        SignalNode::Leaf(leaf)
    }
}

impl std::fmt::Display for Leaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.path, self.value)
    }
}

/// Errors that can occur when updating a signal tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error("No leaf at path {0}")]
    NotFound(SignalPath),

    #[error("Path {0} is a branch and holds no value")]
    NotALeaf(SignalPath),

    #[error("Type mismatch at {path}: expected {expected}, got {}", type_name(.actual))]
    TypeMismatch {
        path: SignalPath,
        expected: DataType,
        actual: Option<DataType>,
    },
}

fn type_name(data_type: &Option<DataType>) -> &'static str {
    data_type.map(|t| t.as_str()).unwrap_or("not set")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn path(s: &str) -> SignalPath {
        SignalPath::new(s).unwrap()
    }

    /// Vehicle { Speed, Driver { HeartRate, IsEyesOnRoad } }
    fn vehicle() -> SignalNode {
        let driver = Branch::new(
            path("Vehicle.Driver"),
            vec![
                Leaf::new(path("Vehicle.Driver.HeartRate"), DataType::Uint32, EntryType::Sensor)
                    .into(),
                Leaf::new(
                    path("Vehicle.Driver.IsEyesOnRoad"),
                    DataType::Bool,
                    EntryType::Sensor,
                )
                .into(),
            ],
        );
        Branch::new(
            path("Vehicle"),
            vec![
                Leaf::new(path("Vehicle.Speed"), DataType::Float, EntryType::Sensor).into(),
                driver.into(),
            ],
        )
        .into()
    }

    fn leaf_value(tree: &SignalNode, p: &str) -> DataPoint {
        match tree.find(&path(p)) {
            Some(SignalNode::Leaf(leaf)) => leaf.value.clone(),
            other => panic!("Expected leaf at {p}, got {other:?}"),
        }
    }

    #[test]
    fn test_leaves_depth_first() {
        let tree = vehicle();
        let paths: Vec<&str> = tree.leaves().iter().map(|l| l.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "Vehicle.Speed",
                "Vehicle.Driver.HeartRate",
                "Vehicle.Driver.IsEyesOnRoad"
            ]
        );
    }

    #[test]
    fn test_leaf_yields_itself() {
        let leaf: SignalNode =
            Leaf::new(path("Vehicle.Speed"), DataType::Float, EntryType::Sensor).into();
        assert_eq!(leaf.leaves().len(), 1);
        assert_eq!(leaf.leaves()[0].path.as_str(), "Vehicle.Speed");
    }

    #[test]
    fn test_find() {
        let tree = vehicle();
        assert!(tree.find(&path("Vehicle.Driver")).is_some());
        assert!(tree.find(&path("Vehicle.Driver.HeartRate")).unwrap().is_leaf());
        assert!(tree.find(&path("Vehicle.Cabin")).is_none());
        assert!(tree.find(&path("Other")).is_none());

        let driver = tree.find(&path("Vehicle.Driver")).unwrap();
        assert!(driver.find(&path("Vehicle.Speed")).is_none());
        assert!(driver.find(&path("Vehicle.DriverSeat")).is_none());
    }

    #[test]
    fn test_replace_at_path() {
        let tree = vehicle();
        let updated = tree
            .replace_at_path(&path("Vehicle.Driver.HeartRate"), DataPoint::Uint32(72))
            .unwrap();

        assert_eq!(
            leaf_value(&updated, "Vehicle.Driver.HeartRate"),
            DataPoint::Uint32(72)
        );
        // original is untouched
        assert_eq!(
            leaf_value(&tree, "Vehicle.Driver.HeartRate"),
            DataPoint::Uint32(0)
        );
    }

    #[test]
    fn test_replace_shares_siblings() {
        let tree = vehicle();
        let updated = tree
            .replace_at_path(&path("Vehicle.Driver.HeartRate"), DataPoint::Uint32(72))
            .unwrap();

        // Vehicle.Speed is a sibling of the rebuilt Vehicle.Driver branch
        assert!(Arc::ptr_eq(&tree.children()[0], &updated.children()[0]));
        assert!(!Arc::ptr_eq(&tree.children()[1], &updated.children()[1]));

        // Vehicle.Driver.IsEyesOnRoad is a sibling of the changed leaf
        let old_driver = &tree.children()[1];
        let new_driver = &updated.children()[1];
        assert!(Arc::ptr_eq(&old_driver.children()[1], &new_driver.children()[1]));
    }

    #[test]
    fn test_replace_on_leaf_itself() {
        let leaf: SignalNode =
            Leaf::new(path("Vehicle.Speed"), DataType::Float, EntryType::Sensor).into();
        let updated = leaf
            .replace_at_path(&path("Vehicle.Speed"), DataPoint::Float(88.5))
            .unwrap();
        assert_eq!(leaf_value(&updated, "Vehicle.Speed"), DataPoint::Float(88.5));
    }

    #[test]
    fn test_replace_type_mismatch() {
        let tree = vehicle();
        let err = tree
            .replace_at_path(&path("Vehicle.Speed"), DataPoint::String("fast".into()))
            .unwrap_err();
        assert_eq!(
            err,
            TreeError::TypeMismatch {
                path: path("Vehicle.Speed"),
                expected: DataType::Float,
                actual: Some(DataType::String),
            }
        );
        assert_eq!(
            err.to_string(),
            "Type mismatch at Vehicle.Speed: expected float, got string"
        );
    }

    #[test]
    fn test_replace_unknown_path() {
        let tree = vehicle();
        assert_eq!(
            tree.replace_at_path(&path("Vehicle.Cabin.Temp"), DataPoint::Float(1.0)),
            Err(TreeError::NotFound(path("Vehicle.Cabin.Temp")))
        );
        assert_eq!(
            tree.replace_at_path(&path("Vehicle.Driver"), DataPoint::Float(1.0)),
            Err(TreeError::NotALeaf(path("Vehicle.Driver")))
        );

        let driver = tree.find(&path("Vehicle.Driver")).unwrap();
        assert_eq!(
            driver.replace_at_path(&path("Vehicle.Speed"), DataPoint::Float(1.0)),
            Err(TreeError::NotFound(path("Vehicle.Speed")))
        );
    }

    #[test]
    fn test_replace_not_set_resets_to_default() {
        let tree = vehicle()
            .replace_at_path(&path("Vehicle.Speed"), DataPoint::Float(50.0))
            .unwrap();
        let reset = tree
            .replace_at_path(&path("Vehicle.Speed"), DataPoint::NotSet)
            .unwrap();
        assert_eq!(leaf_value(&reset, "Vehicle.Speed"), DataPoint::Float(0.0));
    }
}
