//! Rooted phylogenetic tree with branch lengths, read from Newick.

use crate::error::{EdaError, Result};
use std::collections::HashMap;
use std::path::Path;

/// A node in the phylogenetic tree (array-based representation).
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Index of the parent node (`None` for the root).
    pub parent: Option<usize>,
    /// Length of the branch from this node to its parent.
    pub branch_length: f64,
    /// Taxon ID for leaves; internal nodes may carry a label or be empty.
    pub label: String,
    /// Child indices.
    pub children: Vec<usize>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A phylogenetic tree in array representation.
///
/// Nodes are stored in pre-order: every parent index is smaller than its
/// children's, so a reverse scan visits children before parents and a
/// forward scan visits parents before children.
#[derive(Debug, Clone)]
pub struct PhyloTree {
    nodes: Vec<TreeNode>,
    leaf_index: HashMap<String, usize>,
}

impl PhyloTree {
    /// Parse a Newick string, e.g. `((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);`.
    ///
    /// Supports internal node labels (e.g. bootstrap values), single-quoted
    /// labels and missing branch lengths (read as 0).
    ///
    /// # Errors
    /// `TreeParse` for unbalanced parentheses, empty leaves, duplicate leaf
    /// labels, or unparseable or negative branch lengths.
    pub fn from_newick(newick: &str) -> Result<Self> {
        let chars: Vec<char> = newick.trim().chars().collect();
        let mut nodes: Vec<TreeNode> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();
        // true right after '(' or ',' where a subtree must follow
        let mut need_node = false;
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                c if c.is_whitespace() => i += 1,
                '(' => {
                    let idx = open_node(&mut nodes, &stack, i)?;
                    stack.push(idx);
                    need_node = true;
                    i += 1;
                }
                ',' => {
                    if need_node || stack.is_empty() {
                        return Err(parse_error(i, "empty node or stray ','"));
                    }
                    need_node = true;
                    i += 1;
                }
                ')' => {
                    if need_node {
                        return Err(parse_error(i, "empty node before ')'"));
                    }
                    let closed = stack
                        .pop()
                        .ok_or_else(|| parse_error(i, "unbalanced ')'"))?;
                    i += 1;
                    let (label, length, consumed) = parse_label_length(&chars[i..], i)?;
                    nodes[closed].label = label;
                    nodes[closed].branch_length = length;
                    i += consumed;
                }
                ';' => {
                    if chars[i + 1..].iter().any(|c| !c.is_whitespace()) {
                        return Err(parse_error(i, "content after ';'"));
                    }
                    break;
                }
                _ => {
                    if !need_node && !nodes.is_empty() {
                        return Err(parse_error(i, "missing ',' between nodes"));
                    }
                    let (label, length, consumed) = parse_label_length(&chars[i..], i)?;
                    if label.is_empty() {
                        return Err(parse_error(i, "leaf without a label"));
                    }
                    let idx = open_node(&mut nodes, &stack, i)?;
                    nodes[idx].label = label;
                    nodes[idx].branch_length = length;
                    need_node = false;
                    i += consumed;
                }
            }
        }

        if !stack.is_empty() {
            return Err(EdaError::TreeParse("unbalanced '('".to_string()));
        }
        if nodes.is_empty() {
            return Err(EdaError::TreeParse("empty tree".to_string()));
        }

        let mut leaf_index = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            if node.is_leaf() && leaf_index.insert(node.label.clone(), idx).is_some() {
                return Err(EdaError::TreeParse(format!(
                    "duplicate leaf label '{}'",
                    node.label
                )));
            }
        }

        Ok(Self { nodes, leaf_index })
    }

    /// Read a Newick file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_newick(&content)
    }

    /// All nodes, in pre-order.
    #[inline]
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Index of the root node.
    #[inline]
    pub fn root(&self) -> usize {
        0
    }

    /// Get the index of a leaf by its label.
    pub fn leaf_idx(&self, label: &str) -> Option<usize> {
        self.leaf_index.get(label).copied()
    }

    /// Number of leaves.
    pub fn n_leaves(&self) -> usize {
        self.leaf_index.len()
    }

    /// Total branch length of the tree (the root's own length excluded).
    pub fn total_branch_length(&self) -> f64 {
        self.nodes.iter().skip(1).map(|n| n.branch_length).sum()
    }

    /// Path length from the root to every node.
    pub fn distances_to_root(&self) -> Vec<f64> {
        let mut dist = vec![0.0; self.nodes.len()];
        for i in 1..self.nodes.len() {
            if let Some(parent) = self.nodes[i].parent {
                dist[i] = dist[parent] + self.nodes[i].branch_length;
            }
        }
        dist
    }
}

fn open_node(nodes: &mut Vec<TreeNode>, stack: &[usize], pos: usize) -> Result<usize> {
    let parent = stack.last().copied();
    if parent.is_none() && !nodes.is_empty() {
        return Err(parse_error(pos, "more than one root"));
    }
    let idx = nodes.len();
    nodes.push(TreeNode {
        parent,
        branch_length: 0.0,
        label: String::new(),
        children: Vec::new(),
    });
    if let Some(p) = parent {
        nodes[p].children.push(idx);
    }
    Ok(idx)
}

/// Parse `label[:length]` at the start of `chars`; returns the label, the
/// branch length (0 when absent) and the number of characters consumed.
fn parse_label_length(chars: &[char], offset: usize) -> Result<(String, f64, usize)> {
    let mut label = String::new();
    let mut i = 0;

    if chars.first() == Some(&'\'') {
        i = 1;
        loop {
            match chars.get(i) {
                None => return Err(parse_error(offset, "unterminated quoted label")),
                Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                    label.push('\'');
                    i += 2;
                }
                Some('\'') => {
                    i += 1;
                    break;
                }
                Some(&c) => {
                    label.push(c);
                    i += 1;
                }
            }
        }
    } else {
        while let Some(&c) = chars.get(i) {
            if matches!(c, '(' | ')' | ',' | ':' | ';') {
                break;
            }
            label.push(c);
            i += 1;
        }
        label = label.trim().to_string();
    }

    let mut length = 0.0;
    if chars.get(i) == Some(&':') {
        i += 1;
        let start = i;
        while let Some(&c) = chars.get(i) {
            if matches!(c, '(' | ')' | ',' | ';') {
                break;
            }
            i += 1;
        }
        let raw: String = chars[start..i].iter().collect();
        length = raw.trim().parse::<f64>().map_err(|_| {
            parse_error(offset + start, &format!("invalid branch length '{}'", raw.trim()))
        })?;
        if !length.is_finite() || length < 0.0 {
            return Err(parse_error(
                offset + start,
                &format!("negative or non-finite branch length {}", length),
            ));
        }
    }

    Ok((label, length, i))
}

fn parse_error(pos: usize, msg: &str) -> EdaError {
    EdaError::TreeParse(format!("{} at position {}", msg, pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_simple_tree() {
        let tree = PhyloTree::from_newick("((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);").unwrap();

        assert_eq!(tree.n_leaves(), 4);
        assert_eq!(tree.nodes().len(), 7);
        assert_relative_eq!(tree.total_branch_length(), 2.1, epsilon = 1e-12);
        let a = tree.leaf_idx("A").unwrap();
        assert_relative_eq!(tree.distances_to_root()[a], 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_parents_precede_children() {
        let tree = PhyloTree::from_newick("(A:1,(B:1,(C:1,D:1)x:1)y:1)root;").unwrap();
        for (idx, node) in tree.nodes().iter().enumerate() {
            for &child in &node.children {
                assert!(child > idx);
                assert_eq!(tree.nodes()[child].parent, Some(idx));
            }
        }
        assert_eq!(tree.nodes()[tree.root()].label, "root");
    }

    #[test]
    fn test_internal_labels_and_quotes() {
        let tree = PhyloTree::from_newick("('ASV 1':0.5,(B:1,C:1)0.95:0.2);").unwrap();
        assert!(tree.leaf_idx("ASV 1").is_some());
        assert_eq!(tree.n_leaves(), 3);
    }

    #[test]
    fn test_parse_errors() {
        let bad = [
            "((A:0.1,B:0.2);",
            "(A:0.1,B:0.2));",
            "(A:0.1,,B:0.2);",
            "(A:abc,B:0.2);",
            "(A:-1,B:0.2);",
            "(A:1,A:2);",
            "(A,B);(C,D);",
            "",
        ];
        for newick in bad {
            assert!(
                matches!(PhyloTree::from_newick(newick), Err(EdaError::TreeParse(_))),
                "expected parse error for {:?}",
                newick
            );
        }
    }
}
