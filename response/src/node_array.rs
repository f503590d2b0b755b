//! Monotonic interpolation axes.
//!
//! A [`NodeArray`] holds strictly increasing node positions and turns a
//! query value into the two bracketing node indices plus linear weights.
//! Outside the node range the end interval is extrapolated, so weights can
//! be negative or exceed one there.

use crate::error::ResponseError;

/// Bracketing nodes and linear weights for one query value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeWeights {
    pub left: usize,
    pub right: usize,
    pub wgt_left: f64,
    pub wgt_right: f64,
}

/// Strictly increasing axis of node positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeArray {
    nodes: Vec<f64>,
}

impl NodeArray {
    /// Create an axis from strictly increasing, finite node positions.
    ///
    /// # Arguments
    /// * `nodes` - Node positions; an empty axis is allowed and interpolates to zero weights
    pub fn new(nodes: Vec<f64>) -> Result<Self, ResponseError> {
        if let Some(bad) = nodes.iter().position(|x| !x.is_finite()) {
            return Err(ResponseError::InvalidArgument(format!(
                "Node {bad} has non-finite value {}",
                nodes[bad]
            )));
        }
        if let Some(i) = nodes.windows(2).position(|w| w[1] <= w[0]) {
            return Err(ResponseError::InvalidArgument(format!(
                "Nodes must be strictly increasing, but node {} ({}) follows node {i} ({})",
                i + 1,
                nodes[i + 1],
                nodes[i]
            )));
        }
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    /// Bracketing nodes of `x` and their weights.
    ///
    /// A single node gets the full weight on both sides; an empty axis
    /// returns zero weights.
    pub fn interpolate(&self, x: f64) -> NodeWeights {
        let n = self.nodes.len();
        match n {
            0 => NodeWeights {
                left: 0,
                right: 0,
                wgt_left: 0.0,
                wgt_right: 0.0,
            },
            1 => NodeWeights {
                left: 0,
                right: 0,
                wgt_left: 1.0,
                wgt_right: 0.0,
            },
            _ => {
                // partition_point gives the first node > x
                let left = self
                    .nodes
                    .partition_point(|&node| node <= x)
                    .saturating_sub(1)
                    .min(n - 2);
                let right = left + 1;
                let wgt_right =
                    (x - self.nodes[left]) / (self.nodes[right] - self.nodes[left]);
                NodeWeights {
                    left,
                    right,
                    wgt_left: 1.0 - wgt_right,
                    wgt_right,
                }
            }
        }
    }

    /// Linearly interpolated value of `values` (one per node) at `x`.
    pub fn interpolate_values(&self, x: f64, values: &[f64]) -> Result<f64, ResponseError> {
        if values.len() != self.nodes.len() {
            return Err(ResponseError::SizeMismatch(format!(
                "{} values for {} nodes",
                values.len(),
                self.nodes.len()
            )));
        }
        if values.is_empty() {
            return Ok(0.0);
        }
        let w = self.interpolate(x);
        Ok(w.wgt_left * values[w.left] + w.wgt_right * values[w.right])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_unsorted_nodes() {
        assert!(NodeArray::new(vec![0.0, 1.0, 1.0]).is_err());
        assert!(NodeArray::new(vec![0.0, f64::NAN]).is_err());
        assert!(NodeArray::new(vec![]).is_ok());
    }

    #[test]
    fn test_interior_weights() {
        let axis = NodeArray::new(vec![0.0, 1.0, 3.0]).unwrap();
        let w = axis.interpolate(2.5);
        assert_eq!((w.left, w.right), (1, 2));
        assert_relative_eq!(w.wgt_left, 0.25);
        assert_relative_eq!(w.wgt_right, 0.75);

        let w = axis.interpolate(1.0);
        assert_eq!((w.left, w.right), (1, 2));
        assert_relative_eq!(w.wgt_left, 1.0);
    }

    #[test]
    fn test_extrapolation() {
        let axis = NodeArray::new(vec![0.0, 1.0, 2.0]).unwrap();
        let below = axis.interpolate(-1.0);
        assert_eq!((below.left, below.right), (0, 1));
        assert_relative_eq!(below.wgt_left, 2.0);
        assert_relative_eq!(below.wgt_right, -1.0);

        let above = axis.interpolate(3.0);
        assert_eq!((above.left, above.right), (1, 2));
        assert_relative_eq!(above.wgt_right, 2.0);
        assert_relative_eq!(
            axis.interpolate_values(3.0, &[0.0, 10.0, 20.0]).unwrap(),
            30.0
        );
    }

    #[test]
    fn test_degenerate_axes() {
        let single = NodeArray::new(vec![4.0]).unwrap();
        let w = single.interpolate(100.0);
        assert_eq!(w.wgt_left + w.wgt_right, 1.0);
        assert_eq!(single.interpolate_values(-3.0, &[7.0]).unwrap(), 7.0);

        let empty = NodeArray::default();
        assert_eq!(empty.interpolate(1.0).wgt_left, 0.0);
        assert!(empty.interpolate_values(1.0, &[1.0]).is_err());
    }
}
