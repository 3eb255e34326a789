//! Combine effect - sums multiple inputs together

use dasp_graph::Buffer;

use crate::node::Inputs;

/// Sums every input with equal weight.
///
/// Inputs with a different channel count are converted to this node's layout
/// first (see [`remap_add`](crate::remap_add)). The engine's output node is a
/// `Combine` carrying the selected speaker layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct Combine;

impl Combine {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn process(&mut self, inputs: &Inputs<'_>, outputs: &mut [Buffer]) {
        inputs.sum_into(outputs);
    }
}
