//! Split groups: recombining the gradients of sibling pieces.

use tracing::debug;

use super::arena::StateKey;
use super::backward::Executor;
use crate::error::GraphError;
use crate::operations::{concat, embed};
use crate::scalar::Scalar;
use crate::tensor::{Tensor, accumulate};

impl<T: Scalar> Executor<'_, T> {
    /// Record a sibling's seed gradient in its split group.
    ///
    /// A sibling's first contribution fills its slot and counts once towards
    /// the fan-out; once every sibling has reported, the slots are
    /// concatenated and deposited into the split node. Anything arriving
    /// after the combine fired is embedded at the sibling's offset and
    /// deposited directly; anything before it grows the slot.
    pub(super) fn split_contribute(&mut self, key: StateKey, grad: &Tensor<T>, first: bool) -> Result<(), GraphError> {
        let Some(member) = self.arena.split_for(key) else {
            return Ok(());
        };
        self.groups.insert(member.group);
        let group = self.arena.group_mut(member.group);
        let origin = StateKey {
            node: group.origin,
            engine: group.engine,
        };
        let position = group.position;

        if first && !group.fired {
            let reported = group.slots[member.index].is_some();
            accumulate(&mut group.slots[member.index], grad)?;
            if !reported {
                group.counter += 1;
            }
            if group.counter < group.fan_out() {
                return Ok(());
            }
            group.fired = true;
            let pieces: Vec<Tensor<T>> = group
                .slots
                .iter()
                .map(|slot| slot.clone().unwrap_or_else(|| Tensor::zeros(&group.piece_shape)))
                .collect();
            let refs: Vec<&Tensor<T>> = pieces.iter().collect();
            let combined = concat(&refs, group.axis)?;
            debug!(origin = %origin.node, fan_out = group.fan_out(), "split group complete; combining");
            self.deposit(origin, position, combined)
        } else if group.fired {
            let embedded = embed(grad, &group.full_shape(), &group.offsets(member.index))?;
            self.deposit(origin, position, embedded)
        } else {
            accumulate(&mut group.slots[member.index], grad)?;
            Ok(())
        }
    }
}
