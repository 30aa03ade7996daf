//! Flat and nested containers.

mod attrs;
mod flat;
mod interpolate;
mod iter;
mod nested;

pub use attrs::DefaultFactory;
pub use flat::FlatDict;
pub use interpolate::{find_circular_reference, find_placeholders};
pub use iter::AllItems;
pub use nested::{NestedDict, Unlocked};

use crate::error::Result;
use crate::value::Value;

/// Merges the mapping held by `source` into the mapping held by `target`,
/// using nested semantics when the target is a nested container.
pub(crate) fn merge_value(target: &Value, source: &Value, overwrite: bool) -> Result<()> {
    let Some(incoming) = source.as_storage() else {
        return Ok(());
    };
    if let Some(nested) = target.as_nested() {
        nested.merge_with(&incoming, overwrite)?;
    } else if let Some(flat) = target.as_storage() {
        flat.merge_with(&incoming, overwrite)?;
    }
    Ok(())
}
