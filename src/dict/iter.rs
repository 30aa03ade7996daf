use std::vec;

use crate::value::Value;

use super::NestedDict;

/// Depth-first, pre-order traversal over the leaves of a [`NestedDict`].
///
/// Each level is snapshotted when the traversal enters it. Keys are the
/// dotted paths of the leaves.
pub struct AllItems {
    separator: String,
    stack: Vec<(Option<String>, vec::IntoIter<(String, Value)>)>,
}

impl AllItems {
    pub(crate) fn new(root: &NestedDict) -> Self {
        Self {
            separator: root.separator(),
            stack: vec![(None, root.items().into_iter())],
        }
    }
}

impl Iterator for AllItems {
    type Item = (String, Value);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (prefix, level) = self.stack.last_mut()?;
            match level.next() {
                None => {
                    self.stack.pop();
                }
                Some((key, value)) => {
                    let path = match prefix {
                        Some(prefix) => format!("{prefix}{}{key}", self.separator),
                        None => key,
                    };
                    match value.nested() {
                        Some(child) => self.stack.push((Some(path), child.items().into_iter())),
                        None => return Some((path, value)),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_order_by_insertion() {
        let dict = NestedDict::new();
        dict.set("a.b", 1).unwrap();
        dict.set("c", 2).unwrap();
        dict.set("a.d.e", 3).unwrap();

        let keys: Vec<String> = dict.all_keys().collect();
        assert_eq!(keys, vec!["a.b", "a.d.e", "c"]);
        let values: Vec<Value> = dict.all_values().collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(3), Value::Int(2)]);
    }

    #[test]
    fn test_each_call_is_fresh() {
        let dict = NestedDict::new();
        dict.set("x.y", 1).unwrap();
        assert_eq!(dict.all_items().count(), 1);
        assert_eq!(dict.all_items().count(), 1);
    }

    #[test]
    fn test_empty_children_yield_nothing() {
        let dict = NestedDict::new();
        dict.set("empty", NestedDict::new()).unwrap();
        assert_eq!(dict.all_items().count(), 0);
    }
}
