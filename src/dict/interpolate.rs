//! `${path.to.field}` references between the leaves of a tree.
//!
//! A reference starting with the separator (`${.sibling}`) is relative to the
//! parent of the leaf holding it. Use `$$` to escape a literal `$`.

use std::collections::HashSet;
use std::iter::Peekable;
use std::str::Chars;

use indexmap::IndexMap;
use tracing::debug;

use super::NestedDict;
use crate::error::{Error, Result};
use crate::value::Value;
use crate::variable::Variable;

/// Returns the references in `text`: outermost first, then the references
/// nested inside them. Text with an unclosed reference yields nothing.
pub fn find_placeholders(text: &str) -> Vec<String> {
    collect_placeholders(text).unwrap_or_default()
}

fn collect_placeholders(text: &str) -> Result<Vec<String>> {
    let mut found = top_level_references(text)?;
    let mut index = 0;
    while index < found.len() {
        let nested = top_level_references(&found[index])?;
        found.extend(nested);
        index += 1;
    }
    Ok(found)
}

fn top_level_references(text: &str) -> Result<Vec<String>> {
    let mut references = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
            }
            Some('{') => {
                chars.next();
                let body = consume_reference(&mut chars)
                    .ok_or_else(|| Error::UnclosedReference(text.to_string()))?;
                references.push(body);
            }
            _ => {}
        }
    }
    Ok(references)
}

/// Consumes a reference body up to its matching `}`, keeping nested
/// references intact.
fn consume_reference(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut body = String::new();
    let mut depth = 0usize;
    while let Some(ch) = chars.next() {
        match ch {
            '$' if chars.peek() == Some(&'$') => {
                chars.next();
                body.push_str("$$");
            }
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                depth += 1;
                body.push_str("${");
            }
            '}' if depth == 0 => return Some(body),
            '}' => {
                depth -= 1;
                body.push('}');
            }
            ch => body.push(ch),
        }
    }
    None
}

/// Body of `text` when the whole string is a single reference.
fn whole_reference(text: &str) -> Option<String> {
    let mut chars = text.strip_prefix("${")?.chars().peekable();
    let body = consume_reference(&mut chars)?;
    chars.next().is_none().then_some(body)
}

/// Finds a cycle in a dependency graph, returned as the path that closes it
/// (`["a", "b", "a"]`).
pub fn find_circular_reference(graph: &IndexMap<String, Vec<String>>) -> Option<Vec<String>> {
    fn visit(
        node: &str,
        graph: &IndexMap<String, Vec<String>>,
        path: &mut Vec<String>,
        finished: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        if let Some(start) = path.iter().position(|n| n == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if finished.contains(node) {
            return None;
        }
        path.push(node.to_string());
        for next in graph.get(node).into_iter().flatten() {
            if let Some(cycle) = visit(next, graph, path, finished) {
                return Some(cycle);
            }
        }
        path.pop();
        finished.insert(node.to_string());
        None
    }

    let mut finished = HashSet::new();
    graph
        .keys()
        .find_map(|node| visit(node, graph, &mut Vec::new(), &mut finished))
}

fn absolute(key: &str, name: &str, separator: &str) -> String {
    match name.strip_prefix(separator) {
        Some(relative) => match key.rsplit_once(separator) {
            Some((parent, _)) => format!("{parent}{separator}{relative}"),
            None => relative.to_string(),
        },
        None => name.to_string(),
    }
}

fn placeholders_in(value: &Value) -> Result<Vec<String>> {
    let texts: Vec<String> = match value {
        Value::Str(text) => vec![text.clone()],
        Value::Var(cell) => cell.get().as_string().into_iter().collect(),
        Value::List(list) => list.iter().filter_map(|item| item.as_string()).collect(),
        Value::Flat(map) => map.values().iter().filter_map(Value::as_string).collect(),
        _ => Vec::new(),
    };
    let mut names = Vec::new();
    for text in &texts {
        names.extend(collect_placeholders(text)?);
    }
    Ok(names)
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
    )
}

impl NestedDict {
    /// Resolves references, aliasing whole-string references to the
    /// referenced cell.
    pub fn interpolate(&self) -> Result<&Self> {
        self.interpolate_with(true)
    }

    /// Resolves every `${...}` reference in the tree.
    ///
    /// A leaf that is exactly one reference takes the referenced value
    /// itself. With `use_variable`, a referenced scalar is first wrapped in a
    /// [`Variable`], so both locations share one cell. References embedded
    /// in longer text are substituted textually. Cycles and missing
    /// references are reported before anything is modified.
    pub fn interpolate_with(&self, use_variable: bool) -> Result<&Self> {
        let separator = self.separator();
        let mut pending: IndexMap<String, Vec<String>> = IndexMap::new();
        for (key, value) in self.all_items() {
            let names = placeholders_in(&value)?;
            if names.is_empty() {
                continue;
            }
            let names = names
                .iter()
                .map(|name| absolute(&key, name, &separator))
                .collect();
            pending.insert(key, names);
        }
        if pending.is_empty() {
            return Ok(self);
        }
        debug!(keys = pending.len(), use_variable, "interpolating references");

        for (key, names) in &pending {
            if names.contains(key) {
                return Err(Error::CircularReference(vec![key.clone(), key.clone()]));
            }
        }
        let graph: IndexMap<String, Vec<String>> = pending
            .iter()
            .map(|(key, names)| {
                let concrete = names.iter().filter(|name| !name.contains("${")).cloned().collect();
                (key.clone(), concrete)
            })
            .collect();
        if let Some(cycle) = find_circular_reference(&graph) {
            return Err(Error::CircularReference(cycle));
        }
        if let Some(missing) = graph.values().flatten().find(|name| !self.contains(name)) {
            return Err(Error::ReferenceNotFound(missing.clone()));
        }

        // Names built from other references are only known while resolving.
        let rehearsal = self.deep_copy();
        Resolver::new(&rehearsal, &separator, pending.clone(), use_variable).run()?;
        Resolver::new(self, &separator, pending, use_variable).run()?;
        Ok(self)
    }
}

struct Resolver<'a> {
    dict: &'a NestedDict,
    separator: String,
    pending: IndexMap<String, Vec<String>>,
    use_variable: bool,
    done: HashSet<String>,
    stack: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(
        dict: &'a NestedDict,
        separator: &str,
        pending: IndexMap<String, Vec<String>>,
        use_variable: bool,
    ) -> Self {
        Self {
            dict,
            separator: separator.to_string(),
            pending,
            use_variable,
            done: HashSet::new(),
            stack: Vec::new(),
        }
    }

    fn run(mut self) -> Result<()> {
        let keys: Vec<String> = self.pending.keys().cloned().collect();
        for key in keys {
            self.resolve_key(&key)?;
        }
        Ok(())
    }

    fn resolve_key(&mut self, key: &str) -> Result<()> {
        if self.done.contains(key) {
            return Ok(());
        }
        if let Some(start) = self.stack.iter().position(|k| k == key) {
            let mut cycle = self.stack[start..].to_vec();
            cycle.push(key.to_string());
            return Err(Error::CircularReference(cycle));
        }
        self.stack.push(key.to_string());
        let value = self.dict.get(key)?;
        let resolved = self.resolve_value(key, value)?;
        self.dict.set_with(key, resolved, Some(false))?;
        self.stack.pop();
        self.done.insert(key.to_string());
        Ok(())
    }

    /// Resolves every key at or below `name` before it is read.
    fn ensure(&mut self, name: &str) -> Result<()> {
        let prefix = format!("{name}{}", self.separator);
        let keys: Vec<String> = self
            .pending
            .keys()
            .filter(|key| key.as_str() == name || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in keys {
            self.resolve_key(&key)?;
        }
        Ok(())
    }

    fn resolve_value(&mut self, key: &str, value: Value) -> Result<Value> {
        match value {
            Value::Str(text) => self.expand(key, &text),
            Value::Var(cell) => {
                if let Value::Str(text) = cell.get() {
                    let resolved = self.expand(key, &text)?;
                    cell.set(resolved)?;
                }
                Ok(Value::Var(cell))
            }
            Value::List(list) => {
                for (index, item) in list.to_vec().into_iter().enumerate() {
                    if let Value::Str(text) = item {
                        let resolved = self.expand(key, &text)?;
                        list.set(index, resolved)?;
                    }
                }
                Ok(Value::List(list))
            }
            Value::Flat(map) => {
                for (name, item) in map.items() {
                    if let Value::Str(text) = item {
                        let resolved = self.expand(key, &text)?;
                        map.store(name, resolved);
                    }
                }
                Ok(Value::Flat(map))
            }
            other => Ok(other),
        }
    }

    fn expand(&mut self, key: &str, text: &str) -> Result<Value> {
        if let Some(body) = whole_reference(text) {
            let name = self.render(key, &body)?;
            let name = absolute(key, &name, &self.separator);
            return self.lookup(&name, true);
        }
        Ok(Value::Str(self.render(key, text)?))
    }

    /// Substitutes references textually, innermost first.
    fn render(&mut self, key: &str, text: &str) -> Result<String> {
        let mut result = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch != '$' {
                result.push(ch);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    let body = consume_reference(&mut chars)
                        .ok_or_else(|| Error::UnclosedReference(text.to_string()))?;
                    let name = self.render(key, &body)?;
                    let name = absolute(key, &name, &self.separator);
                    let value = self.lookup(&name, false)?;
                    let scalar = value
                        .scalar_text()
                        .ok_or_else(|| Error::NonScalarReference(name.clone()))?;
                    result.push_str(&scalar);
                }
                _ => result.push('$'),
            }
        }

        Ok(result)
    }

    fn lookup(&mut self, name: &str, whole: bool) -> Result<Value> {
        self.ensure(name)?;
        let value = self
            .dict
            .get_opt(name)
            .ok_or_else(|| Error::ReferenceNotFound(name.to_string()))?;
        let share = whole && self.use_variable && !self.pending.contains_key(name) && is_scalar(&value);
        if !share {
            return Ok(value);
        }
        let cell = Variable::new(value);
        self.dict.set_with(name, cell.clone(), Some(false))?;
        Ok(Value::Var(cell))
    }
}
