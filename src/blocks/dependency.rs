// src/blocks/dependency.rs
// Graph of derived columns and the columns they read.

use std::collections::{BTreeMap, BTreeSet};

use super::column_definition::Column;
use super::database::error::{EngineError, EngineResult};
use super::formula::FormulaEvaluator;

/// Maps each derived column id to the column ids its expression reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyTracker {
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans every derived column of a schema. Fails on references to unknown
    /// columns, formulas without an expression, and cycles.
    pub fn build(columns: &[Column], evaluator: &dyn FormulaEvaluator) -> EngineResult<Self> {
        let mut tracker = DependencyTracker::new();
        for column in columns.iter().filter(|c| c.is_derived()) {
            let expression = match column.formula_expression.as_deref() {
                Some(expr) if !expr.trim().is_empty() => expr,
                _ => {
                    if column.column_type == super::column_type::ColumnType::Formula {
                        return Err(EngineError::InvalidSchema(format!(
                            "formula column '{}' has no expression",
                            column.column_id
                        )));
                    }
                    // Rollup / lookup without an expression have nothing to read.
                    tracker.set_dependencies(&column.column_id, Vec::<String>::new());
                    continue;
                }
            };
            let references = evaluator.references(expression).map_err(|e| {
                EngineError::InvalidSchema(format!(
                    "formula for '{}' is invalid: {}",
                    column.column_id, e
                ))
            })?;
            let mut sources = Vec::with_capacity(references.len());
            for reference in references {
                let source = columns
                    .iter()
                    .find(|c| c.column_id == reference)
                    .or_else(|| columns.iter().find(|c| c.name == reference))
                    .ok_or_else(|| {
                        EngineError::InvalidSchema(format!(
                            "formula for '{}' references unknown column '{}'",
                            column.column_id, reference
                        ))
                    })?;
                sources.push(source.column_id.clone());
            }
            tracker.set_dependencies(&column.column_id, sources);
        }
        if let Some(cycle) = tracker.find_cycle() {
            return Err(EngineError::DependencyCycle(cycle));
        }
        Ok(tracker)
    }

    pub fn set_dependencies<I, S>(&mut self, formula_column_id: &str, sources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.insert(
            formula_column_id.to_string(),
            sources.into_iter().map(Into::into).collect(),
        );
    }

    pub fn derived_columns(&self) -> impl Iterator<Item = &String> {
        self.dependencies.keys()
    }

    /// Derived columns that read a column, directly.
    pub fn dependents_of(&self, column_id: &str) -> BTreeSet<String> {
        self.dependencies
            .iter()
            .filter(|(_, sources)| sources.contains(column_id))
            .map(|(formula, _)| formula.clone())
            .collect()
    }

    /// Exactly the derived columns whose declared sources intersect `changed`.
    pub fn affected_by<'a, I>(&self, changed: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let changed: BTreeSet<&str> = changed.into_iter().collect();
        self.dependencies
            .iter()
            .filter(|(_, sources)| sources.iter().any(|s| changed.contains(s.as_str())))
            .map(|(formula, _)| formula.clone())
            .collect()
    }

    /// Transitive closure of `affected_by`, ordered so inputs come before readers.
    pub fn recompute_order<'a, I>(&self, changed: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut closure = BTreeSet::new();
        let mut frontier: Vec<String> = self.affected_by(changed).into_iter().collect();
        while let Some(column) = frontier.pop() {
            if closure.insert(column.clone()) {
                frontier.extend(self.dependents_of(&column));
            }
        }
        self.topological(&closure)
    }

    /// Every derived column in evaluation order.
    pub fn full_order(&self) -> Vec<String> {
        let all: BTreeSet<String> = self.dependencies.keys().cloned().collect();
        self.topological(&all)
    }

    // Kahn's algorithm over the subgraph induced by `subset`; ties break by id.
    fn topological(&self, subset: &BTreeSet<String>) -> Vec<String> {
        let mut pending: BTreeMap<&str, usize> = subset
            .iter()
            .map(|column| {
                let inputs = self
                    .dependencies
                    .get(column)
                    .map(|sources| sources.iter().filter(|s| subset.contains(*s)).count())
                    .unwrap_or(0);
                (column.as_str(), inputs)
            })
            .collect();

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(column, _)| *column)
            .collect();
        let mut order = Vec::with_capacity(subset.len());

        while let Some(column) = ready.iter().next().copied() {
            ready.remove(column);
            pending.remove(column);
            order.push(column.to_string());
            for (reader, sources) in &self.dependencies {
                if !sources.contains(column) {
                    continue;
                }
                if let Some(count) = pending.get_mut(reader.as_str()) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(reader.as_str());
                    }
                }
            }
        }
        order
    }

    /// First cycle found, as a path that starts and ends on the same column.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            tracker: &DependencyTracker,
            column: &str,
            marks: &mut BTreeMap<String, Mark>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            match marks.get(column) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|c| c == column).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(column.to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(column.to_string(), Mark::Visiting);
            path.push(column.to_string());
            if let Some(sources) = tracker.dependencies.get(column) {
                for source in sources {
                    // Plain columns have no outgoing edges.
                    if !tracker.dependencies.contains_key(source) {
                        continue;
                    }
                    if let Some(cycle) = visit(tracker, source, marks, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            marks.insert(column.to_string(), Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        for column in self.dependencies.keys() {
            let mut path = Vec::new();
            if let Some(cycle) = visit(self, column, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::column_type::ColumnType;
    use crate::blocks::formula::ArithmeticEvaluator;

    fn ids(set: BTreeSet<String>) -> Vec<String> {
        set.into_iter().collect()
    }

    #[test]
    fn affected_by_is_exact_and_direct() {
        let mut tracker = DependencyTracker::new();
        tracker.set_dependencies("Total", ["Quantity", "Price"]);
        tracker.set_dependencies("Tax", ["Total"]);
        tracker.set_dependencies("Label", ["Name"]);

        assert_eq!(ids(tracker.affected_by(["Quantity"])), vec!["Total"]);
        assert_eq!(ids(tracker.affected_by(["Total", "Name"])), vec!["Label", "Tax"]);
        assert!(tracker.affected_by(["Unrelated"]).is_empty());
        assert!(tracker.affected_by(std::iter::empty()).is_empty());
    }

    #[test]
    fn recompute_order_is_transitive_and_topological() {
        let mut tracker = DependencyTracker::new();
        tracker.set_dependencies("A", ["Tax"]);
        tracker.set_dependencies("Tax", ["Total"]);
        tracker.set_dependencies("Total", ["Quantity"]);
        tracker.set_dependencies("Other", ["Name"]);

        assert_eq!(tracker.recompute_order(["Quantity"]), vec!["Total", "Tax", "A"]);
        assert_eq!(tracker.full_order(), vec!["Other", "Total", "Tax", "A"]);
    }

    #[test]
    fn build_resolves_names_and_rejects_unknown_references() {
        let columns = vec![
            Column::new("qty", ColumnType::Number).named("Quantity"),
            Column::new("Price", ColumnType::Currency),
            Column::formula("Total", "Quantity*Price"),
        ];
        let tracker = DependencyTracker::build(&columns, &ArithmeticEvaluator).unwrap();
        assert_eq!(ids(tracker.affected_by(["qty"])), vec!["Total"]);
        assert_eq!(ids(tracker.affected_by(["Price"])), vec!["Total"]);
        assert!(tracker.affected_by(["Quantity"]).is_empty());

        let broken = vec![Column::formula("Total", "Missing*2")];
        assert!(matches!(
            DependencyTracker::build(&broken, &ArithmeticEvaluator),
            Err(EngineError::InvalidSchema(_))
        ));
        let empty = vec![Column::new("Total", ColumnType::Formula)];
        assert!(matches!(
            DependencyTracker::build(&empty, &ArithmeticEvaluator),
            Err(EngineError::InvalidSchema(_))
        ));
    }

    #[test]
    fn build_rejects_cycles() {
        let columns = vec![
            Column::new("Base", ColumnType::Number),
            Column::formula("A", "B + Base"),
            Column::formula("B", "A * 2"),
        ];
        match DependencyTracker::build(&columns, &ArithmeticEvaluator) {
            Err(EngineError::DependencyCycle(path)) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"A".to_string()));
                assert!(path.contains(&"B".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }

        let self_ref = vec![Column::formula("A", "A + 1")];
        assert!(matches!(
            DependencyTracker::build(&self_ref, &ArithmeticEvaluator),
            Err(EngineError::DependencyCycle(_))
        ));
    }
}
