//! Relation extraction from SQL AST
//!
//! Walks a statement and collects the relations it reads from. CTE names
//! and table functions such as `read_parquet('x')` are not relations.

use sqlparser::ast::{ObjectName, Query, Statement, TableFactor, Visit, Visitor};
use std::collections::BTreeSet;
use std::ops::ControlFlow;

#[derive(Default)]
struct RelationCollector {
    relations: BTreeSet<String>,
    cte_names: BTreeSet<String>,
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.clone());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        if let TableFactor::Table {
            name, args: None, ..
        } = factor
        {
            self.relations.insert(object_name_to_string(name));
        }
        ControlFlow::Continue(())
    }
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0
        .iter()
        .filter_map(|part| part.as_ident())
        .map(|ident| ident.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

/// Relations read by `statements`, as dotted names, sorted.
pub fn extract_references(statements: &[Statement]) -> BTreeSet<String> {
    let mut collector = RelationCollector::default();
    for stmt in statements {
        let _ = stmt.visit(&mut collector);
    }

    let RelationCollector {
        relations,
        cte_names,
    } = collector;
    relations
        .into_iter()
        .filter(|r| !r.is_empty() && !cte_names.contains(r))
        .collect()
}

/// Reduce `schema.table` to `table`, the form entries are named by
pub fn normalize_table_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[cfg(test)]
#[path = "extractor_test.rs"]
mod tests;
