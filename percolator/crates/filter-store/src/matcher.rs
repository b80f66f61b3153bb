//! Document → matched filter ids for one namespace.

use core_types::FilterId;
use filter_dsl::{FlatDocument, Keyword};

use crate::graph::{ConditionKey, Graph};
use crate::operands::OperandStores;
use crate::test_table::{Scratch, TestTable};

/// Walks the operand stores in [`Keyword::MATCH_ORDER`], skipping empty
/// ones, and folds every satisfied condition into `scratch`.
pub(crate) fn match_document(
    graph: &Graph,
    operands: &OperandStores,
    table: &TestTable,
    scratch: &mut Scratch,
    doc: &FlatDocument<'_>,
) -> Vec<FilterId> {
    scratch.reset(table);
    for keyword in Keyword::MATCH_ORDER {
        let store = operands.get(keyword);
        if store.is_empty() {
            continue;
        }
        store.collect_matches(doc, &mut |condition| add_match(graph, table, scratch, condition));
    }
    scratch.matched().to_vec()
}

/// One condition satisfied: count it for each subfilter referencing it, and
/// report the owners of every subfilter that just became complete.
fn add_match(graph: &Graph, table: &TestTable, scratch: &mut Scratch, condition: ConditionKey) {
    let Some(record) = graph.conditions.get(condition) else {
        return;
    };
    for &sk in &record.subfilters {
        let Some(subfilter) = graph.subfilters.get(sk) else {
            continue;
        };
        if !scratch.satisfy(subfilter.slot) {
            continue;
        }
        for &fk in &subfilter.filters {
            if let Some(filter) = graph.filters.get(fk) {
                scratch.mark_filter(table, filter.slot);
            }
        }
    }
}
