//! Property-based tests for statement segmentation
//!
//! Invariants covered:
//! - N terminated statements in, N statements out, in file order
//! - Blank lines and full-line comments never reach a statement
//! - A delimited block is one statement whatever semicolons it contains
//! - An unterminated tail is never emitted

use proptest::prelude::*;

use pgrun::segmenter::{Segmenter, Statement, Statements};

// ============================================================================
// Generators
// ============================================================================

/// One SQL-ish line with no semicolon and no leading `--`.
fn arb_body_line() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_ (),'=*]{0,30}".prop_map(|line| line.trim().to_string())
}

fn arb_filler() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("   ".to_string()),
        Just("\t".to_string()),
        "-- [a-z ;]{0,20}".prop_map(String::from),
        "  --[A-Za-z;]{0,10}".prop_map(String::from),
    ]
}

/// A statement as the lines that should survive plus the lines as written.
fn arb_statement() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
    (
        prop::collection::vec((arb_body_line(), arb_filler(), "[ \t]{0,3}"), 1..5),
        prop_oneof![Just(""), Just("  "), Just(" -- done"), Just("--x;")],
    )
        .prop_map(|(parts, trailer)| {
            let mut kept = Vec::new();
            let mut written = Vec::new();
            let last = parts.len() - 1;
            for (idx, (body, filler, indent)) in parts.into_iter().enumerate() {
                let mut line = body;
                if idx == last {
                    line.push(';');
                    line.push_str(trailer);
                }
                written.push(format!("{indent}{line}"));
                kept.push(line.trim().to_string());
                if idx != last {
                    written.push(filler);
                }
            }
            (kept, written)
        })
}

fn segment(lines: &[String]) -> Vec<String> {
    let mut segmenter = Segmenter::new();
    lines
        .iter()
        .filter_map(|line| segmenter.push_line(line))
        .map(Statement::into_sql)
        .collect()
}

fn joined(lines: &[String]) -> String {
    lines.iter().map(|line| format!("{line}\n")).collect()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_terminated_statements_are_emitted_in_order(
        statements in prop::collection::vec(arb_statement(), 0..8),
        separators in prop::collection::vec(arb_filler(), 8),
    ) {
        let mut input = Vec::new();
        for (idx, (_, written)) in statements.iter().enumerate() {
            input.push(separators[idx].clone());
            input.extend(written.iter().cloned());
        }

        let emitted = segment(&input);
        let expected: Vec<String> = statements.iter().map(|(kept, _)| joined(kept)).collect();
        prop_assert_eq!(emitted, expected);
    }

    #[test]
    fn prop_no_blank_or_comment_line_in_output(
        statements in prop::collection::vec(arb_statement(), 1..6),
    ) {
        let input: Vec<String> = statements.into_iter().flat_map(|(_, written)| written).collect();
        for statement in segment(&input) {
            prop_assert!(!statement.is_empty());
            for line in statement.lines() {
                prop_assert!(!line.trim().is_empty());
                prop_assert!(!line.starts_with("--"));
            }
        }
    }

    #[test]
    fn prop_block_is_single_statement(
        body in prop::collection::vec((arb_body_line(), any::<bool>()), 1..10),
    ) {
        let mut input = vec!["-- STATEMENT-BEGIN".to_string()];
        let mut kept = Vec::new();
        for (line, terminated) in body {
            let line = if terminated { format!("{line};") } else { line };
            kept.push(line.clone());
            input.push(line);
        }
        input.push("-- STATEMENT-END".to_string());

        prop_assert_eq!(segment(&input), vec![joined(&kept)]);
    }

    #[test]
    fn prop_unterminated_tail_is_dropped(
        statements in prop::collection::vec(arb_statement(), 0..5),
        tail in prop::collection::vec(arb_body_line(), 1..4),
    ) {
        let mut input: Vec<String> = statements
            .iter()
            .flat_map(|(_, written)| written.iter().cloned())
            .collect();
        input.extend(tail);

        let text = input.join("\n");
        let emitted: Vec<Statement> = Statements::new(text.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        prop_assert_eq!(emitted.len(), statements.len());
    }
}
