// ABOUTME: SQL text processing shared by every engine
// ABOUTME: Exports the statement tokenizer and the dialect rewriter

pub mod rewrite;
pub mod tokenizer;

pub use rewrite::{rewrite, rules_for, RewriteRule, RULES, RULESET_VERSION};
pub use tokenizer::{split_statements, statements, Statements};
