//! Session Filter: applies one inbound session's tag query against the
//! aggregated capability set, returning the visible subset.
//!
//! The `advanced` mode's boolean expression (AND/OR/NOT, parens, literal tag
//! leaves) is parsed with a `chumsky` parser-combinator grammar rather than
//! a hand-rolled recursive descent.

use std::collections::{BTreeSet, HashSet};

use chumsky::prelude::*;
use thiserror::Error;

use crate::capabilities::{AggregateCapabilities, Provided};
use crate::presets::PresetStore;
use crate::session::{SessionRecord, TagFilterMode};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid tag expression: {0}")]
    Parse(String),
    #[error("preset '{0}' not found")]
    PresetNotFound(String),
}

/// A parsed boolean expression over literal tag leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpr {
    Tag(String),
    Not(Box<TagExpr>),
    And(Box<TagExpr>, Box<TagExpr>),
    Or(Box<TagExpr>, Box<TagExpr>),
}

impl TagExpr {
    pub fn eval(&self, server_tags: &HashSet<String>) -> bool {
        match self {
            TagExpr::Tag(tag) => server_tags.contains(tag),
            TagExpr::Not(inner) => !inner.eval(server_tags),
            TagExpr::And(a, b) => a.eval(server_tags) && b.eval(server_tags),
            TagExpr::Or(a, b) => a.eval(server_tags) || b.eval(server_tags),
        }
    }
}

/// Parse an advanced tag query string into a [`TagExpr`].
///
/// Grammar: `expr := or_expr`, `or_expr := and_expr (OR and_expr)*`,
/// `and_expr := unary (AND unary)*`, `unary := NOT unary | atom`,
/// `atom := tag_literal | '(' expr ')'`.
pub fn parse_tag_expression(input: &str) -> Result<TagExpr, FilterError> {
    let parser = tag_expr_parser();
    parser
        .parse(input)
        .into_result()
        .map_err(|errs| FilterError::Parse(errs.into_iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")))
}

fn tag_expr_parser<'a>() -> impl Parser<'a, &'a str, TagExpr, extra::Err<Rich<'a, char>>> {
    let ident = any()
        .filter(|c: &char| c.is_alphanumeric() || *c == '_' || *c == '-' || *c == '.' || *c == ':')
        .repeated()
        .at_least(1)
        .collect::<String>()
        .padded();

    recursive(|expr| {
        let atom = choice((
            ident
                .clone()
                .filter(|s: &String| !matches!(s.as_str(), "AND" | "OR" | "NOT"))
                .map(TagExpr::Tag),
            expr.clone().delimited_by(just('(').padded(), just(')').padded()),
        ));

        let unary = recursive(|unary| {
            choice((
                just("NOT").padded().ignore_then(unary).map(|inner| TagExpr::Not(Box::new(inner))),
                atom.clone(),
            ))
        });

        let and_expr = unary
            .clone()
            .foldl(just("AND").padded().ignore_then(unary).repeated(), |a, b| {
                TagExpr::And(Box::new(a), Box::new(b))
            });

        and_expr
            .clone()
            .foldl(just("OR").padded().ignore_then(and_expr).repeated(), |a, b| {
                TagExpr::Or(Box::new(a), Box::new(b))
            })
    })
    .padded()
}

/// The resolved query a session filters by, independent of how it was
/// expressed (`tags` list, JSON-parsed expression, or a preset lookup).
pub enum ResolvedQuery {
    Or(Vec<String>),
    And(Vec<String>),
    Expr(TagExpr),
}

impl ResolvedQuery {
    fn matches(&self, server_tags: &HashSet<String>) -> bool {
        match self {
            ResolvedQuery::Or(tags) => tags.iter().any(|t| server_tags.contains(t)),
            ResolvedQuery::And(tags) => tags.iter().all(|t| server_tags.contains(t)),
            ResolvedQuery::Expr(expr) => expr.eval(server_tags),
        }
    }
}

/// Resolve a session's filter mode into a [`ResolvedQuery`], looking up
/// presets live: edits to a preset must be visible immediately, so this is
/// never cached on the session.
pub fn resolve_query(session: &SessionRecord, presets: &PresetStore) -> Result<ResolvedQuery, FilterError> {
    match session.tag_filter_mode {
        TagFilterMode::SimpleOr => Ok(ResolvedQuery::Or(session.tags.clone().unwrap_or_default())),
        TagFilterMode::SimpleAnd => Ok(ResolvedQuery::And(session.tags.clone().unwrap_or_default())),
        TagFilterMode::Advanced => {
            // `tagExpression` is the primary form; `tagQuery` is an
            // alternate JSON-serialized expression accepted for sessions
            // that only set the query field.
            let raw = session
                .tag_expression_json
                .as_deref()
                .or(session.tag_query_json.as_deref())
                .ok_or_else(|| FilterError::Parse("advanced mode requires tagExpression or tagQuery".to_string()))?;
            let query: String = serde_json::from_str(raw).unwrap_or_else(|_| raw.to_string());
            Ok(ResolvedQuery::Expr(parse_tag_expression(&query)?))
        }
        TagFilterMode::Preset => {
            let name = session
                .preset_name
                .as_deref()
                .ok_or_else(|| FilterError::Parse("preset mode requires presetName".to_string()))?;
            let query = presets
                .get(name)
                .ok_or_else(|| FilterError::PresetNotFound(name.to_string()))?;
            Ok(ResolvedQuery::Expr(parse_tag_expression(&query)?))
        }
    }
}

/// The capability set visible to one session, after filtering.
#[derive(Debug, Clone, Default)]
pub struct FilteredCapabilities {
    pub tool_names: BTreeSet<String>,
    pub resource_names: BTreeSet<String>,
    pub prompt_names: BTreeSet<String>,
}

/// Apply a resolved query against the aggregate, given each server's tag
/// set. A capability item is visible iff its provider server is visible;
/// tools/resources/prompts are filtered independently but share the same
/// per-server visibility decision.
pub fn apply_filter(
    query: &ResolvedQuery,
    aggregate: &AggregateCapabilities,
    server_tags: &std::collections::BTreeMap<String, HashSet<String>>,
) -> FilteredCapabilities {
    let visible = |provider: &str| -> bool {
        server_tags
            .get(provider)
            .map(|tags| query.matches(tags))
            .unwrap_or(false)
    };

    FilteredCapabilities {
        tool_names: filter_provided(&aggregate.tools, visible),
        resource_names: filter_provided(&aggregate.resources, visible),
        prompt_names: filter_provided(&aggregate.prompts, visible),
    }
}

fn filter_provided<T>(
    map: &std::collections::BTreeMap<String, Provided<T>>,
    visible: impl Fn(&str) -> bool,
) -> BTreeSet<String> {
    map.iter()
        .filter(|(_, provided)| visible(&provided.provider_server_name))
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::PresetStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn tags(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn advanced_mode_falls_back_to_tag_query_when_tag_expression_is_absent() {
        let fs: Arc<dyn aggmcp_common::fs_utils::FileSystem> = Arc::new(aggmcp_common::fs_utils::RealFileSystem);
        let dir = tempfile::tempdir().unwrap();
        let presets = PresetStore::new(fs, dir.path().to_path_buf());

        let mut session = SessionRecord::new("s1", Duration::from_secs(60));
        session.tag_filter_mode = TagFilterMode::Advanced;
        session.tag_query_json = Some("\"prod AND NOT staging\"".to_string());

        let query = resolve_query(&session, &presets).unwrap();
        assert!(query.matches(&tags(&["prod"])));
        assert!(!query.matches(&tags(&["prod", "staging"])));
    }

    #[test]
    fn parses_single_tag() {
        let expr = parse_tag_expression("prod").unwrap();
        assert_eq!(expr, TagExpr::Tag("prod".to_string()));
    }

    #[test]
    fn parses_and_or_not_with_precedence() {
        // AND binds tighter than OR: `a OR b AND c` == `a OR (b AND c)`.
        let expr = parse_tag_expression("a OR b AND c").unwrap();
        assert_eq!(
            expr,
            TagExpr::Or(
                Box::new(TagExpr::Tag("a".to_string())),
                Box::new(TagExpr::And(
                    Box::new(TagExpr::Tag("b".to_string())),
                    Box::new(TagExpr::Tag("c".to_string()))
                ))
            )
        );
    }

    #[test]
    fn parses_parens_and_not() {
        let expr = parse_tag_expression("NOT (a AND b)").unwrap();
        assert!(!expr.eval(&tags(&["a", "b"])));
        assert!(expr.eval(&tags(&["a"])));
    }

    #[test]
    fn invalid_expression_is_an_error() {
        assert!(parse_tag_expression("a AND").is_err());
    }

    #[test]
    fn simple_or_matches_any_overlapping_tag() {
        let query = ResolvedQuery::Or(vec!["x".into(), "y".into()]);
        assert!(query.matches(&tags(&["y", "z"])));
        assert!(!query.matches(&tags(&["z"])));
    }

    #[test]
    fn simple_and_requires_every_session_tag() {
        let query = ResolvedQuery::And(vec!["x".into(), "y".into()]);
        assert!(query.matches(&tags(&["x", "y", "z"])));
        assert!(!query.matches(&tags(&["x"])));
    }
}
