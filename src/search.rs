// src/search.rs

//! Query Engine (C4): hybrid exact/substring scoring over the five textual
//! problem fields, tag-set intersection, and profession filtering.
//!
//! Deliberately implemented as an in-process scan rather than delegating
//! scoring to SQLite FTS5's own bm25: the spec's score weights and snippet
//! rule are bespoke and easiest to express, test, and reason about in plain
//! Rust over rows already pulled from the FTS-backed candidate set.

use crate::db::models::Problem;
use crate::error::Result;
use rusqlite::Connection;
use std::collections::HashSet;

const MAX_QUERY_TERMS: usize = 8;

const WEIGHT_TITLE: u32 = 120;
const WEIGHT_SYMPTOM: u32 = 45;
const WEIGHT_ROOT_CAUSE: u32 = 40;
const WEIGHT_SOLUTION: u32 = 35;
const WEIGHT_ENVIRONMENT: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfessionFilter<'a> {
    All,
    Unassigned,
    Specific(&'a str),
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub problem_id: String,
    pub score: u32,
    pub snippet: Option<String>,
    pub updated_at_utc: String,
}

/// Split on whitespace, case-insensitive dedupe, cap at [`MAX_QUERY_TERMS`].
fn split_terms(q: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();

    for raw in q.split_whitespace() {
        let lower = raw.to_lowercase();
        if lower.is_empty() || !seen.insert(lower.clone()) {
            continue;
        }
        terms.push(lower);
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }

    terms
}

fn profession_matches(environment_json: &str, filter: ProfessionFilter) -> bool {
    match filter {
        ProfessionFilter::All => true,
        ProfessionFilter::Unassigned => !environment_json.contains("\"__professionid\":"),
        ProfessionFilter::Specific(id) => {
            environment_json.contains(&format!("\"__professionid\":\"{id}\""))
        }
    }
}

/// Term hits and score contribution across the five fields, for one term.
fn score_term(problem: &Problem, term: &str) -> Option<u32> {
    let mut score = 0;
    let mut matched = false;

    let fields: [(&str, u32); 5] = [
        (&problem.title, WEIGHT_TITLE),
        (&problem.symptom, WEIGHT_SYMPTOM),
        (&problem.root_cause, WEIGHT_ROOT_CAUSE),
        (&problem.solution, WEIGHT_SOLUTION),
        (&problem.environment_json, WEIGHT_ENVIRONMENT),
    ];

    for (text, weight) in fields {
        if text.to_lowercase().contains(term) {
            score += weight;
            matched = true;
        }
    }

    if matched {
        Some(score)
    } else {
        None
    }
}

/// First matching field among `{symptom, rootCause, solution,
/// environmentJson}` for the first term, windowed to 100 chars starting 10
/// chars before the match (clamped to the start of the string).
fn snippet_for_first_term(problem: &Problem, first_term: &str) -> Option<String> {
    let candidates = [
        &problem.symptom,
        &problem.root_cause,
        &problem.solution,
        &problem.environment_json,
    ];

    for text in candidates {
        let lower = text.to_lowercase();
        if let Some(byte_pos) = lower.find(first_term) {
            // Work in chars, not bytes, to stay on UTF-8 boundaries.
            let char_pos = lower[..byte_pos].chars().count();
            let start = char_pos.saturating_sub(10);
            let snippet: String = text.chars().skip(start).take(100).collect();
            return Some(snippet);
        }
    }

    None
}

fn tags_for_problem(conn: &Connection, problem_id: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT tagId FROM problemTag
         WHERE problemId = ?1 AND isDeleted = 0
           AND tagId IN (SELECT id FROM tag WHERE isDeleted = 0)",
    )?;
    let ids = stmt
        .query_map([problem_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(ids)
}

fn candidate_problems(conn: &Connection) -> Result<Vec<Problem>> {
    Problem::list_updated_after(conn, None, None).map(|mut rows| {
        rows.retain(|p| !p.is_deleted);
        rows
    })
}

fn matching_hits(
    conn: &Connection,
    q: &str,
    tag_ids: &[String],
    profession: ProfessionFilter,
) -> Result<Vec<SearchHit>> {
    let terms = split_terms(q);
    let required_tags: HashSet<&String> = tag_ids.iter().collect();

    let mut hits = Vec::new();

    for problem in candidate_problems(conn)? {
        if !profession_matches(&problem.environment_json, profession) {
            continue;
        }

        if !required_tags.is_empty() {
            let active = tags_for_problem(conn, &problem.id)?;
            if !required_tags.iter().all(|t| active.contains(*t)) {
                continue;
            }
        }

        if terms.is_empty() {
            hits.push(SearchHit {
                problem_id: problem.id.clone(),
                score: 0,
                snippet: None,
                updated_at_utc: problem.updated_at_utc.clone(),
            });
            continue;
        }

        let mut total_score = 0;
        let mut all_matched = true;
        for term in &terms {
            match score_term(&problem, term) {
                Some(s) => total_score += s,
                None => {
                    all_matched = false;
                    break;
                }
            }
        }

        if !all_matched {
            continue;
        }

        let snippet = snippet_for_first_term(&problem, &terms[0]);
        hits.push(SearchHit {
            problem_id: problem.id.clone(),
            score: total_score,
            snippet,
            updated_at_utc: problem.updated_at_utc.clone(),
        });
    }

    hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| b.updated_at_utc.cmp(&a.updated_at_utc)));
    Ok(hits)
}

pub fn search_problems(
    conn: &Connection,
    q: &str,
    tag_ids: &[String],
    profession: ProfessionFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<SearchHit>> {
    let hits = matching_hits(conn, q, tag_ids, profession)?;
    Ok(hits
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect())
}

pub fn count_problems(
    conn: &Connection,
    q: &str,
    tag_ids: &[String],
    profession: ProfessionFilter,
) -> Result<i64> {
    Ok(matching_hits(conn, q, tag_ids, profession)?.len() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, models::{ProblemTag, SourceKind, Tag}};
    use tempfile::NamedTempFile;

    fn test_conn() -> Connection {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap().to_string();
        drop(temp);
        db::init(&path).unwrap()
    }

    fn problem(id: &str, title: &str, symptom: &str, env: &str, updated_at: &str) -> Problem {
        Problem {
            id: id.to_string(),
            title: title.to_string(),
            symptom: symptom.to_string(),
            root_cause: String::new(),
            solution: String::new(),
            environment_json: env.to_string(),
            severity: 0,
            status: 0,
            created_by: None,
            source_kind: SourceKind::Personal,
            is_deleted: false,
            deleted_at_utc: None,
            created_at_utc: updated_at.to_string(),
            updated_at_utc: updated_at.to_string(),
            updated_by_instance_id: "i1".to_string(),
        }
    }

    #[test]
    fn test_empty_query_matches_all_non_deleted() {
        let conn = test_conn();
        problem("p1", "PLC timeout", "halts", "{}", "2024-01-01T00:00:00Z").upsert(&conn).unwrap();
        let mut p2 = problem("p2", "Sensor drift", "noise", "{}", "2024-01-02T00:00:00Z");
        p2.is_deleted = true;
        p2.upsert(&conn).unwrap();

        let hits = search_problems(&conn, "", &[], ProfessionFilter::All, 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].problem_id, "p1");
    }

    #[test]
    fn test_substring_search_is_case_insensitive() {
        let conn = test_conn();
        problem("p1", "PLC Timeout Alarm", "Machine HALTS", "{}", "2024-01-01T00:00:00Z")
            .upsert(&conn)
            .unwrap();

        let hits = search_problems(&conn, "plc halts", &[], ProfessionFilter::All, 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].problem_id, "p1");
    }

    #[test]
    fn test_scoring_prefers_title_hit() {
        let conn = test_conn();
        problem("title-hit", "timeout error", "unrelated", "{}", "2024-01-01T00:00:00Z")
            .upsert(&conn)
            .unwrap();
        problem("symptom-hit", "unrelated", "timeout observed", "{}", "2024-01-01T00:00:00Z")
            .upsert(&conn)
            .unwrap();

        let hits = search_problems(&conn, "timeout", &[], ProfessionFilter::All, 10, 0).unwrap();
        assert_eq!(hits[0].problem_id, "title-hit");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_tag_filter_is_intersection() {
        let conn = test_conn();
        problem("p1", "A", "", "{}", "2024-01-01T00:00:00Z").upsert(&conn).unwrap();
        problem("p2", "A", "", "{}", "2024-01-01T00:00:00Z").upsert(&conn).unwrap();

        let tag_a = Tag::create(&conn, "tag-a", "a", "2024-01-01T00:00:00Z", "i1").unwrap();
        let tag_b = Tag::create(&conn, "tag-b", "b", "2024-01-01T00:00:00Z", "i1").unwrap();

        ProblemTag::set_tags_for_problem(&conn, "p1", &[tag_a.id.clone(), tag_b.id.clone()], "2024-01-01T00:00:00Z", "i1", || {
            uuid::Uuid::new_v4().to_string()
        })
        .unwrap();
        ProblemTag::set_tags_for_problem(&conn, "p2", &[tag_a.id.clone()], "2024-01-01T00:00:00Z", "i1", || {
            uuid::Uuid::new_v4().to_string()
        })
        .unwrap();

        let both = search_problems(&conn, "", &[tag_a.id.clone(), tag_b.id.clone()], ProfessionFilter::All, 10, 0).unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].problem_id, "p1");

        let just_a = search_problems(&conn, "", &[tag_a.id.clone()], ProfessionFilter::All, 10, 0).unwrap();
        assert_eq!(just_a.len(), 2);
    }

    #[test]
    fn test_profession_filter_unassigned_and_specific() {
        let conn = test_conn();
        problem("p1", "A", "", "{}", "2024-01-01T00:00:00Z").upsert(&conn).unwrap();
        problem("p2", "A", "", "{\"__professionid\":\"electrician\"}", "2024-01-01T00:00:00Z")
            .upsert(&conn)
            .unwrap();

        let unassigned = search_problems(&conn, "", &[], ProfessionFilter::Unassigned, 10, 0).unwrap();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].problem_id, "p1");

        let specific = search_problems(&conn, "", &[], ProfessionFilter::Specific("electrician"), 10, 0).unwrap();
        assert_eq!(specific.len(), 1);
        assert_eq!(specific[0].problem_id, "p2");
    }

    #[test]
    fn test_pagination_limit_and_offset() {
        let conn = test_conn();
        for i in 0..5 {
            problem(&format!("p{i}"), "A", "", "{}", &format!("2024-01-0{}T00:00:00Z", i + 1))
                .upsert(&conn)
                .unwrap();
        }

        let count = count_problems(&conn, "", &[], ProfessionFilter::All).unwrap();
        assert_eq!(count, 5);

        let page = search_problems(&conn, "", &[], ProfessionFilter::All, 2, 2).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_snippet_only_for_nonempty_query() {
        let conn = test_conn();
        problem("p1", "A", "the machine halts unexpectedly after startup", "{}", "2024-01-01T00:00:00Z")
            .upsert(&conn)
            .unwrap();

        let hits = search_problems(&conn, "halts", &[], ProfessionFilter::All, 10, 0).unwrap();
        assert!(hits[0].snippet.is_some());

        let hits_empty_q = search_problems(&conn, "", &[], ProfessionFilter::All, 10, 0).unwrap();
        assert!(hits_empty_q[0].snippet.is_none());
    }

    #[test]
    fn test_query_terms_capped_and_deduped() {
        let terms = split_terms("Timeout timeout A B C D E F G H");
        assert_eq!(terms.len(), MAX_QUERY_TERMS);
        assert_eq!(terms[0], "timeout");
    }
}
