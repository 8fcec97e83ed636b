use regex::bytes::{Regex, RegexSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::errors::{MatchError, MatchResult};
use crate::results::PatternId;

static NEXT_DATABASE_ID: AtomicU64 = AtomicU64::new(1);

/// A multi-pattern engine scanning one buffer at a time.
///
/// A compiled database is shared read-only by every worker. Scratch holds the
/// mutable working memory of a scan and must not be shared between concurrent
/// scans, so each worker allocates its own.
pub trait ScanEngine: Send + Sync {
    type Database: Send + Sync;
    type Scratch: Send;

    /// Compiles the full ordered pattern list
    fn compile(&self, patterns: &[String]) -> MatchResult<Self::Database>;

    /// Allocates scan scratch bound to `db`
    fn alloc_scratch(&self, db: &Self::Database) -> MatchResult<Self::Scratch>;

    /// Scans `text`, calling `on_match` once per match occurrence
    fn scan(
        &self,
        db: &Self::Database,
        scratch: &mut Self::Scratch,
        text: &[u8],
        on_match: &mut dyn FnMut(PatternId),
    ) -> MatchResult<()>;
}

/// Compiled pattern set for [`RegexScanEngine`]
#[derive(Debug)]
pub struct RegexDatabase {
    id: u64,
    set: RegexSet,
    regexes: Vec<Regex>,
}

impl RegexDatabase {
    pub fn pattern_count(&self) -> usize {
        self.regexes.len()
    }
}

/// Per-worker working memory for [`RegexScanEngine`]
#[derive(Debug)]
pub struct RegexScratch {
    database_id: u64,
    hits: Vec<(usize, PatternId)>,
}

/// CPU engine built on `regex`.
///
/// The `RegexSet` answers which patterns occur in a line in one pass; only those
/// patterns are then run individually to enumerate their occurrences. Occurrences
/// are reported in order of their end offset, one callback each.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexScanEngine;

impl RegexScanEngine {
    pub fn new() -> Self {
        Self
    }

    fn build(&self, id: PatternId, pattern: &str) -> MatchResult<Regex> {
        let regex = Regex::new(pattern)
            .map_err(|e| MatchError::invalid_pattern(id, e.to_string()))?;
        // An empty-width match would fire at every offset of every line
        if regex.is_match(b"") {
            return Err(MatchError::invalid_pattern(id, "pattern matches empty input"));
        }
        Ok(regex)
    }
}

impl ScanEngine for RegexScanEngine {
    type Database = RegexDatabase;
    type Scratch = RegexScratch;

    fn compile(&self, patterns: &[String]) -> MatchResult<RegexDatabase> {
        let regexes = patterns
            .iter()
            .enumerate()
            .map(|(id, pattern)| self.build(id, pattern))
            .collect::<MatchResult<Vec<_>>>()?;

        let set = RegexSet::new(patterns)
            .map_err(|e| MatchError::invalid_pattern(0, format!("pattern set: {}", e)))?;

        let id = NEXT_DATABASE_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Compiled database {} with {} patterns", id, regexes.len());
        Ok(RegexDatabase { id, set, regexes })
    }

    fn alloc_scratch(&self, db: &RegexDatabase) -> MatchResult<RegexScratch> {
        let mut hits = Vec::new();
        hits.try_reserve(db.regexes.len().max(16)).map_err(|e| {
            MatchError::resource_exhausted(format!("cannot allocate scan scratch: {}", e))
        })?;
        Ok(RegexScratch {
            database_id: db.id,
            hits,
        })
    }

    fn scan(
        &self,
        db: &RegexDatabase,
        scratch: &mut RegexScratch,
        text: &[u8],
        on_match: &mut dyn FnMut(PatternId),
    ) -> MatchResult<()> {
        if scratch.database_id != db.id {
            return Err(MatchError::scan_error(format!(
                "scratch allocated for database {} used with database {}",
                scratch.database_id, db.id
            )));
        }

        scratch.hits.clear();
        for id in db.set.matches(text).iter() {
            scratch
                .hits
                .extend(db.regexes[id].find_iter(text).map(|m| (m.end(), id)));
        }
        scratch.hits.sort_by_key(|&(end, id)| (end, id));

        for &(_, id) in &scratch.hits {
            on_match(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(engine: &RegexScanEngine, db: &RegexDatabase, text: &[u8]) -> Vec<PatternId> {
        let mut scratch = engine.alloc_scratch(db).unwrap();
        let mut ids = Vec::new();
        engine
            .scan(db, &mut scratch, text, &mut |id| ids.push(id))
            .unwrap();
        ids
    }

    #[test]
    fn test_simple_pattern_matching() {
        let engine = RegexScanEngine::new();
        let db = engine
            .compile(&["ab".to_string(), "cd".to_string()])
            .unwrap();
        assert_eq!(db.pattern_count(), 2);
        assert_eq!(scan_all(&engine, &db, b"xaby"), vec![0]);
        assert_eq!(scan_all(&engine, &db, b"zcdw"), vec![1]);
        assert!(scan_all(&engine, &db, b"none").is_empty());
    }

    #[test]
    fn test_every_occurrence_reported() {
        let engine = RegexScanEngine::new();
        let db = engine.compile(&["test".to_string()]).unwrap();
        assert_eq!(
            scan_all(&engine, &db, b"a test string with test pattern"),
            vec![0, 0]
        );
    }

    #[test]
    fn test_occurrences_ordered_by_end_offset() {
        let engine = RegexScanEngine::new();
        let db = engine
            .compile(&[r"word\d".to_string(), "alpha".to_string()])
            .unwrap();
        assert_eq!(
            scan_all(&engine, &db, b"word1 alpha word2"),
            vec![0, 1, 0]
        );
    }

    #[test]
    fn test_regex_pattern_matching() {
        let engine = RegexScanEngine::new();
        let db = engine.compile(&[r"\btest\w+".to_string()]).unwrap();
        assert_eq!(scan_all(&engine, &db, b"testing tests tested").len(), 3);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let engine = RegexScanEngine::new();
        let err = engine
            .compile(&["ok".to_string(), "(unclosed".to_string()])
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidPattern { id: 1, .. }));
    }

    #[test]
    fn test_empty_matching_pattern_rejected() {
        let engine = RegexScanEngine::new();
        assert!(engine.compile(&[String::new()]).is_err());
        assert!(engine.compile(&["a*".to_string()]).is_err());
    }

    #[test]
    fn test_foreign_scratch_is_a_scan_error() {
        let engine = RegexScanEngine::new();
        let db1 = engine.compile(&["a".to_string()]).unwrap();
        let db2 = engine.compile(&["b".to_string()]).unwrap();
        let mut scratch = engine.alloc_scratch(&db1).unwrap();
        let result = engine.scan(&db2, &mut scratch, b"ab", &mut |_| {});
        assert!(matches!(result, Err(MatchError::ScanError(_))));
    }

    #[test]
    fn test_non_utf8_lines() {
        let engine = RegexScanEngine::new();
        let db = engine.compile(&["ab".to_string()]).unwrap();
        assert_eq!(scan_all(&engine, &db, b"\xff\xfeab\xff"), vec![0]);
    }
}
